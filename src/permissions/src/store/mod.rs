//! Persistence collaborator contract
//!
//! The engine owns no durable state of its own. Catalog, role, and override
//! records are loaded and written through a [`Repository`], which provides
//! version-checked compare-and-swap so concurrent administrative edits are
//! rejected instead of silently overwritten.
//!
//! Implementations report their own I/O failures and timeouts as
//! [`AuthzError::Unavailable`](crate::error::AuthzError::Unavailable); the
//! engine propagates them unchanged and never retries.

mod memory;

pub use memory::InMemoryRepository;

use crate::error::Result;
use crate::types::{Permission, Role, UserOverride, Version};
use async_trait::async_trait;

/// A record stored under a unique string key with a version counter
pub trait Entity: Clone + Send + Sync + 'static {
    /// Entity label used in error messages ("role", "permission", ...)
    const KIND: &'static str;

    fn key(&self) -> &str;

    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);
}

impl Entity for Permission {
    const KIND: &'static str = "permission";

    fn key(&self) -> &str {
        self.name.as_str()
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

impl Entity for Role {
    const KIND: &'static str = "role";

    fn key(&self) -> &str {
        &self.name
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

impl Entity for UserOverride {
    const KIND: &'static str = "override";

    fn key(&self) -> &str {
        &self.user_id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

/// Versioned key/value persistence for a single entity type
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Load an entity by key
    async fn load(&self, key: &str) -> Result<Option<T>>;

    /// Load every stored entity (unordered)
    async fn list(&self) -> Result<Vec<T>>;

    /// Insert a new entity.
    ///
    /// Fails with `Conflict` if the key already exists. The stored copy gets
    /// version 1 and is returned.
    async fn save(&self, entity: T) -> Result<T>;

    /// Replace an entity if its stored version equals `expected`.
    ///
    /// `expected == 0` means "no record exists yet" and inserts. On success the
    /// stored version becomes `expected + 1`. A mismatch fails with `Conflict`.
    async fn compare_and_swap(&self, entity: T, expected: Version) -> Result<T>;

    /// Remove an entity if its stored version equals `expected`.
    ///
    /// Fails with `NotFound` if absent, `Conflict` on a version mismatch.
    async fn delete(&self, key: &str, expected: Version) -> Result<()>;
}
