//! # CretoAI Permission Engine
//!
//! Resolves the exact set of fine-grained permissions a user holds by
//! composing role-assigned permissions with per-user grant/deny overrides.
//!
//! ## Features
//!
//! - **Permission catalog** with a `category:action:resource` grammar and
//!   referential integrity on unregister
//! - **Roles** with priority, active flag, and protected system roles
//! - **Overrides** with deny-wins enforced on write and again on read
//! - **Optimistic concurrency**: every write is a version-checked
//!   compare-and-swap; stale writes fail with `Conflict`
//! - **Epoch-stamped caching** with global or per-role/per-user invalidation
//!
//! ## Example
//!
//! ```rust
//! use cretoai_permissions::{EngineConfig, OverrideKind, PermissionEngine};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = PermissionEngine::in_memory(EngineConfig::default())?;
//!
//! engine.create_permission("inspection:read", "Read inspections", "inspection").await?;
//! engine.create_permission("inspection:write", "Edit inspections", "inspection").await?;
//! engine
//!     .create_role(
//!         "inspector",
//!         "Field inspector",
//!         &["inspection:read".to_string(), "inspection:write".to_string()],
//!         10,
//!     )
//!     .await?;
//!
//! engine
//!     .set_user_overrides("u-42", &["inspection:write".to_string()], OverrideKind::Denied, 0)
//!     .await?;
//!
//! let roles = vec!["inspector".to_string()];
//! assert!(engine.has_permission("u-42", &roles, "inspection:read").await?);
//! assert!(!engine.has_permission("u-42", &roles, "inspection:write").await?);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod overrides;
pub mod resolver;
pub mod roles;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheStats, EpochClock, EpochScope, InvalidationMode, ResolutionCache};
pub use catalog::PermissionCatalog;
pub use engine::{EngineConfig, EngineMetrics, EngineStores, PermissionEngine};
pub use error::{AuthzError, ErrorKind, Result};
pub use overrides::OverrideStore;
pub use resolver::{EffectivePermissionSet, PermissionResolver};
pub use roles::{InMemoryAssignments, NoAssignments, RoleAssignments, RoleStore};
pub use store::{Entity, InMemoryRepository, Repository};
pub use types::{
    Epoch, OverrideKind, Permission, PermissionName, Role, UpdateMode, UserId, UserOverride,
    Version,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
