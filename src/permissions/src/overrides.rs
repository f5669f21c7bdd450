//! Per-user grant/deny overrides
//!
//! Deny-wins is enforced on write: adding an identifier to `denied` removes it
//! from `granted` within the same compare-and-swap, and granting a currently
//! denied identifier leaves it denied.

use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{EpochClock, EpochScope};
use crate::catalog::PermissionCatalog;
use crate::error::{AuthzError, Result};
use crate::store::Repository;
use crate::types::{OverrideKind, PermissionName, UserOverride, Version};

/// Store of per-user override sets
pub struct OverrideStore {
    overrides: Arc<dyn Repository<UserOverride>>,
    catalog: Arc<PermissionCatalog>,
    clock: Arc<EpochClock>,
}

impl OverrideStore {
    pub fn new(
        overrides: Arc<dyn Repository<UserOverride>>,
        catalog: Arc<PermissionCatalog>,
        clock: Arc<EpochClock>,
    ) -> Self {
        Self {
            overrides,
            catalog,
            clock,
        }
    }

    /// Union `permissions` into the user's granted set
    pub async fn set_granted(
        &self,
        user_id: &str,
        permissions: &[String],
        expected_version: Version,
    ) -> Result<UserOverride> {
        self.set(user_id, permissions, OverrideKind::Granted, expected_version)
            .await
    }

    /// Union `permissions` into the user's denied set, removing them from granted
    pub async fn set_denied(
        &self,
        user_id: &str,
        permissions: &[String],
        expected_version: Version,
    ) -> Result<UserOverride> {
        self.set(user_id, permissions, OverrideKind::Denied, expected_version)
            .await
    }

    /// Union `permissions` into the `kind` set
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a blank user id or a malformed/unregistered
    ///   permission
    /// - `Conflict` if `expected_version` is stale
    pub async fn set(
        &self,
        user_id: &str,
        permissions: &[String],
        kind: OverrideKind,
        expected_version: Version,
    ) -> Result<UserOverride> {
        validate_user_id(user_id)?;
        let permissions = PermissionName::parse_all(permissions)?;
        self.catalog.ensure_registered(&permissions).await?;

        let mut current = self.load_at(user_id, expected_version).await?;
        match kind {
            OverrideKind::Granted => {
                let skipped = current.grant(permissions);
                if !skipped.is_empty() {
                    debug!(
                        "User '{}': {} grant(s) ignored because they are denied",
                        user_id,
                        skipped.len()
                    );
                }
            }
            OverrideKind::Denied => current.deny(permissions),
        }

        let stored = self
            .overrides
            .compare_and_swap(current, expected_version)
            .await?;
        self.clock.advance(EpochScope::User(user_id));
        info!(
            "Updated {} overrides for user '{}' (granted={}, denied={}, version={})",
            kind,
            user_id,
            stored.granted.len(),
            stored.denied.len(),
            stored.version
        );

        Ok(stored)
    }

    /// Remove all `kind` entries, or both sets when `kind` is `None`
    ///
    /// Clearing a user with nothing recorded is a no-op.
    pub async fn clear(
        &self,
        user_id: &str,
        kind: Option<OverrideKind>,
        expected_version: Version,
    ) -> Result<UserOverride> {
        validate_user_id(user_id)?;
        let mut current = self.load_at(user_id, expected_version).await?;
        if current.version == 0 {
            return Ok(current);
        }

        current.clear(kind);
        let stored = self
            .overrides
            .compare_and_swap(current, expected_version)
            .await?;
        self.clock.advance(EpochScope::User(user_id));
        info!(
            "Cleared {} overrides for user '{}' (version={})",
            kind.map(|k| k.to_string()).unwrap_or_else(|| "all".to_string()),
            user_id,
            stored.version
        );

        Ok(stored)
    }

    /// Current overrides; empty sets with version 0 if none are recorded
    pub async fn get(&self, user_id: &str) -> Result<UserOverride> {
        Ok(self
            .overrides
            .load(user_id)
            .await?
            .unwrap_or_else(|| UserOverride::empty(user_id)))
    }

    async fn load_at(&self, user_id: &str, expected_version: Version) -> Result<UserOverride> {
        let current = self.get(user_id).await?;
        if current.version != expected_version {
            return Err(AuthzError::stale_version(
                format!("override for user '{}'", user_id),
                expected_version,
                current.version,
            ));
        }
        Ok(current)
    }
}

fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(AuthzError::InvalidArgument(
            "user id cannot be empty".to_string(),
        ));
    }
    Ok(())
}
