//! Effective permission resolution
//!
//! ```text
//! Effective(u) = ( ⋃ active role permissions ∪ Override(u).granted ) \ Override(u).denied
//! ```
//!
//! The resolver owns no state. It reads point snapshots from the role and
//! override stores and stamps the result with the epoch observed before the
//! first read, so a concurrent mutation always makes the result look stale
//! rather than current.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::normalize_roles;
use crate::cache::EpochClock;
use crate::error::Result;
use crate::overrides::OverrideStore;
use crate::roles::RoleStore;
use crate::types::{Epoch, PermissionName, Role, UserId};

/// Resolved permissions of one user at one epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectivePermissionSet {
    user_id: UserId,
    permissions: HashSet<PermissionName>,
    /// Kept so wildcard grants can still be checked against denials
    denied: HashSet<PermissionName>,
    epoch: Epoch,
}

impl EffectivePermissionSet {
    pub fn new(
        user_id: impl Into<UserId>,
        permissions: HashSet<PermissionName>,
        denied: HashSet<PermissionName>,
        epoch: Epoch,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            permissions,
            denied,
            epoch,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Epoch observed when resolution started
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn permissions(&self) -> &HashSet<PermissionName> {
        &self.permissions
    }

    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PermissionName> {
        self.permissions.iter()
    }

    /// Literal set membership
    pub fn contains(&self, name: &PermissionName) -> bool {
        self.permissions.contains(name)
    }

    /// Whether the user may exercise `name`.
    ///
    /// A denial covering `name` wins over everything; otherwise `name` must be
    /// held exactly or through a held wildcard.
    pub fn allows(&self, name: &PermissionName) -> bool {
        if self.denied.iter().any(|d| d.covers(name)) {
            return false;
        }
        if self.permissions.contains(name) {
            return true;
        }
        self.permissions
            .iter()
            .any(|p| p.is_wildcard() && p.covers(name))
    }

    /// Permissions sorted by name
    pub fn to_sorted_vec(&self) -> Vec<PermissionName> {
        let mut names: Vec<_> = self.permissions.iter().cloned().collect();
        names.sort();
        names
    }
}

/// Combines roles and overrides into an [`EffectivePermissionSet`]
pub struct PermissionResolver {
    roles: Arc<RoleStore>,
    overrides: Arc<OverrideStore>,
    clock: Arc<EpochClock>,
}

impl PermissionResolver {
    pub fn new(roles: Arc<RoleStore>, overrides: Arc<OverrideStore>, clock: Arc<EpochClock>) -> Self {
        Self {
            roles,
            overrides,
            clock,
        }
    }

    /// Resolve the effective permission set of `user_id` holding `role_names`.
    ///
    /// Unknown role names contribute nothing; a role may be deleted while an
    /// assignment list still references it. Repository failures propagate.
    pub async fn resolve(
        &self,
        user_id: &str,
        role_names: &[String],
    ) -> Result<EffectivePermissionSet> {
        let epoch = self.clock.current();
        let mut permissions: HashSet<PermissionName> = HashSet::new();

        for name in normalize_roles(role_names) {
            match self.roles.find(&name).await? {
                Some(role) if role.is_active => {
                    permissions.extend(role.permissions);
                }
                Some(_) => {
                    debug!("Role '{}' is inactive, skipping", name);
                }
                None => {
                    debug!("Role '{}' not found for user '{}', skipping", name, user_id);
                }
            }
        }

        let user_override = self.overrides.get(user_id).await?;
        let overlap = user_override.overlap();
        if !overlap.is_empty() {
            let names: Vec<&str> = overlap.iter().map(|p| p.as_str()).collect();
            warn!(
                "User '{}' has permissions both granted and denied, treating as denied: {}",
                user_id,
                names.join(", ")
            );
        }

        permissions.extend(user_override.granted);
        let denied = user_override.denied;
        permissions.retain(|p| !denied.iter().any(|d| d.covers(p)));

        debug!(
            "Resolved {} permissions for user '{}' at epoch {}",
            permissions.len(),
            user_id,
            epoch
        );

        Ok(EffectivePermissionSet::new(user_id, permissions, denied, epoch))
    }

    /// Whether `user_id` holding `role_names` may exercise `permission`
    pub async fn has_permission(
        &self,
        user_id: &str,
        role_names: &[String],
        permission: &PermissionName,
    ) -> Result<bool> {
        Ok(self.resolve(user_id, role_names).await?.allows(permission))
    }

    /// Highest-priority active role among `role_names`, ties broken by name
    ///
    /// Priority never gates permissions; this only picks a display label for
    /// multi-role users.
    pub async fn primary_role(&self, role_names: &[String]) -> Result<Option<Role>> {
        let mut best: Option<Role> = None;

        for name in normalize_roles(role_names) {
            let Some(role) = self.roles.find(&name).await? else {
                continue;
            };
            if !role.is_active {
                continue;
            }
            // Names arrive sorted, so strict > keeps the alphabetically first on ties
            match &best {
                Some(current) if current.priority >= role.priority => {}
                _ => best = Some(role),
            }
        }

        Ok(best)
    }
}
