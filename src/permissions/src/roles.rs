//! Role store
//!
//! Roles are named, priority-ordered sets of catalog permissions. Every write
//! is a version-checked compare-and-swap against the repository, and advances
//! the role's epoch only after the write has been committed.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::cache::{EpochClock, EpochScope};
use crate::catalog::PermissionCatalog;
use crate::error::{AuthzError, Result};
use crate::store::Repository;
use crate::types::{PermissionName, Role, UpdateMode, UserId, Version};

/// Maximum role name length
pub const MAX_ROLE_NAME_LEN: usize = 128;

/// Answers whether any user currently holds a role
///
/// Role assignment belongs to the calling application; the store asks this
/// collaborator before deleting a role.
#[async_trait]
pub trait RoleAssignments: Send + Sync {
    async fn is_assigned(&self, role: &str) -> Result<bool>;
}

/// Assignment oracle for applications that pre-check assignments themselves
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAssignments;

#[async_trait]
impl RoleAssignments for NoAssignments {
    async fn is_assigned(&self, _role: &str) -> Result<bool> {
        Ok(false)
    }
}

/// In-memory user → roles table
#[derive(Debug, Default, Clone)]
pub struct InMemoryAssignments {
    assignments: Arc<RwLock<HashMap<UserId, HashSet<String>>>>,
}

impl InMemoryAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn assign(&self, user_id: &str, role: &str) {
        let mut assignments = self.assignments.write().await;
        assignments
            .entry(user_id.to_string())
            .or_default()
            .insert(role.to_string());
    }

    pub async fn unassign(&self, user_id: &str, role: &str) {
        let mut assignments = self.assignments.write().await;
        if let Some(roles) = assignments.get_mut(user_id) {
            roles.remove(role);
        }
    }

    /// Roles held by `user_id`, sorted
    pub async fn roles_of(&self, user_id: &str) -> Vec<String> {
        let assignments = self.assignments.read().await;
        let mut roles: Vec<String> = assignments
            .get(user_id)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default();
        roles.sort();
        roles
    }
}

#[async_trait]
impl RoleAssignments for InMemoryAssignments {
    async fn is_assigned(&self, role: &str) -> Result<bool> {
        let assignments = self.assignments.read().await;
        Ok(assignments.values().any(|roles| roles.contains(role)))
    }
}

/// Store of named role definitions
pub struct RoleStore {
    roles: Arc<dyn Repository<Role>>,
    catalog: Arc<PermissionCatalog>,
    assignments: Arc<dyn RoleAssignments>,
    clock: Arc<EpochClock>,
}

impl RoleStore {
    pub fn new(
        roles: Arc<dyn Repository<Role>>,
        catalog: Arc<PermissionCatalog>,
        assignments: Arc<dyn RoleAssignments>,
        clock: Arc<EpochClock>,
    ) -> Self {
        Self {
            roles,
            catalog,
            assignments,
            clock,
        }
    }

    /// Create a new active role
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if the name is blank or any permission is malformed
    ///   or not registered in the catalog
    /// - `Conflict` if a role with this name exists
    pub async fn create_role(
        &self,
        name: &str,
        description: &str,
        permissions: &[String],
        priority: i32,
    ) -> Result<Role> {
        let role = self.build_role(name, description, permissions, priority).await?;
        self.insert(role).await
    }

    /// Create a role protected against deletion and rename
    pub async fn create_system_role(
        &self,
        name: &str,
        description: &str,
        permissions: &[String],
        priority: i32,
    ) -> Result<Role> {
        let role = self
            .build_role(name, description, permissions, priority)
            .await?
            .system();
        self.insert(role).await
    }

    /// Replace, extend, or shrink a role's permission set
    pub async fn update_permissions(
        &self,
        name: &str,
        permissions: &[String],
        mode: UpdateMode,
        expected_version: Version,
    ) -> Result<Role> {
        let permissions = PermissionName::parse_all(permissions)?;
        // Removing an identifier that was since unregistered must stay possible
        if mode != UpdateMode::Remove {
            self.catalog.ensure_registered(&permissions).await?;
        }

        let mut role = self.load_at(name, expected_version).await?;
        role.apply(permissions, mode);

        let role = self.roles.compare_and_swap(role, expected_version).await?;
        self.clock.advance(EpochScope::Role(&role.name));
        info!(
            "Updated role '{}' permissions (mode={}, count={}, version={})",
            role.name,
            mode,
            role.permissions.len(),
            role.version
        );

        Ok(role)
    }

    /// Activate or deactivate a role
    pub async fn set_active(
        &self,
        name: &str,
        active: bool,
        expected_version: Version,
    ) -> Result<Role> {
        let mut role = self.load_at(name, expected_version).await?;
        role.is_active = active;
        role.updated_at = chrono::Utc::now();

        let role = self.roles.compare_and_swap(role, expected_version).await?;
        self.clock.advance(EpochScope::Role(&role.name));
        info!(
            "Role '{}' is now {} (version={})",
            role.name,
            if active { "active" } else { "inactive" },
            role.version
        );

        Ok(role)
    }

    /// Rename a non-system role
    ///
    /// # Errors
    ///
    /// - `Conflict` if it is a system role, is still assigned to a user,
    ///   `new_name` is taken, or `expected_version` is stale
    pub async fn rename(
        &self,
        name: &str,
        new_name: &str,
        expected_version: Version,
    ) -> Result<Role> {
        let new_name = validate_role_name(new_name)?;
        let role = self.load_at(name, expected_version).await?;
        if role.is_system {
            return Err(AuthzError::Conflict(format!(
                "system role '{}' cannot be renamed",
                name
            )));
        }

        // Assignment lists name roles; renaming would orphan their holders
        if self.assignments.is_assigned(name).await? {
            return Err(AuthzError::Conflict(format!(
                "role '{}' is still assigned to users",
                name
            )));
        }

        let mut renamed = role.clone();
        renamed.name = new_name;
        renamed.updated_at = chrono::Utc::now();
        let renamed = self.roles.save(renamed).await?;

        if let Err(e) = self.roles.delete(&role.name, expected_version).await {
            // Lost a race on the old record; undo the copy
            if let Err(undo) = self.roles.delete(&renamed.name, renamed.version).await {
                warn!(
                    "Failed to roll back rename of '{}' to '{}': {}",
                    role.name, renamed.name, undo
                );
            }
            return Err(e);
        }

        self.clock.advance(EpochScope::Role(&role.name));
        self.clock.advance(EpochScope::Role(&renamed.name));
        info!("Renamed role '{}' to '{}'", role.name, renamed.name);

        Ok(renamed)
    }

    /// Delete a role
    ///
    /// # Errors
    ///
    /// - `NotFound` if the role does not exist
    /// - `Conflict` if it is a system role, is still assigned to a user, or
    ///   `expected_version` is stale
    pub async fn delete(&self, name: &str, expected_version: Version) -> Result<()> {
        let role = self.load_at(name, expected_version).await?;
        if role.is_system {
            return Err(AuthzError::Conflict(format!(
                "system role '{}' cannot be deleted",
                name
            )));
        }

        if self.assignments.is_assigned(name).await? {
            return Err(AuthzError::Conflict(format!(
                "role '{}' is still assigned to users",
                name
            )));
        }

        self.roles.delete(name, expected_version).await?;
        self.clock.advance(EpochScope::Role(name));
        info!("Deleted role '{}'", name);

        Ok(())
    }

    /// Get a role by exact name
    pub async fn get(&self, name: &str) -> Result<Role> {
        self.find(name)
            .await?
            .ok_or_else(|| AuthzError::NotFound(format!("role '{}'", name)))
    }

    pub async fn find(&self, name: &str) -> Result<Option<Role>> {
        self.roles.load(name).await
    }

    /// All roles, ordered by priority descending then name
    pub async fn list(&self) -> Result<Vec<Role>> {
        let mut roles = self.roles.list().await?;
        roles.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(roles)
    }

    async fn build_role(
        &self,
        name: &str,
        description: &str,
        permissions: &[String],
        priority: i32,
    ) -> Result<Role> {
        let name = validate_role_name(name)?;
        let permissions = PermissionName::parse_all(permissions)?;
        self.catalog.ensure_registered(&permissions).await?;

        Ok(Role::new(name, description, permissions, priority))
    }

    async fn insert(&self, role: Role) -> Result<Role> {
        let role = self.roles.save(role).await?;
        self.clock.advance(EpochScope::Role(&role.name));
        info!(
            "Created role '{}' (priority={}, permissions={}, system={})",
            role.name,
            role.priority,
            role.permissions.len(),
            role.is_system
        );
        Ok(role)
    }

    /// Load a role and fail fast if it has moved past `expected_version`
    async fn load_at(&self, name: &str, expected_version: Version) -> Result<Role> {
        let role = self.get(name).await?;
        if role.version != expected_version {
            return Err(AuthzError::stale_version(
                format!("role '{}'", name),
                expected_version,
                role.version,
            ));
        }
        Ok(role)
    }
}

fn validate_role_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AuthzError::InvalidArgument(
            "role name cannot be empty".to_string(),
        ));
    }
    if trimmed.len() > MAX_ROLE_NAME_LEN {
        return Err(AuthzError::InvalidArgument(format!(
            "role name exceeds {} characters",
            MAX_ROLE_NAME_LEN
        )));
    }
    if trimmed != name {
        return Err(AuthzError::InvalidArgument(format!(
            "role name '{}' has surrounding whitespace",
            name
        )));
    }
    Ok(trimmed.to_string())
}
