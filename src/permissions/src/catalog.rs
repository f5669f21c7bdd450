//! Permission catalog
//!
//! Registry of every valid permission identifier. Roles and overrides may only
//! reference names registered here, and a name cannot be unregistered while an
//! active role still references it.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::{EpochClock, EpochScope};
use crate::error::{AuthzError, Result};
use crate::store::Repository;
use crate::types::{Permission, PermissionName, Role};

/// Registry of permission identifiers and their metadata
pub struct PermissionCatalog {
    permissions: Arc<dyn Repository<Permission>>,
    roles: Arc<dyn Repository<Role>>,
    clock: Arc<EpochClock>,
}

impl PermissionCatalog {
    /// Create a catalog over the given repositories
    ///
    /// `roles` is only read, to enforce referential integrity on unregister.
    pub fn new(
        permissions: Arc<dyn Repository<Permission>>,
        roles: Arc<dyn Repository<Role>>,
        clock: Arc<EpochClock>,
    ) -> Self {
        Self {
            permissions,
            roles,
            clock,
        }
    }

    /// Register a new permission
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `name` violates the identifier grammar or
    ///   `category` is blank
    /// - `Conflict` if `name` is already registered
    pub async fn register(
        &self,
        name: &str,
        description: &str,
        category: &str,
    ) -> Result<Permission> {
        let name = PermissionName::parse(name)?;
        let category = category.trim();
        if category.is_empty() {
            return Err(AuthzError::InvalidArgument(format!(
                "permission '{}' needs a category",
                name
            )));
        }

        let permission = self
            .permissions
            .save(Permission::new(name, description, category))
            .await?;

        self.clock.advance(EpochScope::Catalog);
        info!(
            "Registered permission '{}' (category={})",
            permission.name, permission.category
        );

        Ok(permission)
    }

    /// Get a permission by exact name
    pub async fn get(&self, name: &str) -> Result<Permission> {
        let name = PermissionName::parse(name)?;
        self.find(&name)
            .await?
            .ok_or_else(|| AuthzError::NotFound(format!("permission '{}'", name)))
    }

    pub async fn find(&self, name: &PermissionName) -> Result<Option<Permission>> {
        self.permissions.load(name.as_str()).await
    }

    /// Fail with `InvalidArgument` naming the first unregistered identifier
    pub async fn ensure_registered(&self, names: &[PermissionName]) -> Result<()> {
        for name in names {
            if self.find(name).await?.is_none() {
                return Err(AuthzError::InvalidArgument(format!(
                    "unknown permission '{}'",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Every registered permission, sorted by name
    pub async fn list(&self) -> Result<Vec<Permission>> {
        let mut all = self.permissions.list().await?;
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    /// Permissions tagged with `category`, sorted by name
    pub async fn list_by_category(&self, category: &str) -> Result<Vec<Permission>> {
        self.list_by_categories(&[category.to_string()]).await
    }

    /// Union of several categories, de-duplicated and sorted by name
    pub async fn list_by_categories(&self, categories: &[String]) -> Result<Vec<Permission>> {
        let by_name: BTreeMap<PermissionName, Permission> = self
            .permissions
            .list()
            .await?
            .into_iter()
            .filter(|p| categories.iter().any(|c| c == &p.category))
            .map(|p| (p.name.clone(), p))
            .collect();

        Ok(by_name.into_values().collect())
    }

    /// Remove a permission from the catalog
    ///
    /// # Errors
    ///
    /// - `NotFound` if `name` is not registered
    /// - `Conflict` if an active role still references `name`
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let name = PermissionName::parse(name)?;
        let permission = self
            .find(&name)
            .await?
            .ok_or_else(|| AuthzError::NotFound(format!("permission '{}'", name)))?;

        let mut active = Vec::new();
        let mut inactive = Vec::new();
        for role in self.roles.list().await? {
            if role.has_permission(&name) {
                if role.is_active {
                    active.push(role.name);
                } else {
                    inactive.push(role.name);
                }
            }
        }

        if !active.is_empty() {
            active.sort();
            return Err(AuthzError::Conflict(format!(
                "permission '{}' is referenced by active roles: {}",
                name,
                active.join(", ")
            )));
        }

        if !inactive.is_empty() {
            inactive.sort();
            warn!(
                "Unregistering permission '{}' still referenced by inactive roles: {}",
                name,
                inactive.join(", ")
            );
        }

        self.permissions
            .delete(name.as_str(), permission.version)
            .await?;

        self.clock.advance(EpochScope::Catalog);
        info!("Unregistered permission '{}'", name);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRepository;

    struct Fixture {
        catalog: PermissionCatalog,
        roles: Arc<InMemoryRepository<Role>>,
        clock: Arc<EpochClock>,
    }

    fn fixture() -> Fixture {
        let roles = Arc::new(InMemoryRepository::<Role>::new());
        let clock = Arc::new(EpochClock::new());
        let catalog = PermissionCatalog::new(
            Arc::new(InMemoryRepository::<Permission>::new()),
            roles.clone(),
            Arc::clone(&clock),
        );
        Fixture {
            catalog,
            roles,
            clock,
        }
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let f = fixture();

        let permission = f
            .catalog
            .register("inspection:read", "Read inspections", "inspection")
            .await
            .unwrap();
        assert_eq!(permission.name.as_str(), "inspection:read");
        assert_eq!(f.clock.current(), 1);

        let fetched = f.catalog.get("inspection:read").await.unwrap();
        assert_eq!(fetched.description, "Read inspections");

        assert!(matches!(
            f.catalog.get("inspection:write").await,
            Err(AuthzError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_register_validation() {
        let f = fixture();

        assert!(matches!(
            f.catalog.register("Not Valid", "", "x").await,
            Err(AuthzError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.catalog.register("a:b:c:d", "", "a").await,
            Err(AuthzError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.catalog.register("a:b", "", "  ").await,
            Err(AuthzError::InvalidArgument(_))
        ));

        f.catalog.register("a:b", "", "a").await.unwrap();
        assert!(matches!(
            f.catalog.register("a:b", "again", "a").await,
            Err(AuthzError::Conflict(_))
        ));

        // Failed writes never advance the epoch
        assert_eq!(f.clock.current(), 1);
    }

    #[tokio::test]
    async fn test_list_by_categories() {
        let f = fixture();
        f.catalog.register("supplier:read", "", "supplier").await.unwrap();
        f.catalog.register("supplier:manage", "", "supplier").await.unwrap();
        f.catalog.register("payment:approve", "", "payment").await.unwrap();
        f.catalog.register("inspection:read", "", "inspection").await.unwrap();

        let suppliers = f.catalog.list_by_category("supplier").await.unwrap();
        let names: Vec<_> = suppliers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["supplier:manage", "supplier:read"]);

        let mixed = f
            .catalog
            .list_by_categories(&[
                "payment".to_string(),
                "supplier".to_string(),
                "payment".to_string(),
            ])
            .await
            .unwrap();
        assert_eq!(mixed.len(), 3);

        assert!(f.catalog.list_by_category("audit").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_referenced_by_active_role() {
        let f = fixture();
        f.catalog.register("inspection:read", "", "inspection").await.unwrap();

        let role = Role::new(
            "inspector",
            "",
            vec![PermissionName::parse("inspection:read").unwrap()],
            10,
        );
        f.roles.save(role).await.unwrap();

        let err = f.catalog.unregister("inspection:read").await.unwrap_err();
        assert!(matches!(err, AuthzError::Conflict(_)));
        assert!(err.to_string().contains("inspector"));

        // Still registered
        assert!(f.catalog.get("inspection:read").await.is_ok());
    }

    #[tokio::test]
    async fn test_unregister_with_inactive_reference() {
        let f = fixture();
        f.catalog.register("inspection:read", "", "inspection").await.unwrap();

        let mut role = Role::new(
            "inspector",
            "",
            vec![PermissionName::parse("inspection:read").unwrap()],
            10,
        );
        role.is_active = false;
        f.roles.save(role).await.unwrap();

        f.catalog.unregister("inspection:read").await.unwrap();
        assert!(matches!(
            f.catalog.get("inspection:read").await,
            Err(AuthzError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ensure_registered() {
        let f = fixture();
        f.catalog.register("a:b", "", "a").await.unwrap();

        let known = PermissionName::parse_all(["a:b"]).unwrap();
        assert!(f.catalog.ensure_registered(&known).await.is_ok());

        let unknown = PermissionName::parse_all(["a:b", "a:c"]).unwrap();
        let err = f.catalog.ensure_registered(&unknown).await.unwrap_err();
        assert!(matches!(err, AuthzError::InvalidArgument(_)));
        assert!(err.to_string().contains("a:c"));
    }
}
