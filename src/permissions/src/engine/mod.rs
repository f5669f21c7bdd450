//! Administrative facade
//!
//! Wires the catalog, role store, override store, resolver, and resolution
//! cache together and exposes the operations transports call into. Input is
//! validated here before any state is touched; errors are returned as
//! [`AuthzError`] for the transport to map.
//!
//! # Architecture
//!
//! ```text
//! mutation → Catalog / RoleStore / OverrideStore → Repository (CAS) → EpochClock::advance
//!
//! query → ResolutionCache ──hit──────────────────────────────→ EffectivePermissionSet
//!              └─miss─→ PermissionResolver → RoleStore + OverrideStore ─┘
//!                                        ↓
//!                                    [Metrics]
//! ```

pub mod config;
pub mod metrics;

pub use config::EngineConfig;
pub use metrics::{EngineMetrics, MetricsCollector};

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::cache::{CacheStats, EpochClock, ResolutionCache};
use crate::catalog::PermissionCatalog;
use crate::error::{AuthzError, Result};
use crate::overrides::OverrideStore;
use crate::resolver::{EffectivePermissionSet, PermissionResolver};
use crate::roles::{NoAssignments, RoleAssignments, RoleStore};
use crate::store::{InMemoryRepository, Repository};
use crate::types::{
    Epoch, OverrideKind, Permission, PermissionName, Role, UpdateMode, UserOverride, Version,
};

/// Persistence collaborators the engine is built over
#[derive(Clone)]
pub struct EngineStores {
    pub permissions: Arc<dyn Repository<Permission>>,
    pub roles: Arc<dyn Repository<Role>>,
    pub overrides: Arc<dyn Repository<UserOverride>>,
    pub assignments: Arc<dyn RoleAssignments>,
}

impl EngineStores {
    /// Fresh in-memory repositories and no assignment tracking
    pub fn in_memory() -> Self {
        Self {
            permissions: Arc::new(InMemoryRepository::<Permission>::new()),
            roles: Arc::new(InMemoryRepository::<Role>::new()),
            overrides: Arc::new(InMemoryRepository::<UserOverride>::new()),
            assignments: Arc::new(NoAssignments),
        }
    }

    pub fn with_assignments(mut self, assignments: Arc<dyn RoleAssignments>) -> Self {
        self.assignments = assignments;
        self
    }
}

/// Permission engine facade
///
/// Safe to share across tasks behind an `Arc`; queries take no locks beyond
/// the repositories' point reads.
pub struct PermissionEngine {
    catalog: Arc<PermissionCatalog>,
    roles: Arc<RoleStore>,
    overrides: Arc<OverrideStore>,
    resolver: Arc<PermissionResolver>,
    clock: Arc<EpochClock>,
    cache: Option<Arc<ResolutionCache>>,
    metrics: Option<Arc<MetricsCollector>>,
    config: EngineConfig,
}

impl PermissionEngine {
    /// Create an engine over the given collaborators
    pub fn new(config: EngineConfig, stores: EngineStores) -> Result<Self> {
        config.validate()?;

        let clock = Arc::new(if config.enable_cache {
            EpochClock::with_mode(config.cache.invalidation)
        } else {
            EpochClock::new()
        });
        let catalog = Arc::new(PermissionCatalog::new(
            stores.permissions,
            Arc::clone(&stores.roles),
            Arc::clone(&clock),
        ));
        let roles = Arc::new(RoleStore::new(
            stores.roles,
            Arc::clone(&catalog),
            stores.assignments,
            Arc::clone(&clock),
        ));
        let overrides = Arc::new(OverrideStore::new(
            stores.overrides,
            Arc::clone(&catalog),
            Arc::clone(&clock),
        ));
        let resolver = Arc::new(PermissionResolver::new(
            Arc::clone(&roles),
            Arc::clone(&overrides),
            Arc::clone(&clock),
        ));

        let cache = if config.enable_cache {
            Some(Arc::new(ResolutionCache::new(
                config.cache.clone(),
                Arc::clone(&clock),
            )))
        } else {
            None
        };

        let metrics = if config.enable_metrics {
            Some(Arc::new(MetricsCollector::new()))
        } else {
            None
        };

        info!(
            "PermissionEngine initialized with cache={} (capacity={}, invalidation={:?}), metrics={}",
            config.enable_cache,
            config.cache.capacity,
            config.cache.invalidation,
            config.enable_metrics
        );

        Ok(Self {
            catalog,
            roles,
            overrides,
            resolver,
            clock,
            cache,
            metrics,
            config,
        })
    }

    /// Create an engine over fresh in-memory repositories
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        Self::new(config, EngineStores::in_memory())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current global epoch
    pub fn epoch(&self) -> Epoch {
        self.clock.current()
    }

    pub fn catalog(&self) -> &PermissionCatalog {
        &self.catalog
    }

    pub fn roles(&self) -> &RoleStore {
        &self.roles
    }

    pub fn overrides(&self) -> &OverrideStore {
        &self.overrides
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    // Catalog

    /// Register a permission in the catalog
    pub async fn create_permission(
        &self,
        name: &str,
        description: &str,
        category: &str,
    ) -> Result<Permission> {
        let result = self.catalog.register(name, description, category).await;
        self.track_mutation(result)
    }

    pub async fn get_permission(&self, name: &str) -> Result<Permission> {
        self.catalog.get(name).await
    }

    /// List the catalog, optionally restricted to `categories`
    pub async fn list_permissions(&self, categories: Option<&[String]>) -> Result<Vec<Permission>> {
        match categories {
            Some(categories) => self.catalog.list_by_categories(categories).await,
            None => self.catalog.list().await,
        }
    }

    /// Unregister a permission no active role references
    pub async fn delete_permission(&self, name: &str) -> Result<()> {
        let result = self.catalog.unregister(name).await;
        self.track_mutation(result)
    }

    // Roles

    pub async fn create_role(
        &self,
        name: &str,
        description: &str,
        permissions: &[String],
        priority: i32,
    ) -> Result<Role> {
        let result = self
            .roles
            .create_role(name, description, permissions, priority)
            .await;
        self.track_mutation(result)
    }

    pub async fn create_system_role(
        &self,
        name: &str,
        description: &str,
        permissions: &[String],
        priority: i32,
    ) -> Result<Role> {
        let result = self
            .roles
            .create_system_role(name, description, permissions, priority)
            .await;
        self.track_mutation(result)
    }

    pub async fn update_role_permissions(
        &self,
        name: &str,
        permissions: &[String],
        mode: UpdateMode,
        expected_version: Version,
    ) -> Result<Role> {
        let result = self
            .roles
            .update_permissions(name, permissions, mode, expected_version)
            .await;
        self.track_mutation(result)
    }

    /// `update_role_permissions` with the mode given as a string
    pub async fn update_role_permissions_str(
        &self,
        name: &str,
        permissions: &[String],
        mode: &str,
        expected_version: Version,
    ) -> Result<Role> {
        let mode: UpdateMode = mode.parse()?;
        self.update_role_permissions(name, permissions, mode, expected_version)
            .await
    }

    pub async fn set_role_active(
        &self,
        name: &str,
        active: bool,
        expected_version: Version,
    ) -> Result<Role> {
        let result = self.roles.set_active(name, active, expected_version).await;
        self.track_mutation(result)
    }

    pub async fn rename_role(
        &self,
        name: &str,
        new_name: &str,
        expected_version: Version,
    ) -> Result<Role> {
        let result = self.roles.rename(name, new_name, expected_version).await;
        self.track_mutation(result)
    }

    pub async fn delete_role(&self, name: &str, expected_version: Version) -> Result<()> {
        let result = self.roles.delete(name, expected_version).await;
        self.track_mutation(result)
    }

    pub async fn get_role(&self, name: &str) -> Result<Role> {
        self.roles.get(name).await
    }

    /// Roles ordered by priority descending, then name
    pub async fn list_roles(&self) -> Result<Vec<Role>> {
        self.roles.list().await
    }

    // Overrides

    pub async fn set_user_overrides(
        &self,
        user_id: &str,
        permissions: &[String],
        kind: OverrideKind,
        expected_version: Version,
    ) -> Result<UserOverride> {
        let result = self
            .overrides
            .set(user_id, permissions, kind, expected_version)
            .await;
        self.track_mutation(result)
    }

    pub async fn clear_user_overrides(
        &self,
        user_id: &str,
        kind: Option<OverrideKind>,
        expected_version: Version,
    ) -> Result<UserOverride> {
        let result = self.overrides.clear(user_id, kind, expected_version).await;
        self.track_mutation(result)
    }

    pub async fn get_user_overrides(&self, user_id: &str) -> Result<UserOverride> {
        self.overrides.get(user_id).await
    }

    // Queries

    /// Effective permission set, served from cache when still fresh
    pub async fn get_effective_permission_set(
        &self,
        user_id: &str,
        role_names: &[String],
    ) -> Result<Arc<EffectivePermissionSet>> {
        let start = Instant::now();
        let result = self.lookup(user_id, role_names).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_resolution();
            metrics.record_latency(start.elapsed());
            if result.is_err() {
                metrics.record_error();
            }
        }

        result
    }

    /// Effective permissions as catalog records sorted by name
    ///
    /// Identifiers that are no longer registered are omitted.
    pub async fn get_effective_permissions(
        &self,
        user_id: &str,
        role_names: &[String],
    ) -> Result<Vec<Permission>> {
        let set = self.get_effective_permission_set(user_id, role_names).await?;

        let mut permissions = Vec::with_capacity(set.len());
        for name in set.to_sorted_vec() {
            match self.catalog.find(&name).await? {
                Some(permission) => permissions.push(permission),
                None => debug!("Effective permission '{}' is not in the catalog", name),
            }
        }

        Ok(permissions)
    }

    /// Whether `user_id` holding `role_names` may exercise `permission`
    pub async fn has_permission(
        &self,
        user_id: &str,
        role_names: &[String],
        permission: &str,
    ) -> Result<bool> {
        let permission = PermissionName::parse(permission)?;
        let set = self.get_effective_permission_set(user_id, role_names).await?;
        let allowed = set.allows(&permission);

        if let Some(metrics) = &self.metrics {
            metrics.record_check(allowed);
        }
        debug!(
            "Check user='{}' permission='{}' -> {}",
            user_id,
            permission,
            if allowed { "ALLOW" } else { "DENY" }
        );

        Ok(allowed)
    }

    /// Highest-priority active role among `role_names`
    pub async fn primary_role(&self, role_names: &[String]) -> Result<Option<Role>> {
        self.resolver.primary_role(role_names).await
    }

    /// Drop every cached resolution
    pub fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
            info!("Resolution cache invalidated");
        }
    }

    pub fn get_metrics(&self) -> Option<EngineMetrics> {
        self.metrics.as_ref().map(|metrics| metrics.get_metrics())
    }

    pub fn export_prometheus(&self) -> Option<String> {
        self.metrics.as_ref().map(|metrics| metrics.export_prometheus())
    }

    pub fn get_cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    async fn lookup(
        &self,
        user_id: &str,
        role_names: &[String],
    ) -> Result<Arc<EffectivePermissionSet>> {
        if let Some(cache) = &self.cache {
            if let Some(set) = cache.get(user_id, role_names) {
                if let Some(metrics) = &self.metrics {
                    metrics.record_cache_hit();
                }
                return Ok(set);
            }

            if let Some(metrics) = &self.metrics {
                metrics.record_cache_miss();
            }
        }

        let set = Arc::new(self.resolver.resolve(user_id, role_names).await?);

        if let Some(cache) = &self.cache {
            cache.put(user_id, role_names, Arc::clone(&set));
        }

        Ok(set)
    }

    fn track_mutation<T>(&self, result: Result<T>) -> Result<T> {
        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(_) => metrics.record_mutation(),
                Err(AuthzError::Conflict(_)) => metrics.record_conflict(),
                Err(_) => metrics.record_error(),
            }
        }
        result
    }
}
