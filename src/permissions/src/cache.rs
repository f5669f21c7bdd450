//! Epoch-stamped resolution cache
//!
//! Every committed mutation advances the [`EpochClock`]. Cached effective sets
//! carry the epoch observed when their resolution started, and are served only
//! while no relevant mutation has happened since.
//!
//! Two invalidation modes are supported:
//!
//! - [`InvalidationMode::Global`]: any mutation anywhere invalidates every
//!   entry.
//! - [`InvalidationMode::Scoped`]: the clock also remembers the last epoch at
//!   which each role, each user override, and the catalog changed. An entry is
//!   stale only if one of the epochs relevant to *its* user and roles moved
//!   past the entry's stamp.

use blake3::Hasher;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::resolver::EffectivePermissionSet;
use crate::types::Epoch;

/// Default maximum number of cached resolutions
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Which epochs decide whether a cached entry is still valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationMode {
    /// Single process-wide epoch
    #[default]
    Global,
    /// Per-role and per-user epochs
    Scoped,
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache
    pub capacity: usize,

    /// Invalidation precision
    pub invalidation: InvalidationMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            invalidation: InvalidationMode::Global,
        }
    }
}

/// What a committed mutation touched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochScope<'a> {
    Catalog,
    Role(&'a str),
    User(&'a str),
}

/// Process-wide invalidation counter
///
/// Starts at zero; a restart implicitly invalidates everything. `advance` must
/// be called only after the mutation it stands for has been committed.
///
/// Per-role and per-user epochs are recorded only in
/// [`InvalidationMode::Scoped`]. They are never pruned: a deleted role's epoch
/// must outlive cached entries that still name it.
#[derive(Debug, Default)]
pub struct EpochClock {
    mode: InvalidationMode,
    global: AtomicU64,
    catalog: AtomicU64,
    roles: DashMap<String, Epoch>,
    users: DashMap<String, Epoch>,
}

impl EpochClock {
    /// Clock that tracks only the global epoch
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mode: InvalidationMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> InvalidationMode {
        self.mode
    }

    /// Current global epoch
    pub fn current(&self) -> Epoch {
        self.global.load(Ordering::Acquire)
    }

    /// Record a committed mutation and return the new global epoch
    pub fn advance(&self, scope: EpochScope<'_>) -> Epoch {
        let epoch = self.global.fetch_add(1, Ordering::AcqRel) + 1;
        if self.mode == InvalidationMode::Global {
            return epoch;
        }

        match scope {
            EpochScope::Catalog => {
                self.catalog.fetch_max(epoch, Ordering::AcqRel);
            }
            EpochScope::Role(name) => {
                self.roles
                    .entry(name.to_string())
                    .and_modify(|e| *e = (*e).max(epoch))
                    .or_insert(epoch);
            }
            EpochScope::User(user_id) => {
                self.users
                    .entry(user_id.to_string())
                    .and_modify(|e| *e = (*e).max(epoch))
                    .or_insert(epoch);
            }
        }

        epoch
    }

    /// Number of role and user epochs being tracked
    pub fn tracked_scopes(&self) -> usize {
        self.roles.len() + self.users.len()
    }

    /// Latest epoch at which the catalog, `user_id`'s override, or any of
    /// `role_names` changed
    pub fn relevant(&self, user_id: &str, role_names: &[String]) -> Epoch {
        let mut epoch = self.catalog.load(Ordering::Acquire);

        if let Some(user) = self.users.get(user_id) {
            epoch = epoch.max(*user);
        }
        for name in role_names {
            if let Some(role) = self.roles.get(name) {
                epoch = epoch.max(*role);
            }
        }

        epoch
    }

    /// Whether a result computed at `stamp` is still current
    pub fn is_fresh(
        &self,
        mode: InvalidationMode,
        stamp: Epoch,
        user_id: &str,
        role_names: &[String],
    ) -> bool {
        match mode {
            InvalidationMode::Global => stamp == self.current(),
            InvalidationMode::Scoped if self.mode == InvalidationMode::Scoped => {
                self.relevant(user_id, role_names) <= stamp
            }
            // Without scoped epochs only the global one is trustworthy
            InvalidationMode::Scoped => stamp == self.current(),
        }
    }
}

/// Cache key type (BLAKE3 hash of user id + sorted role names)
type CacheKey = [u8; 32];

#[derive(Clone)]
struct CachedEntry {
    set: Arc<EffectivePermissionSet>,
    role_names: Vec<String>,
}

/// Memoizes effective permission sets per `(user, sorted roles)`
///
/// Backed by `DashMap` so concurrent readers never block each other.
pub struct ResolutionCache {
    entries: Arc<DashMap<CacheKey, CachedEntry>>,
    clock: Arc<EpochClock>,
    config: CacheConfig,
    stats: Arc<DashMap<&'static str, usize>>,
}

impl ResolutionCache {
    /// Create a cache reading freshness from `clock`
    pub fn new(config: CacheConfig, clock: Arc<EpochClock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
            config,
            stats: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get a cached set if it is still fresh
    pub fn get(&self, user_id: &str, role_names: &[String]) -> Option<Arc<EffectivePermissionSet>> {
        let role_names = normalize_roles(role_names);
        let key = Self::compute_key(user_id, &role_names);

        if let Some(entry) = self.entries.get(&key) {
            let fresh = self.clock.is_fresh(
                self.config.invalidation,
                entry.set.epoch(),
                user_id,
                &entry.role_names,
            );

            if !fresh {
                let stamp = entry.set.epoch();
                drop(entry);
                // Only remove if nobody replaced it meanwhile
                self.entries.remove_if(&key, |_, e| e.set.epoch() == stamp);
                self.increment_stat("stale");
                self.increment_stat("misses");
                debug!("Stale cache entry for user '{}' at epoch {}", user_id, stamp);
                return None;
            }

            self.increment_stat("hits");
            return Some(Arc::clone(&entry.set));
        }

        self.increment_stat("misses");
        None
    }

    /// Store a freshly resolved set
    ///
    /// An existing entry stamped with a newer epoch is kept.
    pub fn put(&self, user_id: &str, role_names: &[String], set: Arc<EffectivePermissionSet>) {
        let role_names = normalize_roles(role_names);
        let key = Self::compute_key(user_id, &role_names);

        if self.entries.len() >= self.config.capacity && !self.entries.contains_key(&key) {
            self.evict();
        }

        self.entries
            .entry(key)
            .and_modify(|existing| {
                if existing.set.epoch() <= set.epoch() {
                    existing.set = Arc::clone(&set);
                }
            })
            .or_insert_with(|| CachedEntry {
                set: Arc::clone(&set),
                role_names,
            });
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
        self.stats.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            stale: self.get_stat("stale"),
            evictions: self.get_stat("evictions"),
            entries: self.entries.len(),
            max_entries: self.config.capacity,
        }
    }

    fn compute_key(user_id: &str, sorted_roles: &[String]) -> CacheKey {
        let mut hasher = Hasher::new();

        // Length prefixes keep ("ab", "c") and ("a", "bc") apart
        hasher.update(&(user_id.len() as u64).to_le_bytes());
        hasher.update(user_id.as_bytes());
        for role in sorted_roles {
            hasher.update(&(role.len() as u64).to_le_bytes());
            hasher.update(role.as_bytes());
        }

        *hasher.finalize().as_bytes()
    }

    /// Drop stale entries first; if still full, drop an arbitrary 10% slice
    fn evict(&self) {
        let before = self.entries.len();
        let clock = &self.clock;
        let mode = self.config.invalidation;

        self.entries.retain(|_, entry| {
            clock.is_fresh(mode, entry.set.epoch(), entry.set.user_id(), &entry.role_names)
        });

        if self.entries.len() >= self.config.capacity {
            let to_remove = (self.config.capacity / 10).max(1);
            let mut removed = 0;
            self.entries.retain(|_, _| {
                if removed < to_remove {
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }

        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            *self.stats.entry("evictions").or_insert(0) += evicted;
        }
    }

    fn increment_stat(&self, key: &'static str) {
        self.stats
            .entry(key)
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    fn get_stat(&self, key: &'static str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

/// Sorted, de-duplicated role names
pub(crate) fn normalize_roles(role_names: &[String]) -> Vec<String> {
    let mut roles = role_names.to_vec();
    roles.sort();
    roles.dedup();
    roles
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    /// Misses caused by an entry whose epoch had been passed
    pub stale: usize,
    pub evictions: usize,
    pub entries: usize,
    pub max_entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
