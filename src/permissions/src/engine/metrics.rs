//! Prometheus-style metrics for the permission engine

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Engine performance metrics
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// Effective-set queries (cached or computed)
    pub resolutions: u64,

    /// `has_permission` calls
    pub permission_checks: u64,

    /// `has_permission` answers
    pub allowed_checks: u64,
    pub denied_checks: u64,

    /// Cache hits
    pub cache_hits: u64,

    /// Cache misses
    pub cache_misses: u64,

    /// Committed administrative writes
    pub mutations: u64,

    /// Writes rejected with `Conflict`
    pub conflicts: u64,

    /// Latency percentiles for queries
    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,

    /// Average latency
    pub avg_latency_ms: f64,

    /// Errors other than conflicts
    pub error_count: u64,
}

impl EngineMetrics {
    /// Calculate cache hit rate
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Calculate allow rate of permission checks
    pub fn allow_rate(&self) -> f64 {
        let total = self.allowed_checks + self.denied_checks;
        if total == 0 {
            0.0
        } else {
            self.allowed_checks as f64 / total as f64
        }
    }
}

/// Default number of latency samples kept for percentiles
pub const DEFAULT_LATENCY_SAMPLES: usize = 10_000;

/// Metrics collector with Prometheus-compatible export
///
/// Recording is lock-free: counters are atomics and latencies go into a
/// fixed ring of atomic slots. Averages and percentiles are computed only
/// when a snapshot is taken.
pub struct MetricsCollector {
    resolutions: AtomicU64,
    permission_checks: AtomicU64,
    allowed_checks: AtomicU64,
    denied_checks: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    mutations: AtomicU64,
    conflicts: AtomicU64,
    error_count: AtomicU64,

    /// Latency ring in nanoseconds
    latency_samples: Box<[AtomicU64]>,

    /// Total latencies ever recorded; `cursor % len` is the next slot
    latency_cursor: AtomicUsize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LATENCY_SAMPLES)
    }

    /// Collector keeping the most recent `max_samples` latencies
    pub fn with_capacity(max_samples: usize) -> Self {
        Self {
            resolutions: AtomicU64::new(0),
            permission_checks: AtomicU64::new(0),
            allowed_checks: AtomicU64::new(0),
            denied_checks: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            mutations: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            latency_samples: (0..max_samples.max(1)).map(|_| AtomicU64::new(0)).collect(),
            latency_cursor: AtomicUsize::new(0),
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolution(&self) {
        self.resolutions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a `has_permission` answer
    pub fn record_check(&self, allowed: bool) {
        self.permission_checks.fetch_add(1, Ordering::Relaxed);

        if allowed {
            self.allowed_checks.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied_checks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record query latency, overwriting the oldest sample once the ring is full
    pub fn record_latency(&self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        let slot = self.latency_cursor.fetch_add(1, Ordering::Relaxed) % self.latency_samples.len();
        self.latency_samples[slot].store(nanos, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn get_metrics(&self) -> EngineMetrics {
        let mut metrics = EngineMetrics {
            resolutions: self.resolutions.load(Ordering::Relaxed),
            permission_checks: self.permission_checks.load(Ordering::Relaxed),
            allowed_checks: self.allowed_checks.load(Ordering::Relaxed),
            denied_checks: self.denied_checks.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            mutations: self.mutations.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            ..Default::default()
        };

        let mut sorted = self.latency_snapshot_ms();
        if !sorted.is_empty() {
            metrics.avg_latency_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;

            sorted.sort_by(|a, b| a.total_cmp(b));
            metrics.latency_p50_ms = Self::percentile(&sorted, 0.50);
            metrics.latency_p90_ms = Self::percentile(&sorted, 0.90);
            metrics.latency_p99_ms = Self::percentile(&sorted, 0.99);
        }

        metrics
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for counter in [
            &self.resolutions,
            &self.permission_checks,
            &self.allowed_checks,
            &self.denied_checks,
            &self.cache_hits,
            &self.cache_misses,
            &self.mutations,
            &self.conflicts,
            &self.error_count,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.latency_cursor.store(0, Ordering::Relaxed);
    }

    fn latency_snapshot_ms(&self) -> Vec<f64> {
        let filled = self
            .latency_cursor
            .load(Ordering::Relaxed)
            .min(self.latency_samples.len());

        self.latency_samples[..filled]
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed) as f64 / 1_000_000.0)
            .collect()
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let metrics = self.get_metrics();

        format!(
            r#"# HELP permissions_resolutions_total Effective permission set queries
# TYPE permissions_resolutions_total counter
permissions_resolutions_total {}

# HELP permissions_checks_total Permission checks by outcome
# TYPE permissions_checks_total counter
permissions_checks_total{{outcome="allow"}} {}
permissions_checks_total{{outcome="deny"}} {}

# HELP permissions_cache_hits_total Cache hits
# TYPE permissions_cache_hits_total counter
permissions_cache_hits_total {}

# HELP permissions_cache_misses_total Cache misses
# TYPE permissions_cache_misses_total counter
permissions_cache_misses_total {}

# HELP permissions_mutations_total Committed administrative writes
# TYPE permissions_mutations_total counter
permissions_mutations_total {}

# HELP permissions_conflicts_total Writes rejected with a conflict
# TYPE permissions_conflicts_total counter
permissions_conflicts_total {}

# HELP permissions_query_latency_seconds Query latency percentiles
# TYPE permissions_query_latency_seconds summary
permissions_query_latency_seconds{{quantile="0.5"}} {}
permissions_query_latency_seconds{{quantile="0.9"}} {}
permissions_query_latency_seconds{{quantile="0.99"}} {}

# HELP permissions_errors_total Error count
# TYPE permissions_errors_total counter
permissions_errors_total {}
"#,
            metrics.resolutions,
            metrics.allowed_checks,
            metrics.denied_checks,
            metrics.cache_hits,
            metrics.cache_misses,
            metrics.mutations,
            metrics.conflicts,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p90_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
            metrics.error_count,
        )
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        let idx = idx.min(sorted.len() - 1);
        sorted[idx]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
