//! Shared fixtures for integration tests

#![allow(dead_code)]

use cretoai_permissions::{EngineConfig, PermissionEngine};
use std::sync::Once;

static INIT: Once = Once::new();

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Catalog used across the suite
pub const CATALOG: &[(&str, &str)] = &[
    ("*", "*"),
    ("inspection:read", "inspection"),
    ("inspection:write", "inspection"),
    ("inspection:*", "inspection"),
    ("supplier:read", "supplier"),
    ("supplier:manage", "supplier"),
    ("payment:approve", "payment"),
    ("payment:read", "payment"),
];

/// Engine with [`CATALOG`] registered
pub async fn seeded_engine(config: EngineConfig) -> PermissionEngine {
    init_tracing();
    let engine = PermissionEngine::in_memory(config).unwrap();
    for (name, category) in CATALOG {
        engine
            .create_permission(name, &format!("{} permission", name), category)
            .await
            .unwrap();
    }
    engine
}
