//! Concurrency and failure-propagation tests
//!
//! Optimistic concurrency must let exactly one of several racing writers win,
//! readers must never fail because of writers, and collaborator outages must
//! surface as `Unavailable` without being cached.

mod common;

use async_trait::async_trait;
use common::{init_tracing, seeded_engine, strings, CATALOG};
use cretoai_permissions::{
    AuthzError, EngineConfig, EngineStores, ErrorKind, InMemoryAssignments, InMemoryRepository,
    OverrideKind, PermissionEngine, Repository, Result, Role, UpdateMode, Version,
};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;

// ============================================================================
// RACING WRITERS
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_role_updates_one_winner() {
    let engine = Arc::new(seeded_engine(EngineConfig::default()).await);
    let role = engine
        .create_role("inspector", "", &strings(&["inspection:read"]), 10)
        .await
        .unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for permission in ["inspection:write", "supplier:read"] {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        let version = role.version;
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine
                .update_role_permissions("inspector", &strings(&[permission]), UpdateMode::Add, version)
                .await
        }));
    }

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(AuthzError::Conflict(_))))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 1);

    let stored = engine.get_role("inspector").await.unwrap();
    assert_eq!(stored.version, role.version + 1);
    assert_eq!(stored.permissions.len(), 2);

    let metrics = engine.get_metrics().unwrap();
    assert_eq!(metrics.conflicts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_writers_same_version() {
    let engine = Arc::new(seeded_engine(EngineConfig::default()).await);
    let role = engine.create_role("buyer", "", &[], 10).await.unwrap();

    let writers = num_cpus::get().max(4) * 2;
    let barrier = Arc::new(Barrier::new(writers));
    let handles: Vec<_> = (0..writers)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            let version = role.version;
            tokio::spawn(async move {
                barrier.wait().await;
                engine.set_role_active("buyer", i % 2 == 0, version).await
            })
        })
        .collect();

    let ok = join_all(handles)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    assert_eq!(ok, 1);
    assert_eq!(engine.get_role("buyer").await.unwrap().version, role.version + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retry_after_conflict_succeeds() {
    let engine = seeded_engine(EngineConfig::default()).await;
    let ov = engine
        .set_user_overrides("u-1", &strings(&["supplier:read"]), OverrideKind::Granted, 0)
        .await
        .unwrap();

    // A second admin writes first
    engine
        .set_user_overrides("u-1", &strings(&["payment:read"]), OverrideKind::Granted, ov.version)
        .await
        .unwrap();

    let err = engine
        .set_user_overrides("u-1", &strings(&["supplier:read"]), OverrideKind::Denied, ov.version)
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    // Re-read and retry
    let fresh = engine.get_user_overrides("u-1").await.unwrap();
    let ov = engine
        .set_user_overrides("u-1", &strings(&["supplier:read"]), OverrideKind::Denied, fresh.version)
        .await
        .unwrap();
    assert_eq!(ov.granted.len(), 1);
    assert_eq!(ov.denied.len(), 1);
}

// ============================================================================
// READERS DURING WRITES
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_fail_during_writes() {
    let engine = Arc::new(seeded_engine(EngineConfig::default()).await);
    let role = engine
        .create_role("inspector", "", &strings(&["inspection:read"]), 10)
        .await
        .unwrap();

    let readers: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let user = format!("u-{}", i % 3);
                let roles = strings(&["inspector"]);
                for _ in 0..200 {
                    engine
                        .has_permission(&user, &roles, "inspection:read")
                        .await
                        .unwrap();
                }
            })
        })
        .collect();

    let writer = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut version: Version = role.version;
            for i in 0..50 {
                let updated = engine
                    .set_role_active("inspector", i % 2 == 1, version)
                    .await
                    .unwrap();
                version = updated.version;
            }
            version
        })
    };

    for reader in readers {
        reader.await.unwrap();
    }
    writer.await.unwrap();

    // Whatever the last toggle was, fresh reads must reflect it
    let roles = strings(&["inspector"]);
    let stored = engine.get_role("inspector").await.unwrap();
    assert_eq!(
        engine.has_permission("u-0", &roles, "inspection:read").await.unwrap(),
        stored.is_active
    );
}

// ============================================================================
// COLLABORATOR FAILURES
// ============================================================================

/// Role repository that can be switched into an outage
struct FlakyRoles {
    inner: InMemoryRepository<Role>,
    down: AtomicBool,
}

impl FlakyRoles {
    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(AuthzError::Unavailable("role store timed out".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Repository<Role> for FlakyRoles {
    async fn load(&self, key: &str) -> Result<Option<Role>> {
        self.check()?;
        self.inner.load(key).await
    }

    async fn list(&self) -> Result<Vec<Role>> {
        self.check()?;
        self.inner.list().await
    }

    async fn save(&self, entity: Role) -> Result<Role> {
        self.check()?;
        self.inner.save(entity).await
    }

    async fn compare_and_swap(&self, entity: Role, expected: Version) -> Result<Role> {
        self.check()?;
        self.inner.compare_and_swap(entity, expected).await
    }

    async fn delete(&self, key: &str, expected: Version) -> Result<()> {
        self.check()?;
        self.inner.delete(key, expected).await
    }
}

#[tokio::test]
async fn test_unavailable_propagates_and_is_not_cached() {
    init_tracing();
    let flaky = Arc::new(FlakyRoles {
        inner: InMemoryRepository::new(),
        down: AtomicBool::new(false),
    });
    let stores = EngineStores {
        roles: flaky.clone(),
        ..EngineStores::in_memory()
    };
    let engine = PermissionEngine::new(EngineConfig::default(), stores).unwrap();
    for (name, category) in CATALOG {
        engine.create_permission(name, "", category).await.unwrap();
    }
    engine
        .create_role("inspector", "", &strings(&["inspection:read"]), 10)
        .await
        .unwrap();
    let roles = strings(&["inspector"]);

    flaky.down.store(true, Ordering::SeqCst);
    let err = engine
        .has_permission("u-1", &roles, "inspection:read")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert!(err.is_retryable());

    let epoch = engine.epoch();
    assert!(engine.create_role("auditor", "", &[], 1).await.is_err());
    assert_eq!(engine.epoch(), epoch, "failed write must not advance the epoch");

    flaky.down.store(false, Ordering::SeqCst);
    assert!(engine.has_permission("u-1", &roles, "inspection:read").await.unwrap());
    assert_eq!(engine.get_cache_stats().unwrap().entries, 1);
}

#[tokio::test]
async fn test_delete_blocked_by_assignment_oracle() {
    init_tracing();
    let assignments = InMemoryAssignments::new();
    let stores = EngineStores::in_memory().with_assignments(Arc::new(assignments.clone()));
    let engine = PermissionEngine::new(EngineConfig::default(), stores).unwrap();

    let role = engine.create_role("viewer", "", &[], 1).await.unwrap();
    assignments.assign("u-1", "viewer").await;
    assert_eq!(assignments.roles_of("u-1").await, vec!["viewer".to_string()]);

    let err = engine.delete_role("viewer", role.version).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    assignments.unassign("u-1", "viewer").await;
    engine.delete_role("viewer", role.version).await.unwrap();
}

#[tokio::test]
async fn test_rename_blocked_by_assignment_oracle() {
    init_tracing();
    let assignments = InMemoryAssignments::new();
    let stores = EngineStores::in_memory().with_assignments(Arc::new(assignments.clone()));
    let engine = PermissionEngine::new(EngineConfig::default(), stores).unwrap();
    engine.create_permission("inspection:read", "", "inspection").await.unwrap();

    let role = engine
        .create_role("inspector", "", &strings(&["inspection:read"]), 10)
        .await
        .unwrap();
    assignments.assign("u-1", "inspector").await;
    let held = assignments.roles_of("u-1").await;
    assert!(engine.has_permission("u-1", &held, "inspection:read").await.unwrap());

    let epoch = engine.epoch();
    let err = engine
        .rename_role("inspector", "field-inspector", role.version)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(!err.is_retryable());
    assert_eq!(engine.epoch(), epoch);

    // The holder keeps access and no copy was left behind
    assert!(engine.has_permission("u-1", &held, "inspection:read").await.unwrap());
    assert_eq!(engine.get_role("field-inspector").await.unwrap_err().kind(), ErrorKind::NotFound);

    assignments.unassign("u-1", "inspector").await;
    let renamed = engine
        .rename_role("inspector", "field-inspector", role.version)
        .await
        .unwrap();
    assert_eq!(renamed.name, "field-inspector");
}
