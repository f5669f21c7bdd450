//! In-memory repository implementation

use super::{Entity, Repository};
use crate::error::{AuthzError, Result};
use crate::types::Version;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory repository backed by a `RwLock<HashMap>`
///
/// Each write holds the lock only for the version check and the insert, which
/// makes compare-and-swap linearizable per key.
pub struct InMemoryRepository<T: Entity> {
    records: Arc<RwLock<HashMap<String, T>>>,
}

impl<T: Entity> InMemoryRepository<T> {
    /// Create an empty repository
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl<T: Entity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> Clone for InMemoryRepository<T> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    async fn load(&self, key: &str) -> Result<Option<T>> {
        let records = self.records.read().await;
        Ok(records.get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<T>> {
        let records = self.records.read().await;
        Ok(records.values().cloned().collect())
    }

    async fn save(&self, mut entity: T) -> Result<T> {
        let mut records = self.records.write().await;
        if records.contains_key(entity.key()) {
            return Err(AuthzError::Conflict(format!(
                "{} '{}' already exists",
                T::KIND,
                entity.key()
            )));
        }

        entity.set_version(1);
        records.insert(entity.key().to_string(), entity.clone());
        Ok(entity)
    }

    async fn compare_and_swap(&self, mut entity: T, expected: Version) -> Result<T> {
        let mut records = self.records.write().await;
        let current = records.get(entity.key()).map(|e| e.version()).unwrap_or(0);

        if current != expected {
            return Err(AuthzError::stale_version(
                format!("{} '{}'", T::KIND, entity.key()),
                expected,
                current,
            ));
        }

        entity.set_version(expected + 1);
        records.insert(entity.key().to_string(), entity.clone());
        Ok(entity)
    }

    async fn delete(&self, key: &str, expected: Version) -> Result<()> {
        let mut records = self.records.write().await;
        let current = match records.get(key) {
            Some(entity) => entity.version(),
            None => {
                return Err(AuthzError::NotFound(format!("{} '{}'", T::KIND, key)));
            }
        };

        if current != expected {
            return Err(AuthzError::stale_version(
                format!("{} '{}'", T::KIND, key),
                expected,
                current,
            ));
        }

        records.remove(key);
        Ok(())
    }
}
