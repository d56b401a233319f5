//! In-memory storage engine.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

use tether_types::Entity;

use crate::error::{StorageError, StorageResult};
use crate::persister::{KeyValuePersister, ensure_unique_ids};

/// Keeps entity lists in a process-local map.
#[derive(Debug, Default)]
pub struct MemoryPersister {
    collections: RwLock<BTreeMap<String, Vec<Entity>>>,
}

impl MemoryPersister {
    /// Creates an empty persister.
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StorageError {
    StorageError::Lock("memory persister".to_string())
}

#[async_trait]
impl KeyValuePersister for MemoryPersister {
    async fn read_entities(&self, key: &str) -> StorageResult<Vec<Entity>> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(collections.get(key).cloned().unwrap_or_default())
    }

    async fn persist_entities(&self, key: &str, entities: Vec<Entity>) -> StorageResult<()> {
        ensure_unique_ids(key, &entities)?;
        let mut collections = self.collections.write().map_err(poisoned)?;
        if entities.is_empty() {
            collections.remove(key);
        } else {
            collections.insert(key.to_string(), entities);
        }
        Ok(())
    }

    async fn delete_entities(&self, key: &str) -> StorageResult<bool> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        Ok(collections.remove(key).is_some())
    }

    async fn get_keys(&self) -> StorageResult<Vec<String>> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(collections.keys().cloned().collect())
    }
}
