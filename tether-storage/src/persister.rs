//! The uniform storage-engine contract.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use tether_types::Entity;

use crate::error::{StorageError, StorageResult};

/// Storage for named entity lists.
///
/// Implementations must surface backend failures as errors and never swallow
/// them. A key that has never been written reads as an empty list.
#[async_trait]
pub trait KeyValuePersister: Send + Sync {
    /// Returns every entity stored under `key`, in stored order.
    async fn read_entities(&self, key: &str) -> StorageResult<Vec<Entity>>;

    /// Replaces the entity list stored under `key`.
    ///
    /// Persisting an empty list removes the key. A list in which two
    /// entities share an `_id` is rejected with [`StorageError::InvalidData`].
    async fn persist_entities(&self, key: &str, entities: Vec<Entity>) -> StorageResult<()>;

    /// Removes everything stored under `key`. Returns whether anything was removed.
    async fn delete_entities(&self, key: &str) -> StorageResult<bool>;

    /// Lists every key that currently holds entities, sorted.
    async fn get_keys(&self) -> StorageResult<Vec<String>>;
}

#[async_trait]
impl<P: KeyValuePersister + ?Sized> KeyValuePersister for Arc<P> {
    async fn read_entities(&self, key: &str) -> StorageResult<Vec<Entity>> {
        (**self).read_entities(key).await
    }

    async fn persist_entities(&self, key: &str, entities: Vec<Entity>) -> StorageResult<()> {
        (**self).persist_entities(key, entities).await
    }

    async fn delete_entities(&self, key: &str) -> StorageResult<bool> {
        (**self).delete_entities(key).await
    }

    async fn get_keys(&self) -> StorageResult<Vec<String>> {
        (**self).get_keys().await
    }
}

/// Rejects lists in which two entities carry the same `_id`.
pub(crate) fn ensure_unique_ids(key: &str, entities: &[Entity]) -> StorageResult<()> {
    let mut seen = HashSet::with_capacity(entities.len());
    for id in entities.iter().filter_map(Entity::id) {
        if !seen.insert(id.clone()) {
            return Err(StorageError::InvalidData(format!(
                "duplicate _id {id} in {key}"
            )));
        }
    }
    Ok(())
}
