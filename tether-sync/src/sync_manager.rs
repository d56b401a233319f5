//! The pending-mutation log.
//!
//! Every local create, update and delete made by the offline processor leaves
//! a [`SyncEntry`] behind until a push mirrors it to the backend. There is at
//! most one entry per `(collection, entity id)`; a later mutation coalesces
//! into the existing entry according to [`coalesce`].
//!
//! The log is itself stored through the [`KeyValuePersister`] under a
//! reserved key ([`SyncConfig::sync_collection`]), so it survives restarts.

use futures::StreamExt;
use futures::stream;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tether_query::Query;
use tether_storage::KeyValuePersister;
use tether_types::{Entity, EntityId, Timestamp};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::operation::RequestOptions;
use crate::repository::Repository;

/// Kind of a pending mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

/// One pending mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEntry {
    pub collection: String,
    pub entity_id: EntityId,
    pub operation: SyncOperation,
    pub timestamp: Timestamp,
    /// The entity was created on this device and the backend has never seen it.
    #[serde(default)]
    pub local: bool,
}

impl SyncEntry {
    /// Storage key, unique per `(collection, entity id)`.
    fn key(&self) -> String {
        entry_key(&self.collection, &self.entity_id)
    }

    fn to_entity(&self) -> SyncResult<Entity> {
        let mut entity = Entity::from_value(serde_json::to_value(self)?)?;
        entity.set_id(&EntityId::from(self.key()));
        Ok(entity)
    }

    fn from_entity(entity: Entity) -> SyncResult<Self> {
        Ok(serde_json::from_value(entity.into_value())?)
    }
}

fn entry_key(collection: &str, id: &EntityId) -> String {
    format!("{collection}:{id}")
}

/// Merges a new mutation into the pending entry for the same entity.
///
/// Returns the operation the entity should be left with, or `None` when
/// nothing remains to push: a local-only create followed by a delete.
///
/// | pending | incoming | result |
/// |---|---|---|
/// | none | any | incoming |
/// | create | create / update | create |
/// | create | delete | none if local, else delete |
/// | update | create / update | update |
/// | update | delete | delete |
/// | delete | create / update | update |
/// | delete | delete | delete |
pub fn coalesce(pending: Option<&SyncEntry>, incoming: SyncOperation) -> Option<SyncOperation> {
    use SyncOperation::{Create, Delete, Update};

    let Some(pending) = pending else {
        return Some(incoming);
    };

    match (pending.operation, incoming) {
        (Create, Create | Update) => Some(Create),
        (Create, Delete) if pending.local => None,
        (Create, Delete) => Some(Delete),
        (Update, Create | Update) => Some(Update),
        (Update, Delete) => Some(Delete),
        (Delete, Create | Update) => Some(Update),
        (Delete, Delete) => Some(Delete),
    }
}

/// Outcome of replaying one entry during a push.
#[derive(Debug)]
pub struct PushResult {
    pub entity_id: EntityId,
    pub operation: SyncOperation,
    /// The record the backend returned, for creates and updates.
    pub entity: Option<Entity>,
    /// Set when the backend call failed; the entry stays pending.
    pub error: Option<SyncError>,
}

impl PushResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Where a replay failed. Local failures abort a push; remote ones are
/// reported per entry.
enum ReplayError {
    Local(SyncError),
    Remote(SyncError),
}

/// Owns the pending-mutation log.
pub struct SyncManager {
    persister: Arc<dyn KeyValuePersister>,
    config: SyncConfig,
    lock: Mutex<()>,
}

impl SyncManager {
    pub fn new(persister: Arc<dyn KeyValuePersister>, config: SyncConfig) -> Self {
        Self {
            persister,
            config,
            lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    async fn load(&self) -> SyncResult<Vec<SyncEntry>> {
        self.persister
            .read_entities(&self.config.sync_collection)
            .await?
            .into_iter()
            .map(SyncEntry::from_entity)
            .collect()
    }

    async fn save(&self, entries: &[SyncEntry]) -> SyncResult<()> {
        let entities = entries
            .iter()
            .map(SyncEntry::to_entity)
            .collect::<SyncResult<Vec<_>>>()?;
        self.persister
            .persist_entities(&self.config.sync_collection, entities)
            .await?;
        Ok(())
    }

    async fn record(
        &self,
        collection: &str,
        entities: &[Entity],
        operation: SyncOperation,
    ) -> SyncResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        let mut last = entries
            .iter()
            .map(|e| e.timestamp)
            .max()
            .unwrap_or_default();

        for entity in entities {
            let id = entity.id().ok_or_else(|| {
                SyncError::InvalidArgument("sync events require entities with an _id".to_string())
            })?;
            last = last.tick();

            let position = entries
                .iter()
                .position(|e| e.collection == collection && e.entity_id == id);
            let pending = position.map(|i| &entries[i]);

            match (coalesce(pending, operation), position) {
                (Some(merged), Some(i)) => {
                    debug!(
                        "Coalesced {:?} into pending {:?} for {} in {}",
                        operation, entries[i].operation, id, collection
                    );
                    entries[i].operation = merged;
                    entries[i].timestamp = last;
                }
                (Some(merged), None) => entries.push(SyncEntry {
                    collection: collection.to_string(),
                    entity_id: id,
                    operation: merged,
                    timestamp: last,
                    local: entity.is_local(),
                }),
                (None, Some(i)) => {
                    debug!("Dropped pending local create for {} in {}", id, collection);
                    entries.remove(i);
                }
                (None, None) => {}
            }
        }

        self.save(&entries).await
    }

    pub async fn add_create_event(&self, collection: &str, entities: &[Entity]) -> SyncResult<()> {
        self.record(collection, entities, SyncOperation::Create).await
    }

    pub async fn add_update_event(&self, collection: &str, entities: &[Entity]) -> SyncResult<()> {
        self.record(collection, entities, SyncOperation::Update).await
    }

    pub async fn add_delete_event(&self, collection: &str, entities: &[Entity]) -> SyncResult<()> {
        self.record(collection, entities, SyncOperation::Delete).await
    }

    pub async fn add_delete_by_id_event(&self, collection: &str, entity: &Entity) -> SyncResult<()> {
        self.record(collection, std::slice::from_ref(entity), SyncOperation::Delete)
            .await
    }

    /// Drops every pending entry for `id`, in any collection.
    pub async fn remove_sync_item_for_entity_id(&self, id: &EntityId) -> SyncResult<()> {
        self.remove_sync_entities_for_ids(std::slice::from_ref(id))
            .await
            .map(|_| ())
    }

    /// Drops every pending entry for the given ids. Returns how many went away.
    pub async fn remove_sync_entities_for_ids(&self, ids: &[EntityId]) -> SyncResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        let before = entries.len();
        entries.retain(|e| !ids.contains(&e.entity_id));

        let removed = before - entries.len();
        if removed > 0 {
            self.save(&entries).await?;
        }
        Ok(removed)
    }

    /// Number of pending entries for `collection`.
    pub async fn sync_item_count(&self, collection: &str) -> SyncResult<usize> {
        let _guard = self.lock.lock().await;
        Ok(self
            .load()
            .await?
            .iter()
            .filter(|e| e.collection == collection)
            .count())
    }

    /// Pending entries for `collection`, oldest first.
    pub async fn pending_entries(&self, collection: &str) -> SyncResult<Vec<SyncEntry>> {
        let _guard = self.lock.lock().await;
        let mut entries: Vec<SyncEntry> = self
            .load()
            .await?
            .into_iter()
            .filter(|e| e.collection == collection)
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }

    /// Drops pending entries of `collection`.
    ///
    /// `query` is evaluated against the entries themselves (fields
    /// `entityId`, `operation`, `timestamp`, `local`); without it every entry
    /// of the collection is dropped. Returns how many went away.
    pub async fn clear_sync(&self, collection: &str, query: Option<&Query>) -> SyncResult<usize> {
        let _guard = self.lock.lock().await;
        let entries = self.load().await?;

        let in_collection: Vec<Entity> = entries
            .iter()
            .filter(|e| e.collection == collection)
            .map(SyncEntry::to_entity)
            .collect::<SyncResult<_>>()?;
        let doomed: HashSet<EntityId> = match query {
            Some(query) => query.process(in_collection)?,
            None => in_collection,
        }
        .iter()
        .filter_map(Entity::id)
        .collect();

        let before = entries.len();
        let kept: Vec<SyncEntry> = entries
            .into_iter()
            .filter(|e| !doomed.contains(&EntityId::from(e.key())))
            .collect();
        let removed = before - kept.len();

        if removed > 0 {
            self.save(&kept).await?;
        }
        Ok(removed)
    }

    /// Replays the pending entries of `collection` against `network`.
    ///
    /// Entries are replayed concurrently, at most
    /// [`SyncConfig::push_concurrency`] at a time, so `offline` must
    /// serialize its own writes per collection the way
    /// [`OfflineRepository`](crate::OfflineRepository) does. A backend
    /// failure is reported in the entry's [`PushResult`] and leaves the entry
    /// pending; a local storage failure aborts the push.
    pub async fn push(
        &self,
        collection: &str,
        offline: &dyn Repository,
        network: &dyn Repository,
        options: &RequestOptions,
    ) -> SyncResult<Vec<PushResult>> {
        let entries = self.pending_entries(collection).await?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let total = entries.len();

        let outcomes: Vec<SyncResult<PushResult>> = stream::iter(entries)
            .map(|entry| async move {
                match self.replay(&entry, offline, network, options).await {
                    Ok(entity) => Ok(PushResult {
                        entity_id: entry.entity_id,
                        operation: entry.operation,
                        entity,
                        error: None,
                    }),
                    Err(ReplayError::Remote(error)) => {
                        warn!(
                            "Failed to push {:?} of {} in {}: {}",
                            entry.operation, entry.entity_id, collection, error
                        );
                        Ok(PushResult {
                            entity_id: entry.entity_id,
                            operation: entry.operation,
                            entity: None,
                            error: Some(error),
                        })
                    }
                    Err(ReplayError::Local(error)) => Err(error),
                }
            })
            .buffer_unordered(self.config.push_concurrency.max(1))
            .collect()
            .await;

        let results = outcomes.into_iter().collect::<SyncResult<Vec<_>>>()?;
        let pushed = results.iter().filter(|r| r.is_success()).count();
        info!("Pushed {}/{} pending entries for {}", pushed, total, collection);
        Ok(results)
    }

    /// Mirrors the pending entries for `ids` immediately, in order.
    ///
    /// Used by the cache-then-network policy: any failure, local or remote,
    /// is returned to the caller and leaves the remaining entries pending.
    pub(crate) async fn push_ids(
        &self,
        collection: &str,
        ids: &[EntityId],
        offline: &dyn Repository,
        network: &dyn Repository,
        options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>> {
        let entries = self.pending_entries(collection).await?;
        let mut mirrored = Vec::with_capacity(ids.len());

        for id in ids {
            let Some(entry) = entries.iter().find(|e| &e.entity_id == id) else {
                continue;
            };
            match self.replay(entry, offline, network, options).await {
                Ok(Some(entity)) => mirrored.push(entity),
                Ok(None) => {}
                Err(ReplayError::Local(e) | ReplayError::Remote(e)) => return Err(e),
            }
        }
        Ok(mirrored)
    }

    /// Sends one entry to the backend and settles the local state.
    async fn replay(
        &self,
        entry: &SyncEntry,
        offline: &dyn Repository,
        network: &dyn Repository,
        options: &RequestOptions,
    ) -> Result<Option<Entity>, ReplayError> {
        let collection = entry.collection.as_str();
        let id = &entry.entity_id;

        if entry.operation == SyncOperation::Delete {
            if !entry.local {
                match network.delete_by_id(collection, id, options).await {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {
                        debug!("{} already gone from the backend", id);
                    }
                    Err(e) => return Err(ReplayError::Remote(e)),
                }
            }
            self.remove_sync_item_for_entity_id(id)
                .await
                .map_err(ReplayError::Local)?;
            return Ok(None);
        }

        let local = match offline.read_by_id(collection, id, options).await {
            Ok(entity) => entity,
            Err(e) if e.is_not_found() => {
                debug!("Dropping sync entry for {}: no longer stored locally", id);
                self.remove_sync_item_for_entity_id(id)
                    .await
                    .map_err(ReplayError::Local)?;
                return Ok(None);
            }
            Err(e) => return Err(ReplayError::Local(e)),
        };

        let sent = if local.is_local() {
            network.create(collection, vec![local.strip_local()], options).await
        } else if entry.operation == SyncOperation::Create {
            network.create(collection, vec![local], options).await
        } else {
            network.update(collection, vec![local], options).await
        };
        let server = sent
            .map_err(ReplayError::Remote)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ReplayError::Remote(SyncError::Network(format!(
                    "backend returned no entity for {id}"
                )))
            })?;

        let mut settled = vec![id.clone()];
        if let Some(server_id) = server.id().filter(|server_id| server_id != id) {
            offline
                .delete_by_id(collection, id, options)
                .await
                .map_err(ReplayError::Local)?;
            settled.push(server_id);
        }
        offline
            .create(collection, vec![server.clone()], options)
            .await
            .map_err(ReplayError::Local)?;
        self.remove_sync_entities_for_ids(&settled)
            .await
            .map_err(ReplayError::Local)?;

        Ok(Some(server))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SyncOperation::{Create, Delete, Update};

    fn pending(operation: SyncOperation, local: bool) -> SyncEntry {
        SyncEntry {
            collection: "notes".into(),
            entity_id: "n1".into(),
            operation,
            timestamp: Timestamp::from_millis(1),
            local,
        }
    }

    #[test]
    fn coalesce_table() {
        assert_eq!(coalesce(None, Update), Some(Update));
        assert_eq!(coalesce(Some(&pending(Create, true)), Update), Some(Create));
        assert_eq!(coalesce(Some(&pending(Create, true)), Delete), None);
        assert_eq!(coalesce(Some(&pending(Create, false)), Delete), Some(Delete));
        assert_eq!(coalesce(Some(&pending(Update, false)), Update), Some(Update));
        assert_eq!(coalesce(Some(&pending(Update, false)), Delete), Some(Delete));
        assert_eq!(coalesce(Some(&pending(Delete, false)), Create), Some(Update));
        assert_eq!(coalesce(Some(&pending(Delete, false)), Delete), Some(Delete));
    }

    #[test]
    fn entries_survive_entity_encoding() {
        let entry = pending(Update, false);
        let entity = entry.to_entity().unwrap();
        assert_eq!(entity.id(), Some(EntityId::from("notes:n1")));
        assert_eq!(entity.get("entityId"), Some(&serde_json::json!("n1")));
        assert_eq!(SyncEntry::from_entity(entity).unwrap(), entry);
    }
}
