//! Data processors: one logical operation, one data-access policy.
//!
//! [`DataProcessor::process`] validates an [`Operation`] and dispatches on its
//! kind with an exhaustive match. Each `process_*` method has a default that
//! resolves [`DataProcessor::repository`] and delegates to it, so a
//! pass-through policy only has to say which repository it uses.
//!
//! - [`NetworkDataProcessor`]: everything goes to the backend.
//! - [`OfflineDataProcessor`]: everything stays local; mutations are logged
//!   for a later push.
//! - [`CacheOfflineDataProcessor`]: reads answer from the local store first
//!   and then from the backend; writes are mirrored to the backend at once.

mod cache_offline;
mod network;
mod offline;

pub use cache_offline::CacheOfflineDataProcessor;
pub use network::NetworkDataProcessor;
pub use offline::OfflineDataProcessor;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use tether_query::{Aggregation, Query};
use tether_types::{Entity, EntityId};

use crate::error::SyncResult;
use crate::operation::{Operation, OperationKind, OperationResult, RequestOptions};
use crate::repository::Repository;

/// What a processor hands back.
#[derive(Debug)]
pub enum ProcessOutput {
    /// One final value.
    Single(OperationResult),
    /// A cache value now and a network value later.
    Staged(TwoPhase),
}

impl ProcessOutput {
    /// The authoritative value: the single value, or the network phase.
    pub async fn into_final(self) -> SyncResult<OperationResult> {
        match self {
            Self::Single(result) => Ok(result),
            Self::Staged(staged) => staged.network().await,
        }
    }

    /// Every value in emission order.
    pub fn into_stream(self) -> BoxStream<'static, Phase> {
        match self {
            Self::Single(result) => stream::once(async move { Phase::Network(Ok(result)) }).boxed(),
            Self::Staged(staged) => staged.into_stream(),
        }
    }
}

/// One emission of a staged result.
#[derive(Debug)]
pub enum Phase {
    Cache(OperationResult),
    Network(SyncResult<OperationResult>),
}

/// A cache-then-network result.
///
/// The cache value is available immediately. The network value is computed
/// lazily when awaited. A failed network phase does not retract the cache
/// value that was already handed out.
pub struct TwoPhase {
    cache: OperationResult,
    network: BoxFuture<'static, SyncResult<OperationResult>>,
}

impl TwoPhase {
    pub fn new(
        cache: OperationResult,
        network: BoxFuture<'static, SyncResult<OperationResult>>,
    ) -> Self {
        Self { cache, network }
    }

    /// The value read from the local store.
    pub fn cache(&self) -> &OperationResult {
        &self.cache
    }

    /// Runs the network phase and returns its result.
    pub async fn network(self) -> SyncResult<OperationResult> {
        self.network.await
    }

    /// Splits into the cache value and the pending network phase.
    pub fn into_parts(self) -> (OperationResult, BoxFuture<'static, SyncResult<OperationResult>>) {
        (self.cache, self.network)
    }

    /// Exactly two items: the cache value, then the network result.
    pub fn into_stream(self) -> BoxStream<'static, Phase> {
        let (cache, network) = self.into_parts();
        stream::once(async move { Phase::Cache(cache) })
            .chain(stream::once(network.map(Phase::Network)))
            .boxed()
    }
}

impl fmt::Debug for TwoPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwoPhase")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

fn single(result: OperationResult) -> SyncResult<ProcessOutput> {
    Ok(ProcessOutput::Single(result))
}

/// Executes operations under one data-access policy.
#[async_trait]
pub trait DataProcessor: Send + Sync {
    /// The repository the pass-through defaults delegate to.
    async fn repository(&self) -> SyncResult<Arc<dyn Repository>>;

    /// Validates and dispatches one operation.
    async fn process(&self, operation: Operation) -> SyncResult<ProcessOutput> {
        operation.validate()?;
        debug!(
            "Processing {} on {}",
            operation.kind.name(),
            operation.collection
        );

        let Operation {
            collection,
            kind,
            options,
        } = operation;
        let collection = collection.as_str();
        let options = &options;

        match kind {
            OperationKind::Create(entities) => {
                self.process_create(collection, entities, options).await
            }
            OperationKind::Read(query) => {
                self.process_read(collection, query, options).await
            }
            OperationKind::ReadById(id) => {
                self.process_read_by_id(collection, id, options).await
            }
            OperationKind::Update(entities) => {
                self.process_update(collection, entities, options).await
            }
            OperationKind::Delete(query) => {
                self.process_delete(collection, query, options).await
            }
            OperationKind::DeleteById(id) => {
                self.process_delete_by_id(collection, id, options).await
            }
            OperationKind::Count(query) => {
                self.process_count(collection, query, options).await
            }
            OperationKind::Clear(query) => {
                self.process_clear(collection, query, options).await
            }
            OperationKind::Group(aggregation) => {
                self.process_group(collection, aggregation, options).await
            }
        }
    }

    async fn process_create(
        &self,
        collection: &str,
        entities: Vec<Entity>,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        let repository = self.repository().await?;
        single(OperationResult::Entities(
            repository.create(collection, entities, options).await?,
        ))
    }

    async fn process_read(
        &self,
        collection: &str,
        query: Option<Query>,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        let repository = self.repository().await?;
        single(OperationResult::Entities(
            repository.read(collection, query.as_ref(), options).await?,
        ))
    }

    async fn process_read_by_id(
        &self,
        collection: &str,
        id: EntityId,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        let repository = self.repository().await?;
        single(OperationResult::Entity(Some(
            repository.read_by_id(collection, &id, options).await?,
        )))
    }

    async fn process_update(
        &self,
        collection: &str,
        entities: Vec<Entity>,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        let repository = self.repository().await?;
        single(OperationResult::Entities(
            repository.update(collection, entities, options).await?,
        ))
    }

    async fn process_delete(
        &self,
        collection: &str,
        query: Option<Query>,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        let repository = self.repository().await?;
        single(OperationResult::Count(
            repository.delete(collection, query.as_ref(), options).await?,
        ))
    }

    async fn process_delete_by_id(
        &self,
        collection: &str,
        id: EntityId,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        let repository = self.repository().await?;
        single(OperationResult::Count(
            repository.delete_by_id(collection, &id, options).await?,
        ))
    }

    async fn process_count(
        &self,
        collection: &str,
        query: Option<Query>,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        let repository = self.repository().await?;
        single(OperationResult::Count(
            repository.count(collection, query.as_ref(), options).await?,
        ))
    }

    async fn process_clear(
        &self,
        collection: &str,
        query: Option<Query>,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        let repository = self.repository().await?;
        single(OperationResult::Count(
            repository.clear(collection, query.as_ref(), options).await?,
        ))
    }

    async fn process_group(
        &self,
        collection: &str,
        aggregation: Aggregation,
        options: &RequestOptions,
    ) -> SyncResult<ProcessOutput> {
        let repository = self.repository().await?;
        single(OperationResult::Groups(
            repository.group(collection, &aggregation, options).await?,
        ))
    }
}
