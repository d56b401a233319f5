//! Collection-oriented CRUD repositories.
//!
//! A [`Repository`] is a stateless facade over one backing store: the local
//! persister ([`OfflineRepository`]) or the backend ([`HttpRepository`]).
//! Processors resolve their repositories through a [`LazyRepository`], which
//! asks a [`RepositoryProvider`] once and memoizes the handle.

mod http;
pub mod mock;
mod offline;

pub use http::HttpRepository;
pub use offline::OfflineRepository;

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

use tether_query::{Aggregation, Query};
use tether_types::{Entity, EntityId};

use crate::error::{SyncError, SyncResult};
use crate::operation::RequestOptions;

/// CRUD over the entities of named collections.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Stores new entities and returns their stored form.
    async fn create(
        &self,
        collection: &str,
        entities: Vec<Entity>,
        options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>>;

    /// Returns the entities matching `query`, or the whole collection.
    async fn read(
        &self,
        collection: &str,
        query: Option<&Query>,
        options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>>;

    /// Fails with [`SyncError::NotFound`] when the entity is absent.
    async fn read_by_id(
        &self,
        collection: &str,
        id: &EntityId,
        options: &RequestOptions,
    ) -> SyncResult<Entity>;

    /// Replaces stored entities. Every entity must carry an `_id`.
    async fn update(
        &self,
        collection: &str,
        entities: Vec<Entity>,
        options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>>;

    /// Removes the entities matching `query` and returns how many went away.
    async fn delete(
        &self,
        collection: &str,
        query: Option<&Query>,
        options: &RequestOptions,
    ) -> SyncResult<usize>;

    /// Removes one entity; returns 0 or 1.
    async fn delete_by_id(
        &self,
        collection: &str,
        id: &EntityId,
        options: &RequestOptions,
    ) -> SyncResult<usize>;

    async fn count(
        &self,
        collection: &str,
        query: Option<&Query>,
        options: &RequestOptions,
    ) -> SyncResult<usize>;

    async fn group(
        &self,
        collection: &str,
        aggregation: &Aggregation,
        options: &RequestOptions,
    ) -> SyncResult<Vec<Value>>;

    /// Removes the entities matching `query`, or the whole collection.
    async fn clear(
        &self,
        collection: &str,
        query: Option<&Query>,
        options: &RequestOptions,
    ) -> SyncResult<usize> {
        self.delete(collection, query, options).await
    }
}

#[async_trait]
impl<R: Repository + ?Sized> Repository for Arc<R> {
    async fn create(
        &self,
        collection: &str,
        entities: Vec<Entity>,
        options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>> {
        (**self).create(collection, entities, options).await
    }

    async fn read(
        &self,
        collection: &str,
        query: Option<&Query>,
        options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>> {
        (**self).read(collection, query, options).await
    }

    async fn read_by_id(
        &self,
        collection: &str,
        id: &EntityId,
        options: &RequestOptions,
    ) -> SyncResult<Entity> {
        (**self).read_by_id(collection, id, options).await
    }

    async fn update(
        &self,
        collection: &str,
        entities: Vec<Entity>,
        options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>> {
        (**self).update(collection, entities, options).await
    }

    async fn delete(
        &self,
        collection: &str,
        query: Option<&Query>,
        options: &RequestOptions,
    ) -> SyncResult<usize> {
        (**self).delete(collection, query, options).await
    }

    async fn delete_by_id(
        &self,
        collection: &str,
        id: &EntityId,
        options: &RequestOptions,
    ) -> SyncResult<usize> {
        (**self).delete_by_id(collection, id, options).await
    }

    async fn count(
        &self,
        collection: &str,
        query: Option<&Query>,
        options: &RequestOptions,
    ) -> SyncResult<usize> {
        (**self).count(collection, query, options).await
    }

    async fn group(
        &self,
        collection: &str,
        aggregation: &Aggregation,
        options: &RequestOptions,
    ) -> SyncResult<Vec<Value>> {
        (**self).group(collection, aggregation, options).await
    }

    async fn clear(
        &self,
        collection: &str,
        query: Option<&Query>,
        options: &RequestOptions,
    ) -> SyncResult<usize> {
        (**self).clear(collection, query, options).await
    }
}

/// Produces a repository on first use.
#[async_trait]
pub trait RepositoryProvider: Send + Sync {
    async fn provide(&self) -> SyncResult<Arc<dyn Repository>>;
}

#[async_trait]
impl<F, Fut> RepositoryProvider for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = SyncResult<Arc<dyn Repository>>> + Send,
{
    async fn provide(&self) -> SyncResult<Arc<dyn Repository>> {
        (self)().await
    }
}

/// A repository handle resolved at most once.
pub struct LazyRepository {
    provider: Option<Box<dyn RepositoryProvider>>,
    cell: OnceCell<Arc<dyn Repository>>,
}

impl LazyRepository {
    /// Defers resolution to `provider`, which runs on the first [`get`](Self::get).
    pub fn new(provider: impl RepositoryProvider + 'static) -> Self {
        Self {
            provider: Some(Box::new(provider)),
            cell: OnceCell::new(),
        }
    }

    /// Wraps an already constructed repository.
    pub fn ready(repository: Arc<dyn Repository>) -> Self {
        Self {
            provider: None,
            cell: OnceCell::new_with(Some(repository)),
        }
    }

    /// Whether the repository has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.cell.initialized()
    }

    /// Returns the repository, resolving it on first call.
    ///
    /// A failed resolution is not memoized; the next call asks the provider again.
    pub async fn get(&self) -> SyncResult<Arc<dyn Repository>> {
        let repository = self
            .cell
            .get_or_try_init(|| async {
                match &self.provider {
                    Some(provider) => provider.provide().await,
                    None => Err(SyncError::InvalidArgument(
                        "no repository provider configured".to_string(),
                    )),
                }
            })
            .await?;
        Ok(Arc::clone(repository))
    }
}

impl<R: Repository + 'static> From<Arc<R>> for LazyRepository {
    fn from(repository: Arc<R>) -> Self {
        Self::ready(repository)
    }
}
