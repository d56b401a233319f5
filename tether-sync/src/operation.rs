//! Operation descriptors dispatched by data processors.

use serde_json::Value;
use std::time::Duration;

use tether_query::{Aggregation, Query};
use tether_types::{Entity, EntityId};

use crate::error::{SyncError, SyncResult};

/// Per-request transport options. Offline repositories ignore them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Overrides the configured network timeout.
    pub timeout: Option<Duration>,
    /// Extra headers sent with the request.
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// The requested action and its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationKind {
    Create(Vec<Entity>),
    Read(Option<Query>),
    ReadById(EntityId),
    Update(Vec<Entity>),
    Delete(Option<Query>),
    DeleteById(EntityId),
    Count(Option<Query>),
    Clear(Option<Query>),
    Group(Aggregation),
}

impl OperationKind {
    /// Lowercase name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Read(_) => "read",
            Self::ReadById(_) => "read by id",
            Self::Update(_) => "update",
            Self::Delete(_) => "delete",
            Self::DeleteById(_) => "delete by id",
            Self::Count(_) => "count",
            Self::Clear(_) => "clear",
            Self::Group(_) => "group",
        }
    }
}

/// One logical request against a collection. Consumed by
/// [`DataProcessor::process`](crate::DataProcessor::process).
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub collection: String,
    pub kind: OperationKind,
    pub options: RequestOptions,
}

impl Operation {
    pub fn new(collection: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            collection: collection.into(),
            kind,
            options: RequestOptions::default(),
        }
    }

    pub fn create(collection: impl Into<String>, entities: Vec<Entity>) -> Self {
        Self::new(collection, OperationKind::Create(entities))
    }

    pub fn read(collection: impl Into<String>, query: Option<Query>) -> Self {
        Self::new(collection, OperationKind::Read(query))
    }

    pub fn read_by_id(collection: impl Into<String>, id: impl Into<EntityId>) -> Self {
        Self::new(collection, OperationKind::ReadById(id.into()))
    }

    pub fn update(collection: impl Into<String>, entities: Vec<Entity>) -> Self {
        Self::new(collection, OperationKind::Update(entities))
    }

    pub fn delete(collection: impl Into<String>, query: Option<Query>) -> Self {
        Self::new(collection, OperationKind::Delete(query))
    }

    pub fn delete_by_id(collection: impl Into<String>, id: impl Into<EntityId>) -> Self {
        Self::new(collection, OperationKind::DeleteById(id.into()))
    }

    pub fn count(collection: impl Into<String>, query: Option<Query>) -> Self {
        Self::new(collection, OperationKind::Count(query))
    }

    pub fn clear(collection: impl Into<String>, query: Option<Query>) -> Self {
        Self::new(collection, OperationKind::Clear(query))
    }

    pub fn group(collection: impl Into<String>, aggregation: Aggregation) -> Self {
        Self::new(collection, OperationKind::Group(aggregation))
    }

    #[must_use]
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Rejects malformed operations before any I/O happens.
    pub fn validate(&self) -> SyncResult<()> {
        if self.collection.is_empty() {
            return Err(SyncError::InvalidArgument(
                "a collection name is required".to_string(),
            ));
        }

        match &self.kind {
            OperationKind::Create(entities) if entities.is_empty() => Err(
                SyncError::InvalidArgument("entities array required for create".to_string()),
            ),
            OperationKind::Update(entities) if entities.is_empty() => Err(
                SyncError::InvalidArgument("entities array required for update".to_string()),
            ),
            OperationKind::Update(entities) if entities.iter().any(|e| e.id().is_none()) => {
                Err(SyncError::InvalidArgument(
                    "every updated entity must carry an _id".to_string(),
                ))
            }
            OperationKind::ReadById(id) | OperationKind::DeleteById(id) if id.as_str().is_empty() => {
                Err(SyncError::InvalidArgument("an entity id is required".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// The value an operation produces.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    /// Create, read and update results.
    Entities(Vec<Entity>),
    /// Read-by-id result. `None` only for a cache-phase miss.
    Entity(Option<Entity>),
    /// Delete, delete-by-id, count and clear results.
    Count(usize),
    /// Aggregation groups.
    Groups(Vec<Value>),
}

impl OperationResult {
    fn kind(&self) -> &'static str {
        match self {
            Self::Entities(_) => "entities",
            Self::Entity(_) => "entity",
            Self::Count(_) => "count",
            Self::Groups(_) => "groups",
        }
    }

    fn mismatch(&self, expected: &str) -> SyncError {
        SyncError::InvalidArgument(format!("expected {expected} result, got {}", self.kind()))
    }

    pub fn into_entities(self) -> SyncResult<Vec<Entity>> {
        match self {
            Self::Entities(entities) => Ok(entities),
            other => Err(other.mismatch("entities")),
        }
    }

    pub fn into_entity(self) -> SyncResult<Option<Entity>> {
        match self {
            Self::Entity(entity) => Ok(entity),
            other => Err(other.mismatch("entity")),
        }
    }

    pub fn into_count(self) -> SyncResult<usize> {
        match self {
            Self::Count(count) => Ok(count),
            other => Err(other.mismatch("count")),
        }
    }

    pub fn into_groups(self) -> SyncResult<Vec<Value>> {
        match self {
            Self::Groups(groups) => Ok(groups),
            other => Err(other.mismatch("groups")),
        }
    }
}
