//! The generic entity record.
//!
//! An entity is an arbitrary JSON object. The core only interprets a handful
//! of reserved top-level fields:
//! - `_id`: the entity identifier
//! - `_kmd`: system metadata ([`Kmd`])
//! - `_acl`: access control data, opaque to the core but always retained by
//!   field projection

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{EntityId, Error, Result, Timestamp};

/// Name of the identifier field.
pub const ID_FIELD: &str = "_id";
/// Name of the system metadata field.
pub const KMD_FIELD: &str = "_kmd";
/// Name of the access control field.
pub const ACL_FIELD: &str = "_acl";

/// System metadata carried under `_kmd`.
///
/// Unknown keys written by the backend are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Kmd {
    /// Entity creation time (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ect: Option<String>,
    /// Last modification time (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lmt: Option<String>,
    /// Set on entities created on this device and not yet confirmed by the backend.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub local: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A structured record stored in a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(Map<String, Value>);

impl Entity {
    /// Creates an empty entity.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builds an entity from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::InvalidEntity(format!(
                "entity must be a JSON object, got {}",
                type_name(&other)
            ))),
        }
    }

    /// Converts the entity back into a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Borrows the underlying field map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Mutably borrows the underlying field map.
    pub fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    /// Returns the entity id, if it has a non-empty string `_id`.
    #[must_use]
    pub fn id(&self) -> Option<EntityId> {
        match self.0.get(ID_FIELD) {
            Some(Value::String(s)) if !s.is_empty() => Some(EntityId::from(s.as_str())),
            _ => None,
        }
    }

    /// Sets `_id`.
    pub fn set_id(&mut self, id: &EntityId) {
        self.0
            .insert(ID_FIELD.to_string(), Value::String(id.as_str().to_string()));
    }

    /// Builder-style variant of [`Entity::set_id`].
    #[must_use]
    pub fn with_id(mut self, id: &EntityId) -> Self {
        self.set_id(id);
        self
    }

    /// Returns a top-level field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Resolves a dotted path (`address.city`, `tags.0`) against the entity.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.0.get(first)?;
        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Inserts a top-level field, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Removes a top-level field.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Parses `_kmd`. A missing or malformed `_kmd` yields `None`.
    #[must_use]
    pub fn kmd(&self) -> Option<Kmd> {
        self.0
            .get(KMD_FIELD)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Replaces `_kmd`.
    pub fn set_kmd(&mut self, kmd: &Kmd) -> Result<()> {
        let value = serde_json::to_value(kmd)?;
        self.0.insert(KMD_FIELD.to_string(), value);
        Ok(())
    }

    /// Whether the entity was created locally and never confirmed by the backend.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.0
            .get(KMD_FIELD)
            .and_then(|kmd| kmd.get("local"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Flags the entity as local-only.
    pub fn mark_local(&mut self) -> Result<()> {
        let mut kmd = self.kmd().unwrap_or_default();
        kmd.local = true;
        self.set_kmd(&kmd)
    }

    /// Stamps `_kmd.lmt` with `now`, and `_kmd.ect` if it is not set yet.
    pub fn touch(&mut self, now: Timestamp) -> Result<()> {
        let mut kmd = self.kmd().unwrap_or_default();
        let stamp = now.to_rfc3339();
        if kmd.ect.is_none() {
            kmd.ect = Some(stamp.clone());
        }
        kmd.lmt = Some(stamp);
        self.set_kmd(&kmd)
    }

    /// Removes the client-generated `_id` and the `_kmd.local` flag so the
    /// entity can be sent to the backend as a fresh create.
    #[must_use]
    pub fn strip_local(mut self) -> Self {
        self.0.remove(ID_FIELD);
        if let Some(Value::Object(kmd)) = self.0.get_mut(KMD_FIELD) {
            kmd.remove("local");
            if kmd.is_empty() {
                self.0.remove(KMD_FIELD);
            }
        }
        self
    }
}

impl From<Map<String, Value>> for Entity {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Entity {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl From<Entity> for Value {
    fn from(entity: Entity) -> Self {
        entity.into_value()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
