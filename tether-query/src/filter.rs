//! Filter predicate trees.
//!
//! A [`Filter`] is a tree of logical combinators over per-field
//! [`Condition`]s. It is parsed from and rendered back to the Mongo-style JSON
//! expression used on the wire:
//!
//! ```json
//! {"age": {"$gte": 18}, "$or": [{"name": "a"}, {"name": {"$regex": "^b", "$options": "i"}}]}
//! ```

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};
use std::cmp::Ordering;
use std::fmt;

use tether_types::Entity;

use crate::error::{QueryError, QueryResult};
use crate::sort::compare_values;

/// A compiled `$regex` condition.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    options: String,
    regex: Regex,
}

impl Pattern {
    /// Compiles a pattern. Supported options: `i`, `m`, `s`, `x`.
    pub fn new(source: &str, options: &str) -> QueryResult<Self> {
        let mut builder = RegexBuilder::new(source);
        for flag in options.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                other => {
                    return Err(QueryError::InvalidFilter(format!(
                        "unsupported regex option '{other}'"
                    )));
                }
            };
        }
        Ok(Self {
            source: source.to_string(),
            options: options.to_string(),
            regex: builder.build()?,
        })
    }

    /// The pattern source.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The option flags.
    #[must_use]
    pub fn options(&self) -> &str {
        &self.options
    }

    /// Whether `text` matches.
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pattern")
            .field("source", &self.source)
            .field("options", &self.options)
            .finish()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.options == other.options
    }
}

/// A condition applied to the value at one field path.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    /// Field equals any of the values.
    In(Vec<Value>),
    /// Field equals none of the values.
    Nin(Vec<Value>),
    /// Array field contains every value.
    All(Vec<Value>),
    Exists(bool),
    /// Array field has exactly this many elements.
    Size(usize),
    Regex(Pattern),
    /// `[lng, lat]` point within `max_distance` radians. Backend only.
    NearSphere {
        point: [f64; 2],
        max_distance: Option<f64>,
    },
    /// `[lng, lat]` point inside the box spanned by two corners.
    WithinBox {
        bottom_left: [f64; 2],
        upper_right: [f64; 2],
    },
}

/// A predicate tree over entities.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// All children match. An empty `And` matches everything.
    And(Vec<Filter>),
    /// At least one child matches.
    Or(Vec<Filter>),
    /// No child matches.
    Nor(Vec<Filter>),
    /// Every condition holds for the value at `path`.
    Field {
        path: String,
        conditions: Vec<Condition>,
    },
}

impl Default for Filter {
    fn default() -> Self {
        Self::And(Vec::new())
    }
}

impl Filter {
    /// A filter that matches every entity.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Shorthand for a single-condition field filter.
    #[must_use]
    pub fn field(path: impl Into<String>, condition: Condition) -> Self {
        Self::Field {
            path: path.into(),
            conditions: vec![condition],
        }
    }

    /// Whether this filter matches everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::And(children) if children.iter().all(Self::is_empty))
    }

    /// Whether every operator in the tree can be evaluated locally.
    #[must_use]
    pub fn is_supported_offline(&self) -> bool {
        match self {
            Self::And(children) | Self::Or(children) | Self::Nor(children) => {
                children.iter().all(Self::is_supported_offline)
            }
            Self::Field { conditions, .. } => !conditions
                .iter()
                .any(|c| matches!(c, Condition::NearSphere { .. })),
        }
    }

    /// Evaluates the filter against one entity.
    #[must_use]
    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            Self::And(children) => children.iter().all(|f| f.matches(entity)),
            Self::Or(children) => children.iter().any(|f| f.matches(entity)),
            Self::Nor(children) => !children.iter().any(|f| f.matches(entity)),
            Self::Field { path, conditions } => {
                let value = entity.get_path(path);
                conditions.iter().all(|c| condition_matches(c, value))
            }
        }
    }

    // ── JSON translation ─────────────────────────────────────────

    /// Parses a Mongo-style filter expression.
    pub fn parse(value: &Value) -> QueryResult<Self> {
        let Value::Object(map) = value else {
            return Err(QueryError::InvalidFilter(
                "filter must be a JSON object".to_string(),
            ));
        };

        let mut children = Vec::with_capacity(map.len());
        for (key, value) in map {
            let child = match key.as_str() {
                "$and" => Self::And(parse_filter_list(key, value)?),
                "$or" => Self::Or(parse_filter_list(key, value)?),
                "$nor" => Self::Nor(parse_filter_list(key, value)?),
                op if op.starts_with('$') => {
                    return Err(QueryError::UnsupportedOperator(op.to_string()));
                }
                path => Self::Field {
                    path: path.to_string(),
                    conditions: parse_conditions(value)?,
                },
            };
            children.push(child);
        }

        if children.len() == 1 {
            Ok(children.remove(0))
        } else {
            Ok(Self::And(children))
        }
    }

    /// Renders the filter as a Mongo-style expression.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::And(children) => {
                if let Some(merged) = merge_field_children(children) {
                    Value::Object(merged)
                } else {
                    json!({ "$and": children.iter().map(Self::to_value).collect::<Vec<_>>() })
                }
            }
            Self::Or(children) => {
                json!({ "$or": children.iter().map(Self::to_value).collect::<Vec<_>>() })
            }
            Self::Nor(children) => {
                json!({ "$nor": children.iter().map(Self::to_value).collect::<Vec<_>>() })
            }
            Self::Field { path, conditions } => {
                let mut map = Map::new();
                map.insert(path.clone(), conditions_to_value(conditions));
                Value::Object(map)
            }
        }
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::parse(&value).map_err(serde::de::Error::custom)
    }
}

/// Flattens an `And` of field filters with distinct paths into one object.
fn merge_field_children(children: &[Filter]) -> Option<Map<String, Value>> {
    let mut merged = Map::new();
    for child in children {
        match child {
            Filter::Field { path, conditions } if !merged.contains_key(path) => {
                merged.insert(path.clone(), conditions_to_value(conditions));
            }
            Filter::And(inner) if inner.is_empty() => {}
            _ => return None,
        }
    }
    Some(merged)
}

fn parse_filter_list(op: &str, value: &Value) -> QueryResult<Vec<Filter>> {
    let Value::Array(items) = value else {
        return Err(QueryError::InvalidFilter(format!("{op} expects an array")));
    };
    items.iter().map(Filter::parse).collect()
}

fn is_operator_object(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn parse_conditions(value: &Value) -> QueryResult<Vec<Condition>> {
    let map = match value {
        Value::Object(map) if is_operator_object(map) => map,
        other => return Ok(vec![Condition::Eq(other.clone())]),
    };

    let mut conditions = Vec::with_capacity(map.len());
    for (op, operand) in map {
        let condition = match op.as_str() {
            "$eq" => Condition::Eq(operand.clone()),
            "$ne" => Condition::Ne(operand.clone()),
            "$gt" => Condition::Gt(operand.clone()),
            "$gte" => Condition::Gte(operand.clone()),
            "$lt" => Condition::Lt(operand.clone()),
            "$lte" => Condition::Lte(operand.clone()),
            "$in" => Condition::In(expect_array(op, operand)?),
            "$nin" => Condition::Nin(expect_array(op, operand)?),
            "$all" => Condition::All(expect_array(op, operand)?),
            "$exists" => Condition::Exists(operand.as_bool().ok_or_else(|| {
                QueryError::InvalidFilter("$exists expects a boolean".to_string())
            })?),
            "$size" => Condition::Size(
                operand
                    .as_u64()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| {
                        QueryError::InvalidFilter("$size expects a non-negative integer".to_string())
                    })?,
            ),
            "$regex" => {
                let source = operand.as_str().ok_or_else(|| {
                    QueryError::InvalidFilter("$regex expects a string".to_string())
                })?;
                let options = map.get("$options").and_then(Value::as_str).unwrap_or("");
                Condition::Regex(Pattern::new(source, options)?)
            }
            "$nearSphere" => Condition::NearSphere {
                point: expect_point(op, operand)?,
                max_distance: map.get("$maxDistance").and_then(Value::as_f64),
            },
            "$geoWithin" => parse_geo_within(operand)?,
            // Consumed together with their primary operator above.
            "$options" | "$maxDistance" => continue,
            other => return Err(QueryError::UnsupportedOperator(other.to_string())),
        };
        conditions.push(condition);
    }
    Ok(conditions)
}

fn parse_geo_within(operand: &Value) -> QueryResult<Condition> {
    let corners = operand
        .get("$box")
        .and_then(Value::as_array)
        .filter(|corners| corners.len() == 2)
        .ok_or_else(|| QueryError::UnsupportedOperator("$geoWithin without $box".to_string()))?;
    Ok(Condition::WithinBox {
        bottom_left: expect_point("$box", &corners[0])?,
        upper_right: expect_point("$box", &corners[1])?,
    })
}

fn expect_array(op: &str, value: &Value) -> QueryResult<Vec<Value>> {
    value
        .as_array()
        .cloned()
        .ok_or_else(|| QueryError::InvalidFilter(format!("{op} expects an array")))
}

fn expect_point(op: &str, value: &Value) -> QueryResult<[f64; 2]> {
    point_of(value).ok_or_else(|| {
        QueryError::InvalidFilter(format!("{op} expects a [longitude, latitude] pair"))
    })
}

fn point_of(value: &Value) -> Option<[f64; 2]> {
    match value.as_array()?.as_slice() {
        [lng, lat] => Some([lng.as_f64()?, lat.as_f64()?]),
        _ => None,
    }
}

fn conditions_to_value(conditions: &[Condition]) -> Value {
    if let [Condition::Eq(v)] = conditions {
        let plain = !matches!(v, Value::Object(m) if is_operator_object(m));
        if plain {
            return v.clone();
        }
    }

    let mut map = Map::new();
    for condition in conditions {
        match condition {
            Condition::Eq(v) => insert(&mut map, "$eq", v.clone()),
            Condition::Ne(v) => insert(&mut map, "$ne", v.clone()),
            Condition::Gt(v) => insert(&mut map, "$gt", v.clone()),
            Condition::Gte(v) => insert(&mut map, "$gte", v.clone()),
            Condition::Lt(v) => insert(&mut map, "$lt", v.clone()),
            Condition::Lte(v) => insert(&mut map, "$lte", v.clone()),
            Condition::In(vs) => insert(&mut map, "$in", Value::Array(vs.clone())),
            Condition::Nin(vs) => insert(&mut map, "$nin", Value::Array(vs.clone())),
            Condition::All(vs) => insert(&mut map, "$all", Value::Array(vs.clone())),
            Condition::Exists(b) => insert(&mut map, "$exists", Value::Bool(*b)),
            Condition::Size(n) => insert(&mut map, "$size", json!(n)),
            Condition::Regex(p) => {
                insert(&mut map, "$regex", Value::String(p.source.clone()));
                if !p.options.is_empty() {
                    insert(&mut map, "$options", Value::String(p.options.clone()));
                }
            }
            Condition::NearSphere {
                point,
                max_distance,
            } => {
                insert(&mut map, "$nearSphere", json!(point));
                if let Some(d) = max_distance {
                    insert(&mut map, "$maxDistance", json!(d));
                }
            }
            Condition::WithinBox {
                bottom_left,
                upper_right,
            } => insert(
                &mut map,
                "$geoWithin",
                json!({ "$box": [bottom_left, upper_right] }),
            ),
        }
    }
    Value::Object(map)
}

fn insert(map: &mut Map<String, Value>, key: &str, value: Value) {
    map.insert(key.to_string(), value);
}

// ── Evaluation ───────────────────────────────────────────────────

/// JSON equality with numeric comparison across integer/float forms.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Ordering::Equal,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

/// Equality where an array field matches if it equals the operand or any
/// element does; `null` matches a missing field.
fn field_equals(field: Option<&Value>, operand: &Value) -> bool {
    match field {
        None => operand.is_null(),
        Some(value) => {
            values_equal(value, operand)
                || matches!(value, Value::Array(items) if items.iter().any(|i| values_equal(i, operand)))
        }
    }
}

/// Applies a range check to a scalar or to any element of an array field.
fn field_compares(field: Option<&Value>, operand: &Value, accept: fn(Ordering) -> bool) -> bool {
    let check = |value: &Value| comparable(value, operand) && accept(compare_values(value, operand));
    match field {
        None => false,
        Some(Value::Array(items)) if !operand.is_array() => items.iter().any(check),
        Some(value) => check(value),
    }
}

/// Range operators only compare values of the same kind.
fn comparable(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Bool(_), Value::Bool(_))
            | (Value::Array(_), Value::Array(_))
    )
}

fn condition_matches(condition: &Condition, field: Option<&Value>) -> bool {
    match condition {
        Condition::Eq(v) => field_equals(field, v),
        Condition::Ne(v) => !field_equals(field, v),
        Condition::Gt(v) => field_compares(field, v, Ordering::is_gt),
        Condition::Gte(v) => field_compares(field, v, Ordering::is_ge),
        Condition::Lt(v) => field_compares(field, v, Ordering::is_lt),
        Condition::Lte(v) => field_compares(field, v, Ordering::is_le),
        Condition::In(vs) => vs.iter().any(|v| field_equals(field, v)),
        Condition::Nin(vs) => !vs.iter().any(|v| field_equals(field, v)),
        Condition::All(vs) => match field {
            Some(Value::Array(items)) => vs
                .iter()
                .all(|v| items.iter().any(|item| values_equal(item, v))),
            _ => false,
        },
        Condition::Exists(expected) => field.is_some() == *expected,
        Condition::Size(n) => matches!(field, Some(Value::Array(items)) if items.len() == *n),
        Condition::Regex(pattern) => match field {
            Some(Value::String(s)) => pattern.is_match(s),
            Some(Value::Array(items)) => items
                .iter()
                .any(|i| i.as_str().is_some_and(|s| pattern.is_match(s))),
            _ => false,
        },
        Condition::WithinBox {
            bottom_left,
            upper_right,
        } => field.and_then(point_of).is_some_and(|[lng, lat]| {
            lng >= bottom_left[0]
                && lng <= upper_right[0]
                && lat >= bottom_left[1]
                && lat <= upper_right[1]
        }),
        // Never reached through `Query::process`, which rejects these first.
        Condition::NearSphere { .. } => false,
    }
}
