//! Value ordering used by sorting and range comparisons.

use serde_json::Value;
use std::cmp::Ordering;

use tether_types::Entity;

/// Sort direction for one key of a sort specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// Wire representation (`1` / `-1`).
    #[must_use]
    pub const fn as_i8(self) -> i8 {
        match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        }
    }
}

/// Total order over defined JSON values.
///
/// Values of different kinds order by kind: numbers, strings, objects,
/// arrays, booleans, null. Numbers compare numerically regardless of their
/// integer/float representation.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let l = serde_json::to_string(x).unwrap_or_default();
            let r = serde_json::to_string(y).unwrap_or_default();
            l.cmp(&r)
        }
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

const fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Number(_) => 0,
        Value::String(_) => 1,
        Value::Object(_) => 2,
        Value::Array(_) => 3,
        Value::Bool(_) => 4,
        Value::Null => 5,
    }
}

/// Compares two entities on one sort key.
///
/// Absent fields sort after present ones in both directions; `null` counts as
/// absent, so two `null`s (or a `null` and a missing field) compare equal.
pub(crate) fn compare_field(a: &Entity, b: &Entity, field: &str, direction: SortDirection) -> Ordering {
    let left = a.get_path(field).filter(|v| !v.is_null());
    let right = b.get_path(field).filter(|v| !v.is_null());
    match (left, right) {
        (None, None) => Ordering::Equal,
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(l), Some(r)) => match direction {
            SortDirection::Ascending => compare_values(l, r),
            SortDirection::Descending => compare_values(l, r).reverse(),
        },
    }
}

/// Stable multi-key sort.
pub(crate) fn sort_entities(entities: &mut [Entity], keys: &[(String, SortDirection)]) {
    if keys.is_empty() {
        return;
    }
    entities.sort_by(|a, b| {
        keys.iter()
            .map(|(field, direction)| compare_field(a, b, field, *direction))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}
