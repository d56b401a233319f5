//! Grouping and reduction over entity arrays.

use serde_json::{Map, Value, json};

use tether_types::Entity;

use crate::error::{QueryError, QueryResult};
use crate::query::Query;

/// How each group is reduced to a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduce {
    Count,
    Sum,
    Min,
    Max,
    Average,
}

impl Reduce {
    /// Name of the output field holding the reduced value.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Average => "average",
        }
    }
}

/// A group-by aggregation.
///
/// Produces one JSON object per distinct combination of the `by` fields, in
/// order of first appearance, holding those fields plus the reduced value
/// under [`Reduce::name`].
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub by: Vec<String>,
    pub reduce: Reduce,
    /// Field the reducer reads. Ignored by `Count`.
    pub field: Option<String>,
    /// Entities considered before grouping.
    pub query: Option<Query>,
}

impl Aggregation {
    fn with(reduce: Reduce, field: Option<&str>) -> Self {
        Self {
            by: Vec::new(),
            reduce,
            field: field.map(str::to_string),
            query: None,
        }
    }

    #[must_use]
    pub fn count() -> Self {
        Self::with(Reduce::Count, None)
    }

    #[must_use]
    pub fn sum(field: &str) -> Self {
        Self::with(Reduce::Sum, Some(field))
    }

    #[must_use]
    pub fn min(field: &str) -> Self {
        Self::with(Reduce::Min, Some(field))
    }

    #[must_use]
    pub fn max(field: &str) -> Self {
        Self::with(Reduce::Max, Some(field))
    }

    #[must_use]
    pub fn average(field: &str) -> Self {
        Self::with(Reduce::Average, Some(field))
    }

    /// Adds a group-by field.
    #[must_use]
    pub fn by(mut self, field: &str) -> Self {
        self.by.push(field.to_string());
        self
    }

    /// Restricts the input to entities matching `query`.
    #[must_use]
    pub fn with_query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    /// Whether the aggregation can be evaluated locally.
    #[must_use]
    pub fn is_supported_offline(&self) -> bool {
        self.query.as_ref().is_none_or(Query::is_supported_offline)
    }

    /// Evaluates the aggregation in memory.
    pub fn evaluate(&self, entities: Vec<Entity>) -> QueryResult<Vec<Value>> {
        if self.reduce != Reduce::Count && self.field.is_none() {
            return Err(QueryError::InvalidAggregation(format!(
                "{} requires a field",
                self.reduce.name()
            )));
        }

        let entities = match &self.query {
            Some(query) => query.filter_entities(entities)?,
            None => entities,
        };

        let mut groups: Vec<(Vec<Value>, Vec<f64>, usize)> = Vec::new();
        for entity in &entities {
            let key: Vec<Value> = self
                .by
                .iter()
                .map(|f| entity.get_path(f).cloned().unwrap_or(Value::Null))
                .collect();

            let idx = match groups.iter().position(|(k, _, _)| *k == key) {
                Some(idx) => idx,
                None => {
                    groups.push((key, Vec::new(), 0));
                    groups.len() - 1
                }
            };

            let group = &mut groups[idx];
            group.2 += 1;
            if let Some(n) = self
                .field
                .as_deref()
                .and_then(|f| entity.get_path(f))
                .and_then(Value::as_f64)
            {
                group.1.push(n);
            }
        }

        Ok(groups
            .into_iter()
            .map(|(key, numbers, count)| {
                let mut out = Map::new();
                for (field, value) in self.by.iter().zip(key) {
                    out.insert(field.clone(), value);
                }
                out.insert(self.reduce.name().to_string(), self.reduce_group(&numbers, count));
                Value::Object(out)
            })
            .collect())
    }

    fn reduce_group(&self, numbers: &[f64], count: usize) -> Value {
        match self.reduce {
            Reduce::Count => json!(count),
            Reduce::Sum => json!(numbers.iter().sum::<f64>()),
            Reduce::Min => numbers.iter().copied().reduce(f64::min).map_or(Value::Null, |n| json!(n)),
            Reduce::Max => numbers.iter().copied().reduce(f64::max).map_or(Value::Null, |n| json!(n)),
            Reduce::Average if numbers.is_empty() => Value::Null,
            Reduce::Average => json!(numbers.iter().sum::<f64>() / numbers.len() as f64),
        }
    }

    /// Request body for the backend `_group` endpoint.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut body = json!({
            "by": self.by,
            "reduce": self.reduce.name(),
        });
        if let Some(field) = &self.field {
            body["field"] = json!(field);
        }
        if let Some(query) = &self.query {
            body["condition"] = query.filter.to_value();
        }
        body
    }
}
