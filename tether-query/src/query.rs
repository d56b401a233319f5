//! The query type and its fluent builder.

use serde_json::{Map, Value};

use tether_types::{ACL_FIELD, Entity, ID_FIELD};

use crate::error::{QueryError, QueryResult};
use crate::filter::{Condition, Filter, Pattern};
use crate::sort::{SortDirection, sort_entities};

/// Fields that survive any projection.
pub const PROTECTED_FIELDS: [&str; 2] = [ID_FIELD, ACL_FIELD];

/// Filter + sort + pagination + projection over a collection.
///
/// Evaluation is a pure function of the query and the input entities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub sort: Vec<(String, SortDirection)>,
    pub skip: usize,
    pub limit: Option<usize>,
    pub fields: Option<Vec<String>>,
}

impl Query {
    /// Creates a query that matches everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query from an existing filter.
    #[must_use]
    pub fn with_filter(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    // ── Conditions ───────────────────────────────────────────────

    /// Adds a condition on `field`, AND-ed with the existing filter.
    #[must_use]
    pub fn condition(mut self, field: &str, condition: Condition) -> Self {
        let leaf = Filter::field(field, condition);
        self.filter = match self.filter {
            Filter::And(mut children) => {
                children.push(leaf);
                Filter::And(children)
            }
            other => Filter::And(vec![other, leaf]),
        };
        self
    }

    #[must_use]
    pub fn equal_to(self, field: &str, value: Value) -> Self {
        self.condition(field, Condition::Eq(value))
    }

    #[must_use]
    pub fn not_equal_to(self, field: &str, value: Value) -> Self {
        self.condition(field, Condition::Ne(value))
    }

    #[must_use]
    pub fn greater_than(self, field: &str, value: Value) -> Self {
        self.condition(field, Condition::Gt(value))
    }

    #[must_use]
    pub fn greater_than_or_equal_to(self, field: &str, value: Value) -> Self {
        self.condition(field, Condition::Gte(value))
    }

    #[must_use]
    pub fn less_than(self, field: &str, value: Value) -> Self {
        self.condition(field, Condition::Lt(value))
    }

    #[must_use]
    pub fn less_than_or_equal_to(self, field: &str, value: Value) -> Self {
        self.condition(field, Condition::Lte(value))
    }

    /// Field equals one of `values`.
    #[must_use]
    pub fn contains(self, field: &str, values: Vec<Value>) -> Self {
        self.condition(field, Condition::In(values))
    }

    #[must_use]
    pub fn not_contained_in(self, field: &str, values: Vec<Value>) -> Self {
        self.condition(field, Condition::Nin(values))
    }

    /// Array field contains every one of `values`.
    #[must_use]
    pub fn contains_all(self, field: &str, values: Vec<Value>) -> Self {
        self.condition(field, Condition::All(values))
    }

    #[must_use]
    pub fn exists(self, field: &str, exists: bool) -> Self {
        self.condition(field, Condition::Exists(exists))
    }

    #[must_use]
    pub fn size(self, field: &str, size: usize) -> Self {
        self.condition(field, Condition::Size(size))
    }

    /// Regular expression match with Mongo-style option flags.
    pub fn matches(self, field: &str, pattern: &str, options: &str) -> QueryResult<Self> {
        Ok(self.condition(field, Condition::Regex(Pattern::new(pattern, options)?)))
    }

    /// Geo proximity. Only the backend can evaluate this.
    #[must_use]
    pub fn near(self, field: &str, point: [f64; 2], max_distance: Option<f64>) -> Self {
        self.condition(
            field,
            Condition::NearSphere {
                point,
                max_distance,
            },
        )
    }

    #[must_use]
    pub fn within_box(self, field: &str, bottom_left: [f64; 2], upper_right: [f64; 2]) -> Self {
        self.condition(
            field,
            Condition::WithinBox {
                bottom_left,
                upper_right,
            },
        )
    }

    // ── Combinators ──────────────────────────────────────────────

    #[must_use]
    pub fn and(mut self, other: Query) -> Self {
        self.filter = Filter::And(vec![self.filter, other.filter]);
        self
    }

    #[must_use]
    pub fn or(mut self, other: Query) -> Self {
        self.filter = Filter::Or(vec![self.filter, other.filter]);
        self
    }

    #[must_use]
    pub fn nor(mut self, other: Query) -> Self {
        self.filter = Filter::Nor(vec![self.filter, other.filter]);
        self
    }

    // ── Modifiers ────────────────────────────────────────────────

    #[must_use]
    pub fn ascending(mut self, field: &str) -> Self {
        self.sort.push((field.to_string(), SortDirection::Ascending));
        self
    }

    #[must_use]
    pub fn descending(mut self, field: &str) -> Self {
        self.sort.push((field.to_string(), SortDirection::Descending));
        self
    }

    #[must_use]
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Restricts returned fields. `_id` and `_acl` are always kept.
    #[must_use]
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    // ── Evaluation ───────────────────────────────────────────────

    /// Whether the whole query can be evaluated locally.
    #[must_use]
    pub fn is_supported_offline(&self) -> bool {
        self.filter.is_supported_offline()
    }

    /// Whether the query restricts the result set in any way.
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.filter.is_empty() && self.skip == 0 && self.limit.is_none()
    }

    /// Filters, sorts, paginates and projects `entities`.
    pub fn process(&self, entities: Vec<Entity>) -> QueryResult<Vec<Entity>> {
        let mut matched = self.filter_entities(entities)?;
        sort_entities(&mut matched, &self.sort);

        let page = matched
            .into_iter()
            .skip(self.skip)
            .take(self.limit.unwrap_or(usize::MAX));

        Ok(match &self.fields {
            Some(fields) => page.map(|e| project(e, fields)).collect(),
            None => page.collect(),
        })
    }

    /// Applies only the filter, preserving input order.
    pub fn filter_entities(&self, entities: Vec<Entity>) -> QueryResult<Vec<Entity>> {
        self.ensure_offline()?;
        Ok(entities
            .into_iter()
            .filter(|e| self.filter.matches(e))
            .collect())
    }

    fn ensure_offline(&self) -> QueryResult<()> {
        if self.is_supported_offline() {
            Ok(())
        } else {
            Err(QueryError::UnsupportedOffline(
                "$nearSphere requires the backend".to_string(),
            ))
        }
    }

    // ── Wire translation ─────────────────────────────────────────

    /// Renders the query as URL query parameters
    /// (`query`, `sort`, `skip`, `limit`, `fields`).
    #[must_use]
    pub fn to_query_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if !self.filter.is_empty() {
            params.push(("query".to_string(), self.filter.to_value().to_string()));
        }
        if !self.sort.is_empty() {
            let mut sort = Map::new();
            for (field, direction) in &self.sort {
                sort.insert(field.clone(), Value::from(direction.as_i8()));
            }
            params.push(("sort".to_string(), Value::Object(sort).to_string()));
        }
        if self.skip > 0 {
            params.push(("skip".to_string(), self.skip.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(fields) = &self.fields {
            params.push(("fields".to_string(), fields.join(",")));
        }
        params
    }
}

fn project(entity: Entity, fields: &[String]) -> Entity {
    let mut projected = Map::new();
    for (key, value) in entity.as_map() {
        let keep = PROTECTED_FIELDS.contains(&key.as_str())
            || fields
                .iter()
                .any(|f| f == key || f.split('.').next() == Some(key.as_str()));
        if keep {
            projected.insert(key.clone(), value.clone());
        }
    }
    Entity::from(projected)
}
