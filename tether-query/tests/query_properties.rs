//! Property-based tests for query evaluation.
//!
//! Evaluation must be a pure function of its inputs: the same entity array
//! and the same query always produce the same output, and pagination never
//! yields more than the filtered set.

use proptest::prelude::*;
use serde_json::json;
use tether_query::Query;
use tether_types::Entity;

fn entity_strategy() -> impl Strategy<Value = Entity> {
    (
        0u32..1000,
        prop::option::of(0i64..50),
        prop::option::of(prop::sample::select(vec!["a", "b", "c"])),
    )
        .prop_map(|(id, n, tag)| {
            let mut value = json!({ "_id": id.to_string() });
            if let Some(n) = n {
                value["n"] = json!(n);
            }
            if let Some(tag) = tag {
                value["tag"] = json!(tag);
            }
            Entity::from_value(value).unwrap()
        })
}

fn query_strategy() -> impl Strategy<Value = Query> {
    (
        prop::option::of(0i64..50),
        prop::option::of(prop::sample::select(vec!["a", "b", "c"])),
        any::<bool>(),
        0usize..10,
        prop::option::of(0usize..10),
    )
        .prop_map(|(min, tag, asc, skip, limit)| {
            let mut query = Query::new();
            if let Some(min) = min {
                query = query.greater_than_or_equal_to("n", json!(min));
            }
            if let Some(tag) = tag {
                query = query.equal_to("tag", json!(tag));
            }
            query = if asc {
                query.ascending("n")
            } else {
                query.descending("n")
            };
            query = query.skip(skip);
            if let Some(limit) = limit {
                query = query.limit(limit);
            }
            query
        })
}

proptest! {
    #[test]
    fn evaluation_is_deterministic(
        entities in prop::collection::vec(entity_strategy(), 0..40),
        query in query_strategy(),
    ) {
        let first = query.process(entities.clone()).unwrap();
        let second = query.process(entities).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn page_is_bounded_by_filter_and_limit(
        entities in prop::collection::vec(entity_strategy(), 0..40),
        query in query_strategy(),
    ) {
        let filtered = query.filter_entities(entities.clone()).unwrap().len();
        let page = query.process(entities).unwrap().len();
        let expected = filtered.saturating_sub(query.skip).min(query.limit.unwrap_or(usize::MAX));
        prop_assert_eq!(page, expected);
    }

    #[test]
    fn every_result_matches_filter(
        entities in prop::collection::vec(entity_strategy(), 0..40),
        query in query_strategy(),
    ) {
        for entity in query.process(entities).unwrap() {
            prop_assert!(query.filter.matches(&entity));
        }
    }
}
