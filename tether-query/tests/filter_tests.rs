use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tether_query::{Condition, Filter, QueryError};
use tether_types::Entity;

fn entity(value: Value) -> Entity {
    Entity::from_value(value).unwrap()
}

fn matches(filter: Value, doc: Value) -> bool {
    Filter::parse(&filter).unwrap().matches(&entity(doc))
}

// ── Parsing ──────────────────────────────────────────────────────

#[test]
fn parse_plain_equality() {
    let filter = Filter::parse(&json!({"name": "x"})).unwrap();
    assert_eq!(filter, Filter::field("name", Condition::Eq(json!("x"))));
}

#[test]
fn parse_multiple_fields_becomes_and() {
    let filter = Filter::parse(&json!({"a": 1, "b": {"$gt": 2}})).unwrap();
    match filter {
        Filter::And(children) => assert_eq!(children.len(), 2),
        other => panic!("expected And, got {other:?}"),
    }
}

#[test]
fn parse_empty_object_matches_everything() {
    let filter = Filter::parse(&json!({})).unwrap();
    assert!(filter.is_empty());
    assert!(filter.matches(&entity(json!({"x": 1}))));
}

#[test]
fn parse_rejects_unknown_operator() {
    let err = Filter::parse(&json!({"a": {"$where": "1"}})).unwrap_err();
    assert!(matches!(err, QueryError::UnsupportedOperator(op) if op == "$where"));
}

#[test]
fn parse_rejects_non_object() {
    assert!(matches!(
        Filter::parse(&json!([1])),
        Err(QueryError::InvalidFilter(_))
    ));
}

#[test]
fn parse_rejects_bad_regex() {
    assert!(matches!(
        Filter::parse(&json!({"a": {"$regex": "("}})),
        Err(QueryError::InvalidRegex(_))
    ));
}

#[test]
fn embedded_document_without_operators_is_equality() {
    assert!(matches(json!({"addr": {"city": "x"}}), json!({"addr": {"city": "x"}})));
    assert!(!matches(json!({"addr": {"city": "x"}}), json!({"addr": {"city": "y"}})));
}

// ── Rendering ────────────────────────────────────────────────────

#[test]
fn to_value_merges_distinct_fields() {
    let value = json!({"age": {"$gte": 18, "$lt": 65}, "name": "x"});
    assert_eq!(Filter::parse(&value).unwrap().to_value(), value);
}

#[test]
fn to_value_keeps_logical_operators() {
    let value = json!({"$or": [{"a": 1}, {"b": {"$regex": "^x", "$options": "i"}}]});
    assert_eq!(Filter::parse(&value).unwrap().to_value(), value);
}

#[test]
fn to_value_repeated_field_uses_and() {
    let filter = Filter::And(vec![
        Filter::field("a", Condition::Gt(json!(1))),
        Filter::field("a", Condition::Lt(json!(5))),
    ]);
    assert_eq!(
        filter.to_value(),
        json!({"$and": [{"a": {"$gt": 1}}, {"a": {"$lt": 5}}]})
    );
}

#[test]
fn to_value_geo_operators() {
    let value = json!({
        "loc": {"$nearSphere": [1.0, 2.0], "$maxDistance": 0.5},
        "area": {"$geoWithin": {"$box": [[0.0, 0.0], [10.0, 10.0]]}}
    });
    assert_eq!(Filter::parse(&value).unwrap().to_value(), value);
}

// ── Evaluation ───────────────────────────────────────────────────

#[test]
fn equality_matches_numbers_across_representations() {
    assert!(matches(json!({"n": 1}), json!({"n": 1.0})));
}

#[test]
fn equality_matches_array_elements() {
    assert!(matches(json!({"tags": "a"}), json!({"tags": ["a", "b"]})));
    assert!(matches(json!({"tags": ["a", "b"]}), json!({"tags": ["a", "b"]})));
    assert!(!matches(json!({"tags": "c"}), json!({"tags": ["a", "b"]})));
}

#[test]
fn null_equality_matches_missing() {
    assert!(matches(json!({"x": null}), json!({})));
    assert!(matches(json!({"x": null}), json!({"x": null})));
    assert!(!matches(json!({"x": null}), json!({"x": 1})));
}

#[test]
fn not_equal_matches_missing() {
    assert!(matches(json!({"x": {"$ne": 1}}), json!({})));
    assert!(!matches(json!({"x": {"$ne": 1}}), json!({"x": 1})));
}

#[test]
fn range_requires_same_kind() {
    assert!(matches(json!({"n": {"$gt": 5}}), json!({"n": 6})));
    assert!(!matches(json!({"n": {"$gt": 5}}), json!({"n": "6"})));
    assert!(!matches(json!({"n": {"$gt": 5}}), json!({})));
    assert!(matches(json!({"s": {"$lte": "b"}}), json!({"s": "a"})));
}

#[test]
fn range_on_array_field_matches_any_element() {
    assert!(matches(json!({"n": {"$gte": 10}}), json!({"n": [1, 10]})));
    assert!(!matches(json!({"n": {"$gte": 10}}), json!({"n": [1, 2]})));
}

#[test]
fn set_membership() {
    assert!(matches(json!({"c": {"$in": ["r", "g"]}}), json!({"c": "g"})));
    assert!(!matches(json!({"c": {"$nin": ["r", "g"]}}), json!({"c": "g"})));
    assert!(matches(json!({"c": {"$nin": ["r", "g"]}}), json!({})));
    assert!(matches(json!({"t": {"$all": ["a", "b"]}}), json!({"t": ["b", "c", "a"]})));
    assert!(!matches(json!({"t": {"$all": ["a", "d"]}}), json!({"t": ["a"]})));
}

#[test]
fn exists_and_size() {
    assert!(matches(json!({"x": {"$exists": true}}), json!({"x": null})));
    assert!(matches(json!({"x": {"$exists": false}}), json!({})));
    assert!(matches(json!({"t": {"$size": 2}}), json!({"t": [1, 2]})));
    assert!(!matches(json!({"t": {"$size": 2}}), json!({"t": "ab"})));
}

#[test]
fn regex_with_options() {
    assert!(matches(json!({"n": {"$regex": "^ab"}}), json!({"n": "abc"})));
    assert!(!matches(json!({"n": {"$regex": "^ab"}}), json!({"n": "ABC"})));
    assert!(matches(json!({"n": {"$regex": "^ab", "$options": "i"}}), json!({"n": "ABC"})));
    assert!(!matches(json!({"n": {"$regex": "^ab"}}), json!({"n": 5})));
}

#[test]
fn logical_combinators() {
    let doc = json!({"a": 1, "b": 2});
    assert!(matches(json!({"$and": [{"a": 1}, {"b": 2}]}), doc.clone()));
    assert!(matches(json!({"$or": [{"a": 5}, {"b": 2}]}), doc.clone()));
    assert!(!matches(json!({"$nor": [{"a": 5}, {"b": 2}]}), doc.clone()));
    assert!(matches(json!({"$nor": [{"a": 5}, {"b": 5}]}), doc));
}

#[test]
fn dotted_paths() {
    assert!(matches(json!({"a.b": 1}), json!({"a": {"b": 1}})));
    assert!(!matches(json!({"a.b": 1}), json!({"a": 1})));
}

#[test]
fn within_box() {
    let filter = json!({"loc": {"$geoWithin": {"$box": [[0, 0], [10, 10]]}}});
    assert!(matches(filter.clone(), json!({"loc": [5, 5]})));
    assert!(!matches(filter.clone(), json!({"loc": [11, 5]})));
    assert!(!matches(filter, json!({"loc": "here"})));
}

#[test]
fn near_sphere_is_not_supported_offline() {
    let near = Filter::parse(&json!({"loc": {"$nearSphere": [1, 2]}})).unwrap();
    assert!(!near.is_supported_offline());

    let nested = Filter::parse(&json!({"$or": [{"a": 1}, {"loc": {"$nearSphere": [1, 2]}}]})).unwrap();
    assert!(!nested.is_supported_offline());

    let within = Filter::parse(&json!({"loc": {"$geoWithin": {"$box": [[0, 0], [1, 1]]}}})).unwrap();
    assert!(within.is_supported_offline());
}

#[test]
fn serde_uses_expression_form() {
    let filter: Filter = serde_json::from_value(json!({"a": {"$in": [1, 2]}})).unwrap();
    assert_eq!(filter, Filter::field("a", Condition::In(vec![json!(1), json!(2)])));
    assert_eq!(serde_json::to_value(&filter).unwrap(), json!({"a": {"$in": [1, 2]}}));
}
