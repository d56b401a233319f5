use pretty_assertions::assert_eq;
use serde_json::json;
use tether_types::{Entity, EntityId, Kmd, Timestamp};

fn entity(value: serde_json::Value) -> Entity {
    Entity::from_value(value).unwrap()
}

// ── Construction ──────────────────────────────────────────────────

#[test]
fn from_value_requires_object() {
    assert!(Entity::from_value(json!([1, 2])).is_err());
    assert!(Entity::from_value(json!("x")).is_err());
    assert!(Entity::from_value(json!({})).is_ok());
}

#[test]
fn serde_is_transparent() {
    let e = entity(json!({"_id": "1", "name": "x"}));
    let value = serde_json::to_value(&e).unwrap();
    assert_eq!(value, json!({"_id": "1", "name": "x"}));
    let back: Entity = serde_json::from_value(value).unwrap();
    assert_eq!(back, e);
}

// ── Identifier ────────────────────────────────────────────────────

#[test]
fn id_ignores_missing_empty_and_non_string() {
    assert_eq!(entity(json!({})).id(), None);
    assert_eq!(entity(json!({"_id": ""})).id(), None);
    assert_eq!(entity(json!({"_id": 42})).id(), None);
    assert_eq!(entity(json!({"_id": "a"})).id(), Some(EntityId::from("a")));
}

#[test]
fn with_id_sets_field() {
    let e = Entity::new().with_id(&EntityId::from("x"));
    assert_eq!(e.get("_id"), Some(&json!("x")));
}

// ── Paths ─────────────────────────────────────────────────────────

#[test]
fn get_path_walks_objects_and_arrays() {
    let e = entity(json!({"a": {"b": {"c": 1}}, "tags": ["x", "y"]}));
    assert_eq!(e.get_path("a.b.c"), Some(&json!(1)));
    assert_eq!(e.get_path("tags.1"), Some(&json!("y")));
    assert_eq!(e.get_path("a.missing"), None);
    assert_eq!(e.get_path("tags.nope"), None);
}

// ── Metadata ──────────────────────────────────────────────────────

#[test]
fn mark_local_and_is_local() {
    let mut e = entity(json!({"name": "x"}));
    assert!(!e.is_local());
    e.mark_local().unwrap();
    assert!(e.is_local());
    assert_eq!(e.get("_kmd"), Some(&json!({"local": true})));
}

#[test]
fn touch_sets_ect_once_and_lmt_every_time() {
    let mut e = Entity::new();
    e.touch(Timestamp::from_millis(1_000)).unwrap();
    e.touch(Timestamp::from_millis(2_000)).unwrap();
    let kmd = e.kmd().unwrap();
    assert_eq!(kmd.ect.as_deref(), Some("1970-01-01T00:00:01.000Z"));
    assert_eq!(kmd.lmt.as_deref(), Some("1970-01-01T00:00:02.000Z"));
}

#[test]
fn kmd_preserves_unknown_keys() {
    let mut e = entity(json!({"_kmd": {"authtoken": "t", "lmt": "2020-01-01T00:00:00.000Z"}}));
    e.mark_local().unwrap();
    let kmd = e.kmd().unwrap();
    assert!(kmd.local);
    assert_eq!(kmd.extra.get("authtoken"), Some(&json!("t")));
}

#[test]
fn strip_local_removes_id_and_flag() {
    let mut e = entity(json!({"_id": "local-1", "name": "x"}));
    e.mark_local().unwrap();
    let stripped = e.strip_local();
    assert_eq!(stripped.into_value(), json!({"name": "x"}));
}

#[test]
fn strip_local_keeps_other_kmd_fields() {
    let e = entity(json!({"_id": "1", "_kmd": {"local": true, "ect": "2020-01-01T00:00:00.000Z"}}));
    let stripped = e.strip_local();
    assert_eq!(
        stripped.kmd(),
        Some(Kmd {
            ect: Some("2020-01-01T00:00:00.000Z".into()),
            ..Default::default()
        })
    );
}
