use pretty_assertions::assert_eq;
use serde_json::json;
use tether_storage::{KeyValuePersister, MemoryPersister, SqlitePersister, StorageError};
use tether_types::Entity;

fn entity(value: serde_json::Value) -> Entity {
    Entity::from_value(value).unwrap()
}

fn books() -> Vec<Entity> {
    vec![
        entity(json!({"_id": "b1", "title": "Dune", "pages": 412})),
        entity(json!({"_id": "b2", "title": "Emma", "pages": 474})),
        entity(json!({"_id": "b3", "title": "Ubik", "tags": ["sf", "pkd"]})),
    ]
}

/// Shared contract every engine must satisfy.
async fn exercise_contract<P: KeyValuePersister>(persister: &P) {
    // Absent key reads as empty
    assert!(persister.read_entities("missing").await.unwrap().is_empty());
    assert!(persister.get_keys().await.unwrap().is_empty());

    // Round trip preserves order
    persister.persist_entities("books", books()).await.unwrap();
    assert_eq!(persister.read_entities("books").await.unwrap(), books());

    // Persisting the same list twice leaves the same state
    persister.persist_entities("books", books()).await.unwrap();
    assert_eq!(persister.read_entities("books").await.unwrap(), books());

    // Persist replaces, it never appends
    let one = vec![entity(json!({"_id": "b9", "title": "Solaris"}))];
    persister.persist_entities("books", one.clone()).await.unwrap();
    assert_eq!(persister.read_entities("books").await.unwrap(), one);

    // Two entities with one _id are rejected and the stored list stays
    let twins = vec![
        entity(json!({"_id": "b9", "edition": 1})),
        entity(json!({"_id": "b9", "edition": 2})),
    ];
    let err = persister.persist_entities("books", twins).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidData(_)));
    assert_eq!(persister.read_entities("books").await.unwrap(), one);

    persister
        .persist_entities("authors", vec![entity(json!({"_id": "a1"}))])
        .await
        .unwrap();
    assert_eq!(
        persister.get_keys().await.unwrap(),
        vec!["authors".to_string(), "books".to_string()]
    );

    // Delete
    assert!(persister.delete_entities("authors").await.unwrap());
    assert!(!persister.delete_entities("authors").await.unwrap());
    assert!(persister.read_entities("authors").await.unwrap().is_empty());

    // Empty list removes the key
    persister.persist_entities("books", Vec::new()).await.unwrap();
    assert!(persister.get_keys().await.unwrap().is_empty());
}

// ── Memory ───────────────────────────────────────────────────────

#[tokio::test]
async fn memory_persister_contract() {
    exercise_contract(&MemoryPersister::new()).await;
}

#[tokio::test]
async fn memory_keys_are_isolated() {
    let persister = MemoryPersister::new();
    persister.persist_entities("a", books()).await.unwrap();
    assert!(persister.read_entities("b").await.unwrap().is_empty());
}

// ── SQLite ───────────────────────────────────────────────────────

#[tokio::test]
async fn sqlite_persister_contract() {
    let persister = SqlitePersister::open_in_memory().unwrap();
    exercise_contract(&persister).await;
}

#[tokio::test]
async fn sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tether.db");

    {
        let persister = SqlitePersister::open(&path).unwrap();
        persister.persist_entities("books", books()).await.unwrap();
    }

    let reopened = SqlitePersister::open(&path).unwrap();
    assert_eq!(reopened.read_entities("books").await.unwrap(), books());
    assert_eq!(reopened.get_keys().await.unwrap(), vec!["books".to_string()]);
}

#[tokio::test]
async fn sqlite_keeps_entities_without_ids() {
    let persister = SqlitePersister::open_in_memory().unwrap();
    let anonymous = vec![
        entity(json!({"n": 1})),
        entity(json!({"n": 2})),
        entity(json!({"_id": "x", "n": 3})),
    ];
    persister.persist_entities("log", anonymous.clone()).await.unwrap();
    assert_eq!(persister.read_entities("log").await.unwrap(), anonymous);
}

#[tokio::test]
async fn sqlite_preserves_nested_values() {
    let persister = SqlitePersister::open_in_memory().unwrap();
    let nested = vec![entity(json!({
        "_id": "n1",
        "_kmd": {"ect": "2024-01-01T00:00:00.000Z", "local": true},
        "address": {"city": "Oslo", "geo": [10.75, 59.91]},
    }))];
    persister.persist_entities("places", nested.clone()).await.unwrap();
    assert_eq!(persister.read_entities("places").await.unwrap(), nested);
}
