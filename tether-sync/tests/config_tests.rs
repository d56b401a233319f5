use pretty_assertions::assert_eq;
use tether_sync::{CacheConfig, NetworkConfig, SyncConfig, SyncError, TetherConfig};

#[test]
fn defaults() {
    let config = TetherConfig::default();
    assert_eq!(config.network, NetworkConfig::default());
    assert_eq!(config.sync.sync_collection, "__tether_sync");
    assert_eq!(config.sync.push_concurrency, 10);
    assert!(config.cache.enabled);
    assert_eq!(config.cache.ttl_ms, None);
}

#[test]
fn empty_document_is_default() {
    assert_eq!(TetherConfig::from_json_str("{}").unwrap(), TetherConfig::default());
}

#[test]
fn partial_document_keeps_other_defaults() {
    let config = TetherConfig::from_json_str(
        r#"{
            "network": {"base_url": "https://baas.example.com", "app_key": "kid_1"},
            "cache": {"ttl_ms": 60000}
        }"#,
    )
    .unwrap();

    assert_eq!(config.network.base_url, "https://baas.example.com");
    assert_eq!(config.network.app_key, "kid_1");
    assert_eq!(config.network.namespace, "appdata");
    assert_eq!(
        config.cache,
        CacheConfig {
            enabled: true,
            ttl_ms: Some(60_000),
        }
    );
    assert_eq!(config.sync, SyncConfig::default());
}

#[test]
fn zero_concurrency_is_rejected() {
    let err = TetherConfig::from_json_str(r#"{"sync": {"push_concurrency": 0}}"#).unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
}

#[test]
fn empty_sync_collection_is_rejected() {
    let err = TetherConfig::from_json_str(r#"{"sync": {"sync_collection": ""}}"#).unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
}

#[test]
fn malformed_json_is_serialization_error() {
    let err = TetherConfig::from_json_str("{").unwrap_err();
    assert!(matches!(err, SyncError::Serialization(_)));
}

#[test]
fn loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tether.json");
    std::fs::write(&path, r#"{"network": {"timeout_ms": 5000}}"#).unwrap();

    let config = TetherConfig::from_path(&path).unwrap();
    assert_eq!(config.network.timeout_ms, 5_000);
}

#[test]
fn missing_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = TetherConfig::from_path(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
}
