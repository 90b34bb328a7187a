// tests/storage_tests.rs

mod common;

use api_key_pool::config::PoolConfig;
use api_key_pool::pool::{KeyPool, PersistedPool, STORAGE_KEY};
use api_key_pool::storage::{InMemoryStore, JsonFileStore, KeyValueStore};
use common::pool_with_store;
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn store_with_blob(blob: &str) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store.set(STORAGE_KEY, blob.to_string()).await.unwrap();
    store
}

#[tokio::test]
async fn test_memory_store_basic_operations() {
    let store = InMemoryStore::new();

    assert_eq!(store.get("missing").await.unwrap(), None);
    store.set("k", "v1".to_string()).await.unwrap();
    store.set("k", "v2".to_string()).await.unwrap();
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
    assert!(store.remove("k").await.unwrap());
    assert!(!store.remove("k").await.unwrap());
    assert_eq!(store.backend_name(), "memory");
}

#[tokio::test]
async fn test_file_store_persists_across_instances() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("pool.json");

    let store = JsonFileStore::new(&path);
    assert_eq!(store.get("a").await.unwrap(), None);
    store.set("a", "1".to_string()).await.unwrap();
    store.set("b", "2".to_string()).await.unwrap();

    let reopened = JsonFileStore::new(&path);
    assert_eq!(reopened.get("a").await.unwrap().as_deref(), Some("1"));
    assert_eq!(reopened.get("b").await.unwrap().as_deref(), Some("2"));
    assert!(reopened.remove("a").await.unwrap());
    assert_eq!(JsonFileStore::new(&path).get("a").await.unwrap(), None);
    assert!(!path.with_extension("json.tmp").exists());
}

#[tokio::test]
async fn test_file_store_rejects_corrupt_document() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pool.json");
    std::fs::write(&path, "{ not json").unwrap();

    let store = JsonFileStore::new(&path);
    assert!(store.get("a").await.is_err());
}

#[tokio::test]
async fn test_flush_writes_pool_blob() {
    let (pool, store) = pool_with_store();
    let record = pool.add_key("primary", "sk-flush-test-0001").unwrap();
    pool.set_concurrency(7);
    pool.flush().await.unwrap();

    let blob = store.get(STORAGE_KEY).await.unwrap().expect("blob written");
    let persisted: PersistedPool = serde_json::from_str(&blob).unwrap();
    assert_eq!(persisted.keys.len(), 1);
    assert_eq!(persisted.keys[0].id, record.id);
    assert_eq!(persisted.active_key_id.as_deref(), Some(record.id.as_str()));
    assert_eq!(persisted.concurrency, Some(7));
}

#[tokio::test]
async fn test_background_writer_persists_mutations() {
    let (pool, store) = pool_with_store();
    pool.add_key("primary", "sk-writer-test-001").unwrap();

    let mut persisted = None;
    for _ in 0..50 {
        if let Some(blob) = store.get(STORAGE_KEY).await.unwrap() {
            persisted = Some(blob);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let blob = persisted.expect("writer should persist without an explicit flush");
    assert!(blob.contains("sk-writer-test-001"));
}

#[tokio::test]
async fn test_pool_round_trips_through_store() {
    let (pool, store) = pool_with_store();
    let first = pool.add_key("first", "sk-roundtrip-0001").unwrap();
    let second = pool.add_key("second", "sk-roundtrip-0002").unwrap();
    pool.set_active_key(&second.id);
    pool.set_concurrency(5);

    let request = pool.start_request(&first.id).unwrap();
    pool.report_error(&request, "quota", Some(Duration::from_secs(60)));
    let pending = pool.start_request(&second.id).unwrap();
    pool.flush().await.unwrap();
    assert!(pool.is_pending(&pending));

    let restored = KeyPool::load(store as Arc<dyn KeyValueStore>, &PoolConfig::default()).await;
    assert_eq!(restored.len(), 2);
    assert_eq!(restored.active_key().unwrap().id, second.id);
    assert_eq!(restored.concurrency(), 5);
    assert_eq!(restored.pending_requests(), 0);

    let key = restored.key(&first.id).unwrap();
    assert_eq!(key.secret.expose_secret(), "sk-roundtrip-0001");
    assert_eq!(key.total_errors, 1);
    assert!(key.cooldown_until.is_some());

    let order: Vec<String> = restored.keys().into_iter().map(|k| k.id).collect();
    assert_eq!(order, vec![first.id, second.id]);
}

#[tokio::test]
async fn test_load_with_corrupt_blob_starts_empty() {
    let store = store_with_blob("definitely not json").await;
    let pool = KeyPool::load(store, &PoolConfig::default()).await;
    assert!(pool.is_empty());
    assert_eq!(pool.concurrency(), 3);
}

#[tokio::test]
async fn test_load_repairs_dangling_active_key() {
    let blob = r#"{"keys":[],"activeKeyId":"gone","concurrency":99}"#;
    let store = store_with_blob(blob).await;
    let pool = KeyPool::load(store, &PoolConfig::default()).await;
    assert!(pool.active_key().is_none());
    assert_eq!(pool.concurrency(), 16);
}

#[tokio::test]
async fn test_load_from_file_backend() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pool.json");

    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(&path));
    let pool = KeyPool::new(store, &PoolConfig::default());
    let record = pool.add_key("file", "sk-file-backend-01").unwrap();
    pool.flush().await.unwrap();
    drop(pool);

    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(&path));
    let restored = KeyPool::load(store, &PoolConfig::default()).await;
    assert_eq!(restored.key(&record.id).unwrap().masked_key, record.masked_key);
}

#[tokio::test]
async fn test_load_without_stored_concurrency_uses_config() {
    let blob = r#"{"keys":[],"activeKeyId":null}"#;
    let store = store_with_blob(blob).await;
    let mut config = PoolConfig::default();
    config.pool.concurrency = 5;

    let pool = KeyPool::load(store, &config).await;
    assert_eq!(pool.concurrency(), 5);
}

#[test]
fn test_pool_built_outside_runtime_persists_once_inside_one() {
    let store = Arc::new(InMemoryStore::new());
    let pool = KeyPool::new(store.clone() as Arc<dyn KeyValueStore>, &PoolConfig::default());
    let record = pool.add_key("offline", "sk-no-runtime-0001").unwrap();
    assert_eq!(pool.acquire_key().unwrap().id, record.id);

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let blob = runtime.block_on(async {
        pool.flush().await.unwrap();
        store.get(STORAGE_KEY).await.unwrap()
    });

    let persisted: PersistedPool = serde_json::from_str(&blob.unwrap()).unwrap();
    assert_eq!(persisted.keys.len(), 1);
    assert_eq!(persisted.keys[0].request_count, 1);
}
