//! Common test utilities and fixtures

#![allow(dead_code)]

use api_key_pool::config::PoolConfig;
use api_key_pool::storage::{InMemoryStore, KeyValueStore};
use api_key_pool::{ApiKeyRecord, ExecuteOptions, KeyPool, SelectionStrategy};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Error type standing in for a provider failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderError(pub String);

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ProviderError {}

pub fn provider_error(message: &str) -> ProviderError {
    ProviderError(message.to_string())
}

/// Pool over an in-memory store with `n` registered keys.
pub fn pool_with_keys(n: usize) -> (KeyPool, Vec<ApiKeyRecord>) {
    let pool = KeyPool::in_memory();
    let keys = (0..n)
        .map(|i| {
            pool.add_key(&format!("key-{i}"), &format!("sk-test-secret-{i:04}"))
                .expect("fixture key should register")
        })
        .collect();
    (pool, keys)
}

/// Pool and the store behind it, for persistence assertions.
pub fn pool_with_store() -> (KeyPool, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let pool = KeyPool::new(store.clone() as Arc<dyn KeyValueStore>, &PoolConfig::default());
    (pool, store)
}

/// Retry options without the production delay.
pub fn fast_options(max_retries: u32) -> ExecuteOptions {
    ExecuteOptions {
        max_retries,
        retry_delay: Duration::from_millis(1),
        strategy: SelectionStrategy::LeastLoaded,
    }
}
