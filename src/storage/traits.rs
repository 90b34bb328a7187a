// src/storage/traits.rs

use crate::error::Result;
use async_trait::async_trait;

/// Key-value persistence used as a write-through cache for pool state.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value stored under `key`
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Remove `key`; returns whether it existed
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Backend name for log fields
    fn backend_name(&self) -> &'static str;
}
