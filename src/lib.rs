// src/lib.rs

pub mod config;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod storage;

use crate::config::StorageBackend;
use crate::storage::{InMemoryStore, JsonFileStore, KeyValueStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

pub use config::PoolConfig;
pub use error::{PoolError, Result};
pub use pool::{
    ApiKeyRecord, BatchOutcome, ExecuteError, ExecuteOptions, KeyHealth, KeyPool, ParallelOptions,
    PoolStatus, SelectionStrategy,
};

/// Loads, validates and logs the configuration.
pub fn setup_configuration(config_path_override: Option<PathBuf>) -> Result<(PoolConfig, PathBuf)> {
    let config_path = config::resolve_config_path(config_path_override);

    let config_path_display = config_path.display().to_string();
    if config_path.exists() {
        info!(config.path = %config_path_display, "Using configuration file");
    } else {
        info!(
            config.path = %config_path_display,
            "Optional configuration file not found. Using defaults and environment variables."
        );
    }

    let pool_config = config::load_config(&config_path).map_err(|e| {
        error!(
            config.path = %config_path_display,
            error = ?e,
            "Failed to load or validate configuration."
        );
        e
    })?;

    info!(
        storage.backend = ?pool_config.storage.backend,
        pool.concurrency = pool_config.pool.concurrency,
        retry.max_retries = pool_config.retry.max_retries,
        "Configuration loaded and validated successfully."
    );

    Ok((pool_config, config_path))
}

/// Build the storage backend selected by `config`.
pub async fn build_store(config: &PoolConfig) -> Result<Arc<dyn KeyValueStore>> {
    let store: Arc<dyn KeyValueStore> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
        StorageBackend::File => Arc::new(JsonFileStore::new(config.storage.path.clone())),
        StorageBackend::Redis => redis_store(config).await?,
    };
    info!(store.backend = store.backend_name(), "Storage backend ready");
    Ok(store)
}

#[cfg(feature = "redis")]
async fn redis_store(config: &PoolConfig) -> Result<Arc<dyn KeyValueStore>> {
    let redis_url = config.storage.redis_url.as_deref().ok_or_else(|| {
        PoolError::config_validation("Redis backend requires redis_url", Some("storage.redis_url"))
    })?;
    let store = storage::RedisStore::connect(redis_url, config.redis_key_prefix()).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn redis_store(_config: &PoolConfig) -> Result<Arc<dyn KeyValueStore>> {
    Err(PoolError::config_validation(
        "Redis backend requires the `redis` feature",
        Some("storage.backend"),
    ))
}

/// Composition root: build the store and restore the pool from it.
pub async fn bootstrap(config: &PoolConfig) -> Result<Arc<KeyPool>> {
    let store = build_store(config).await.map_err(|e| {
        error!(error = ?e, "Failed to initialize storage backend.");
        e
    })?;
    let pool = KeyPool::load(store, config).await;
    info!(keys = pool.len(), "Key pool initialized");
    Ok(Arc::new(pool))
}
