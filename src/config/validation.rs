// src/config/validation.rs

use crate::config::{PoolConfig, StorageBackend};
use crate::error::{PoolError, Result};
use tracing::{debug, warn};
use url::Url;

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &PoolConfig) -> Result<()> {
        debug!("Starting configuration validation");

        if let Err(e) = Self::validate_storage(config) {
            warn!("Storage config validation failed: {}", e);
            return Err(e);
        }
        debug!("Storage config validation passed");

        if let Err(e) = Self::validate_pool(config) {
            warn!("Pool config validation failed: {}", e);
            return Err(e);
        }
        debug!("Pool config validation passed");

        if let Err(e) = Self::validate_retry(config) {
            warn!("Retry config validation failed: {}", e);
            return Err(e);
        }

        debug!("Configuration validation completed successfully");
        Ok(())
    }

    fn validate_storage(config: &PoolConfig) -> Result<()> {
        match config.storage.backend {
            StorageBackend::Redis => {
                let Some(redis_url) = &config.storage.redis_url else {
                    return Err(PoolError::config_validation(
                        "Redis backend selected but no redis_url configured",
                        Some("storage.redis_url"),
                    ));
                };
                Self::validate_url(redis_url, "storage.redis_url")?;
                if !cfg!(feature = "redis") {
                    return Err(PoolError::config_validation(
                        "Redis backend requires the `redis` feature",
                        Some("storage.backend"),
                    ));
                }
            }
            StorageBackend::File => {
                if config.storage.path.as_os_str().is_empty() {
                    return Err(PoolError::config_validation(
                        "Storage path cannot be empty",
                        Some("storage.path"),
                    ));
                }
            }
            StorageBackend::Memory => {}
        }
        Ok(())
    }

    fn validate_pool(config: &PoolConfig) -> Result<()> {
        let pool = &config.pool;

        if pool.error_threshold == 0 {
            return Err(PoolError::config_validation(
                "Error threshold cannot be 0",
                Some("pool.error_threshold"),
            ));
        }

        if pool.base_cooldown_secs == 0 {
            return Err(PoolError::config_validation(
                "Base cooldown cannot be 0",
                Some("pool.base_cooldown_secs"),
            ));
        }

        if pool.max_cooldown_secs < pool.base_cooldown_secs {
            return Err(PoolError::config_validation(
                format!(
                    "Max cooldown ({}s) must not be below base cooldown ({}s)",
                    pool.max_cooldown_secs, pool.base_cooldown_secs
                ),
                Some("pool.max_cooldown_secs"),
            ));
        }

        if !(1..=16).contains(&pool.concurrency) {
            warn!(
                concurrency = pool.concurrency,
                "Concurrency outside 1-16 will be clamped"
            );
        }

        Ok(())
    }

    fn validate_retry(config: &PoolConfig) -> Result<()> {
        if config.retry.max_retries == 0 {
            return Err(PoolError::config_validation(
                "max_retries must be at least 1",
                Some("retry.max_retries"),
            ));
        }
        Ok(())
    }

    fn validate_url(url_str: &str, field_name: &str) -> Result<()> {
        let url = Url::parse(url_str).map_err(|e| {
            PoolError::config_validation(
                format!("Invalid URL in {field_name}: {e}"),
                Some(field_name),
            )
        })?;

        match url.scheme() {
            "redis" | "rediss" => Ok(()),
            scheme => Err(PoolError::config_validation(
                format!("Unsupported scheme '{scheme}' in {field_name}. Supported: redis, rediss"),
                Some(field_name),
            )),
        }
    }
}
