// src/config/loader.rs

use crate::config::{ConfigValidator, PoolConfig, StorageBackend};
use crate::error::{PoolError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Load configuration from file or environment variables
pub fn load_config(config_path: &Path) -> Result<PoolConfig> {
    let mut config = if config_path.exists() {
        info!("Loading configuration from file: {}", config_path.display());
        load_from_file(config_path)?
    } else {
        info!("Configuration file not found, using defaults");
        PoolConfig::default()
    };

    override_with_env(&mut config);

    ConfigValidator::validate(&config)?;

    debug!("Configuration loaded and validated successfully");
    Ok(config)
}

fn load_from_file(config_path: &Path) -> Result<PoolConfig> {
    let content = std::fs::read_to_string(config_path).map_err(|_| PoolError::ConfigNotFound {
        path: config_path.display().to_string(),
    })?;

    serde_yaml::from_str(&content).map_err(|e| PoolError::ConfigParse {
        message: format!("Failed to parse config file: {e}"),
        line: e.location().map(|loc| loc.line()),
    })
}

fn override_with_env(config: &mut PoolConfig) {
    if let Ok(path) = std::env::var("KEY_POOL_STORAGE_PATH") {
        info!("Overriding storage path from environment variable");
        config.storage.path = PathBuf::from(path);
    }

    if let Ok(backend) = std::env::var("KEY_POOL_STORAGE_BACKEND") {
        match backend.parse::<StorageBackend>() {
            Ok(parsed) => {
                info!("Overriding storage backend from environment variable: {:?}", parsed);
                config.storage.backend = parsed;
            }
            Err(e) => warn!("Invalid KEY_POOL_STORAGE_BACKEND environment variable: {}", e),
        }
    }

    if let Ok(redis_url) = std::env::var("REDIS_URL") {
        info!("Overriding Redis URL from environment variable");
        config.storage.redis_url = Some(redis_url);
    }

    if let Ok(concurrency_str) = std::env::var("KEY_POOL_CONCURRENCY") {
        if let Ok(concurrency) = concurrency_str.parse::<usize>() {
            info!("Overriding concurrency from environment variable: {}", concurrency);
            config.pool.concurrency = concurrency;
        } else {
            warn!("Invalid KEY_POOL_CONCURRENCY environment variable: {}", concurrency_str);
        }
    }
}

/// Resolve the config path from an explicit override, `KEY_POOL_CONFIG`, or the default.
pub fn resolve_config_path(config_path_override: Option<PathBuf>) -> PathBuf {
    config_path_override.unwrap_or_else(|| {
        std::env::var("KEY_POOL_CONFIG")
            .map_or_else(|_| PathBuf::from("key_pool.yaml"), PathBuf::from)
    })
}

/// Save configuration to file
pub async fn save_config(config: &PoolConfig, config_path: &Path) -> Result<()> {
    let yaml_content = serde_yaml::to_string(config).map_err(|e| PoolError::Serialization {
        message: format!("Failed to serialize config: {e}"),
    })?;

    tokio::fs::write(config_path, yaml_content)
        .await
        .map_err(|e| PoolError::Io {
            operation: "write_config".to_string(),
            message: format!("Failed to write config file: {e}"),
        })?;

    info!("Configuration saved to: {}", config_path.display());
    Ok(())
}
