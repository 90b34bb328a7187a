// src/config/app.rs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    File,
    Redis,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown storage backend '{other}'")),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub redis_key_prefix: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
            redis_url: None,
            redis_key_prefix: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct PoolSettings {
    /// Initial parallel calls per batch, used when nothing has been persisted yet.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    #[serde(default = "default_base_cooldown")]
    pub base_cooldown_secs: u64,
    #[serde(default = "default_max_cooldown")]
    pub max_cooldown_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            error_threshold: default_error_threshold(),
            base_cooldown_secs: default_base_cooldown(),
            max_cooldown_secs: default_max_cooldown(),
        }
    }
}

impl PoolSettings {
    pub fn base_cooldown(&self) -> Duration {
        Duration::from_secs(self.base_cooldown_secs)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_secs(self.max_cooldown_secs)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default, Serialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

// Default value functions
fn default_storage_path() -> PathBuf {
    PathBuf::from("key_pool.json")
}

fn default_concurrency() -> usize {
    3
}

fn default_error_threshold() -> u32 {
    3
}

fn default_base_cooldown() -> u64 {
    30
}

fn default_max_cooldown() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

impl PoolConfig {
    /// Redis key prefix, falling back to the crate default.
    pub fn redis_key_prefix(&self) -> &str {
        self.storage
            .redis_key_prefix
            .as_deref()
            .unwrap_or("key_pool:")
    }
}
