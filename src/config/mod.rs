// src/config/mod.rs

pub mod app;
pub mod loader;
pub mod validation;

pub use app::{PoolConfig, PoolSettings, RetrySettings, StorageBackend, StorageConfig};
pub use loader::{load_config, resolve_config_path, save_config};
pub use validation::ConfigValidator;
