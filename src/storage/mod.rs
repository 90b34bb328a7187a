// src/storage/mod.rs

pub mod file;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod traits;

pub use file::JsonFileStore;
pub use memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
pub use traits::KeyValueStore;
