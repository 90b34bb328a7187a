//! Pool metrics via the `metrics` crate facade.
//!
//! The library only records; installing an exporter is up to the embedding
//! application. Without the `metrics` feature every function is a no-op.

#[cfg(feature = "metrics")]
mod imp {
    use metrics::{counter, gauge};

    pub fn key_acquired(key_id: &str, strategy: &'static str) {
        counter!(
            "key_pool_acquisitions_total",
            "key_id" => key_id.to_string(),
            "strategy" => strategy
        )
        .increment(1);
    }

    pub fn key_error(key_id: &str) {
        counter!("key_pool_errors_total", "key_id" => key_id.to_string()).increment(1);
    }

    pub fn key_cooldown(key_id: &str) {
        counter!("key_pool_cooldowns_total", "key_id" => key_id.to_string()).increment(1);
    }

    pub fn pending_requests(count: usize) {
        gauge!("key_pool_pending_requests").set(count as f64);
    }

    pub fn available_keys(count: usize) {
        gauge!("key_pool_available_keys").set(count as f64);
    }
}

#[cfg(not(feature = "metrics"))]
mod imp {
    pub fn key_acquired(_key_id: &str, _strategy: &'static str) {}
    pub fn key_error(_key_id: &str) {}
    pub fn key_cooldown(_key_id: &str) {}
    pub fn pending_requests(_count: usize) {}
    pub fn available_keys(_count: usize) {}
}

pub use imp::*;
