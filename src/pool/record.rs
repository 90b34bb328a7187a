// src/pool/record.rs

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use std::time::Instant;
use uuid::Uuid;

/// Width of the mask placed between the visible head and tail of a secret.
const MASK_WIDTH: usize = 8;
const VISIBLE_CHARS: usize = 4;

/// Weight kept from the previous latency average on each new sample.
const LATENCY_DECAY: f64 = 0.9;

pub type KeyId = String;
pub type RequestId = String;

/// One registered API credential and its live health accounting.
///
/// Records handed out by the pool are snapshots; mutating one does not touch
/// pool state.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRecord {
    pub id: KeyId,
    pub name: String,
    #[serde(serialize_with = "serialize_secret")]
    pub secret: SecretString,
    pub masked_key: String,
    pub is_active: bool,
    #[serde(default)]
    pub request_count: u64,
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub total_errors: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub consecutive_errors: u32,
    #[serde(default)]
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Moving average of successful call latency in milliseconds.
    #[serde(default)]
    pub avg_response_time_ms: f64,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_error_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn serialize_secret<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

impl ApiKeyRecord {
    /// Create a fresh record with zeroed counters. Inputs are trimmed.
    pub fn new(name: &str, secret: &str) -> Self {
        let secret = secret.trim();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            masked_key: mask_secret(secret),
            secret: Secret::new(secret.to_string()),
            is_active: true,
            request_count: 0,
            total_requests: 0,
            total_errors: 0,
            error_count: 0,
            consecutive_errors: 0,
            cooldown_until: None,
            avg_response_time_ms: 0.0,
            last_used: None,
            last_error: None,
            last_error_time: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the key can be handed out at `now`.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_cooling_down(now)
    }

    pub fn is_cooling_down(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }

    pub(crate) fn mark_acquired(&mut self, now: DateTime<Utc>) {
        self.request_count += 1;
        self.last_used = Some(now);
    }

    pub(crate) fn record_success(&mut self, latency_ms: f64) {
        self.total_requests += 1;
        self.consecutive_errors = 0;
        self.cooldown_until = None;
        self.avg_response_time_ms = if self.avg_response_time_ms > 0.0 {
            self.avg_response_time_ms * LATENCY_DECAY + latency_ms * (1.0 - LATENCY_DECAY)
        } else {
            latency_ms
        };
    }

    pub(crate) fn record_failure(&mut self, message: &str, now: DateTime<Utc>) {
        self.total_errors += 1;
        self.error_count += 1;
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.last_error = Some(message.to_string());
        self.last_error_time = Some(now);
    }

    /// Manual recovery; lifetime `total_errors` is preserved.
    pub(crate) fn reset_errors(&mut self) {
        self.consecutive_errors = 0;
        self.error_count = 0;
        self.cooldown_until = None;
        self.last_error = None;
    }
}

/// An in-flight call charged against a key.
#[derive(Clone, Debug)]
pub struct PendingRequest {
    pub id: RequestId,
    pub key_id: KeyId,
    pub started_at: DateTime<Utc>,
    pub(crate) start: Instant,
}

impl PendingRequest {
    pub fn new(key_id: KeyId) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            key_id,
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

/// Display form of a secret: first and last four characters around a fixed mask.
///
/// Secrets too short to keep anything hidden are masked entirely.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= VISIBLE_CHARS * 2 {
        return "*".repeat(MASK_WIDTH);
    }
    let head: String = chars[..VISIBLE_CHARS].iter().collect();
    let tail: String = chars[chars.len() - VISIBLE_CHARS..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(MASK_WIDTH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mask_keeps_head_and_tail() {
        let masked = mask_secret("sk-ABCDEFGHIJKL");
        assert_eq!(masked, "sk-A********IJKL");
        assert!(!masked.contains("sk-ABCDEFGHIJKL"));
    }

    #[test]
    fn test_mask_short_secret_fully_hidden() {
        assert_eq!(mask_secret("abcdefgh"), "********");
        assert_eq!(mask_secret(""), "********");
    }

    #[test]
    fn test_mask_handles_multibyte() {
        let masked = mask_secret("ключ-секретный-1234");
        assert!(masked.starts_with("ключ"));
        assert!(masked.ends_with("1234"));
    }

    #[test]
    fn test_new_record_trims_and_zeroes() {
        let record = ApiKeyRecord::new("  primary ", "  sk-ABCDEFGHIJKL\n");
        assert_eq!(record.name, "primary");
        assert_eq!(record.secret.expose_secret(), "sk-ABCDEFGHIJKL");
        assert!(record.is_active);
        assert_eq!(record.request_count, 0);
        assert_eq!(record.consecutive_errors, 0);
        assert!(record.cooldown_until.is_none());
    }

    #[test]
    fn test_latency_average_seeds_then_decays() {
        let mut record = ApiKeyRecord::new("k", "sk-ABCDEFGHIJKL");
        record.record_success(100.0);
        assert!((record.avg_response_time_ms - 100.0).abs() < f64::EPSILON);
        record.record_success(200.0);
        assert!((record.avg_response_time_ms - 110.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset_preserves_lifetime_errors() {
        let now = Utc::now();
        let mut record = ApiKeyRecord::new("k", "sk-ABCDEFGHIJKL");
        record.record_failure("boom", now);
        record.record_failure("boom", now);
        record.cooldown_until = Some(now + chrono::Duration::seconds(30));
        record.reset_errors();
        assert_eq!(record.consecutive_errors, 0);
        assert_eq!(record.error_count, 0);
        assert_eq!(record.total_errors, 2);
        assert!(record.cooldown_until.is_none());
        assert!(record.last_error.is_none());
    }

    #[test]
    fn test_debug_never_prints_secret() {
        let record = ApiKeyRecord::new("k", "sk-ABCDEFGHIJKL");
        assert!(!format!("{record:?}").contains("sk-ABCDEFGHIJKL"));
    }

    proptest! {
        #[test]
        fn prop_mask_never_contains_full_secret(secret in "[A-Za-z0-9_-]{9,64}") {
            let masked = mask_secret(&secret);
            prop_assert!(!masked.contains(&secret));
            prop_assert!(masked.starts_with(&secret[..4]));
            prop_assert!(masked.ends_with(&secret[secret.len() - 4..]));
        }
    }
}
