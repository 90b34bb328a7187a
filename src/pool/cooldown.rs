// src/pool/cooldown.rs

use crate::config::PoolSettings;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

/// Matches provider hints such as "retry in 12s" or "Retry 2.5s".
static RETRY_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)retry(?:\s*in)?\s*([0-9]+(?:\.[0-9]+)?)s").expect("retry hint regex is valid")
});

/// When and for how long a failing key is taken out of rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    /// Consecutive failures that trigger a cooldown without a retry hint.
    pub error_threshold: u32,
    pub base_cooldown: Duration,
    pub max_cooldown: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            error_threshold: 3,
            base_cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
        }
    }
}

impl From<&PoolSettings> for CooldownPolicy {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            error_threshold: settings.error_threshold.max(1),
            base_cooldown: settings.base_cooldown(),
            max_cooldown: settings.max_cooldown(),
        }
    }
}

impl CooldownPolicy {
    /// Exponential backoff: `base * 2^(consecutive_errors - 1)`, capped at `max_cooldown`.
    pub fn backoff(&self, consecutive_errors: u32) -> Duration {
        let exponent = consecutive_errors.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_cooldown.checked_mul(factor))
            .map_or(self.max_cooldown, |d| d.min(self.max_cooldown))
    }

    /// Cooldown to apply after a failure, if any.
    ///
    /// An explicit retry hint always wins and is clamped to `max_cooldown`.
    pub fn cooldown_for(
        &self,
        consecutive_errors: u32,
        retry_after: Option<Duration>,
    ) -> Option<Duration> {
        match retry_after {
            Some(hint) => Some(hint.min(self.max_cooldown)),
            None if consecutive_errors >= self.error_threshold => {
                Some(self.backoff(consecutive_errors))
            }
            None => None,
        }
    }
}

/// Extract a retry-after hint from a provider error message.
///
/// Values too large to represent saturate, and are clamped later by the policy.
pub fn parse_retry_after(message: &str) -> Option<Duration> {
    let captures = RETRY_HINT.captures(message)?;
    let seconds: f64 = captures.get(1)?.as_str().parse().ok()?;
    Some(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX))
}
