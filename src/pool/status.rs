// src/pool/status.rs

use crate::pool::record::ApiKeyRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Why a key is or is not eligible for selection right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum KeyHealth {
    Available,
    CoolingDown {
        #[serde(rename = "remaining_ms", serialize_with = "serialize_millis")]
        remaining: Duration,
    },
    Disabled,
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

impl KeyHealth {
    pub fn of(record: &ApiKeyRecord, now: DateTime<Utc>) -> Self {
        if !record.is_active {
            return Self::Disabled;
        }
        match record.cooldown_until {
            Some(until) if until > now => Self::CoolingDown {
                remaining: (until - now).to_std().unwrap_or_default(),
            },
            _ => Self::Available,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

/// Display-safe view of one key. Carries the masked form only.
#[derive(Debug, Clone, Serialize)]
pub struct KeyStatus {
    pub id: String,
    pub name: String,
    pub masked_key: String,
    pub health: KeyHealth,
    pub pending: usize,
    pub request_count: u64,
    pub total_requests: u64,
    pub total_errors: u64,
    pub error_count: u64,
    pub consecutive_errors: u32,
    pub avg_response_time_ms: f64,
    pub last_used: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_time: Option<DateTime<Utc>>,
    pub is_active_key: bool,
}

impl KeyStatus {
    pub(crate) fn new(
        record: &ApiKeyRecord,
        pending: usize,
        is_active_key: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            masked_key: record.masked_key.clone(),
            health: KeyHealth::of(record, now),
            pending,
            request_count: record.request_count,
            total_requests: record.total_requests,
            total_errors: record.total_errors,
            error_count: record.error_count,
            consecutive_errors: record.consecutive_errors,
            avg_response_time_ms: record.avg_response_time_ms,
            last_used: record.last_used,
            last_error: record.last_error.clone(),
            last_error_time: record.last_error_time,
            is_active_key,
        }
    }
}

/// Read-only pool summary for a settings or dashboard view
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub total_keys: usize,
    pub available_keys: usize,
    pub active_key: Option<KeyStatus>,
    pub pending_requests: usize,
    pub concurrency: usize,
    pub keys: Vec<KeyStatus>,
}
