// src/pool/selection.rs

use crate::pool::record::ApiKeyRecord;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A key eligible for selection, with its in-flight load.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// Position of the key in the pool's registration order
    pub index: usize,
    pub record: &'a ApiKeyRecord,
    pub pending: usize,
}

/// Strategy for picking the next key out of the availability set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionStrategy {
    /// Cycle through available keys with a persistent cursor.
    RoundRobin,
    /// Fewest in-flight requests first, then fewest consecutive errors.
    #[default]
    LeastLoaded,
}

impl SelectionStrategy {
    /// Returns the registration index of the chosen key.
    pub fn select(&self, candidates: &[Candidate<'_>], cursor: &mut usize) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        match self {
            Self::RoundRobin => {
                let position = *cursor % candidates.len();
                *cursor = (position + 1) % candidates.len();
                Some(candidates[position].index)
            }
            // min_by_key keeps the first minimum, so ties fall back to registration order.
            Self::LeastLoaded => candidates
                .iter()
                .min_by_key(|c| (c.pending, c.record.consecutive_errors))
                .map(|c| c.index),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastLoaded => "least_loaded",
        }
    }
}

/// Keys that are enabled and not cooling down at `now`, in registration order.
pub fn availability_set<'a>(
    keys: &'a [ApiKeyRecord],
    pending_by_key: &HashMap<&str, usize>,
    now: DateTime<Utc>,
) -> Vec<Candidate<'a>> {
    keys.iter()
        .enumerate()
        .filter(|(_, record)| record.is_available(now))
        .map(|(index, record)| Candidate {
            index,
            record,
            pending: pending_by_key.get(record.id.as_str()).copied().unwrap_or(0),
        })
        .collect()
}
