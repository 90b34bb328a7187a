// src/pool/executor.rs

use crate::config::RetrySettings;
use crate::pool::cooldown::parse_retry_after;
use crate::pool::record::{KeyId, RequestId};
use crate::pool::selection::SelectionStrategy;
use crate::pool::KeyPool;
use futures_util::future::join_all;
use secrecy::SecretString;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure surfaced by `execute_with_key` once retries are exhausted.
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    /// No key was available to try. `last` holds the error from an earlier
    /// attempt if one ran before the pool emptied.
    #[error("No API keys available")]
    NoKeysAvailable { last: Option<E> },
    /// The last error returned by the caller's operation.
    #[error("{0}")]
    Operation(E),
}

impl<E> ExecuteError<E> {
    pub fn is_no_keys(&self) -> bool {
        matches!(self, Self::NoKeysAvailable { .. })
    }

    /// The last error the caller's operation returned, if any attempt ran.
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::NoKeysAvailable { last } => last,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Total attempts, each on a freshly selected key.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub strategy: SelectionStrategy,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            strategy: SelectionStrategy::LeastLoaded,
        }
    }
}

impl From<&RetrySettings> for ExecuteOptions {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            ..Self::default()
        }
    }
}

/// Progress callback: `(completed, total)`, fired once per finished item.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ParallelOptions {
    /// Items per batch; defaults to the pool's concurrency setting.
    pub max_concurrency: Option<usize>,
    /// Per-item retry behaviour; defaults to the pool's configured options.
    pub execute: Option<ExecuteOptions>,
    pub on_progress: Option<ProgressFn>,
}

/// Result for one item of `execute_parallel`, in input order.
#[derive(Debug)]
pub struct BatchOutcome<I, T, E> {
    pub index: usize,
    pub item: I,
    pub result: Result<T, ExecuteError<E>>,
}

impl<I, T, E> BatchOutcome<I, T, E> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&ExecuteError<E>> {
        self.result.as_ref().err()
    }
}

/// Releases a pending request if the operation future is dropped before it
/// reports back, so an abandoned call does not skew load accounting.
struct PendingGuard<'a> {
    pool: &'a KeyPool,
    request_id: RequestId,
    settled: bool,
}

impl PendingGuard<'_> {
    fn complete(mut self) {
        self.settled = true;
        self.pool.complete_request(&self.request_id);
    }

    fn fail(mut self, message: &str, retry_after: Option<Duration>) {
        self.settled = true;
        self.pool.report_error(&self.request_id, message, retry_after);
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.pool.abandon_request(&self.request_id);
        }
    }
}

fn delay_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

impl KeyPool {
    /// Run `operation` with a pooled key, retrying on a newly selected key
    /// after each failure.
    ///
    /// A failed key is reported before the next selection, so a retry usually
    /// lands on a different, healthier key. Retry hints such as "retry in 12s"
    /// in the error message cool the failed key down for that long. If no key
    /// is available the call fails at once without waiting out the remaining
    /// attempts.
    pub async fn execute_with_key<T, E, F, Fut>(
        &self,
        operation: F,
        options: &ExecuteOptions,
    ) -> Result<T, ExecuteError<E>>
    where
        F: Fn(SecretString, KeyId) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = options.max_retries.max(1);
        let mut last_error: Option<E> = None;

        for attempt in 1..=attempts {
            let Some((record, request_id)) = self.acquire_and_start(options.strategy) else {
                warn!(attempt, attempts, "No API keys available, aborting call");
                return Err(ExecuteError::NoKeysAvailable { last: last_error });
            };
            let guard = PendingGuard {
                pool: self,
                request_id,
                settled: false,
            };

            match operation(record.secret.clone(), record.id.clone()).await {
                Ok(value) => {
                    guard.complete();
                    if attempt > 1 {
                        debug!(key.id = %record.id, attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let message = err.to_string();
                    let retry_after = parse_retry_after(&message);
                    guard.fail(&message, retry_after);
                    last_error = Some(err);

                    if attempt < attempts {
                        debug!(
                            key.id = %record.id,
                            key.masked = %record.masked_key,
                            attempt,
                            attempts,
                            delay_ms = delay_ms(options.retry_delay),
                            "Call failed, retrying with another key"
                        );
                        tokio::time::sleep(options.retry_delay).await;
                    }
                }
            }
        }

        warn!(attempts, "All attempts failed");
        Err(match last_error {
            Some(err) => ExecuteError::Operation(err),
            None => ExecuteError::NoKeysAvailable { last: None },
        })
    }

    /// Run `operation` for every item, `max_concurrency` items at a time.
    ///
    /// Each batch runs concurrently and finishes before the next starts. Every
    /// item goes through `execute_with_key` and gets its own outcome, so one
    /// failure never aborts the others.
    pub async fn execute_parallel<I, T, E, F, Fut>(
        &self,
        items: Vec<I>,
        operation: F,
        options: ParallelOptions,
    ) -> Vec<BatchOutcome<I, T, E>>
    where
        I: Clone,
        F: Fn(I, SecretString, KeyId) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let total = items.len();
        let batch_size = options
            .max_concurrency
            .unwrap_or_else(|| self.concurrency())
            .max(1);
        let execute = options.execute.unwrap_or_else(|| self.execute_options());
        let on_progress = options.on_progress;
        let completed = AtomicUsize::new(0);

        let mut outcomes = Vec::with_capacity(total);
        let mut remaining = items.into_iter().enumerate();

        loop {
            let batch: Vec<(usize, I)> = remaining.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }
            debug!(batch.size = batch.len(), total, "Starting batch");

            let operation = &operation;
            let execute = &execute;
            let completed = &completed;
            let on_progress = on_progress.as_ref();

            let futures = batch.into_iter().map(move |(index, item)| async move {
                let result = self
                    .execute_with_key(
                        |secret, key_id| operation(item.clone(), secret, key_id),
                        execute,
                    )
                    .await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(callback) = on_progress {
                    callback(done, total);
                }
                BatchOutcome {
                    index,
                    item,
                    result,
                }
            });

            outcomes.extend(join_all(futures).await);
        }

        outcomes
    }
}
