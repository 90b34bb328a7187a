// src/pool/mod.rs

//! Multi-key request distribution pool.
//!
//! `KeyPool` owns the registered API keys, tracks requests in flight against
//! each of them, and decides which key the next outbound call should use.
//! Every state transition runs under one synchronous lock and never awaits,
//! so concurrent acquisitions cannot double-count load. Persistence is a
//! write-behind cache fed through a `watch` channel.

pub mod cooldown;
pub mod executor;
pub mod observer;
pub mod record;
pub mod selection;
pub mod status;

pub use cooldown::{parse_retry_after, CooldownPolicy};
pub use executor::{BatchOutcome, ExecuteError, ExecuteOptions, ParallelOptions, ProgressFn};
pub use observer::{Listener, SubscriptionId};
pub use record::{mask_secret, ApiKeyRecord, KeyId, PendingRequest, RequestId};
pub use selection::SelectionStrategy;
pub use status::{KeyHealth, KeyStatus, PoolStatus};

use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::metrics;
use crate::storage::{InMemoryStore, KeyValueStore};
use chrono::Utc;
use observer::ListenerRegistry;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Storage key the pool blob is persisted under.
pub const STORAGE_KEY: &str = "api_key_pool";

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 16;

/// Persisted form of the pool. Pending requests are never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedPool {
    #[serde(default)]
    pub keys: Vec<ApiKeyRecord>,
    #[serde(default)]
    pub active_key_id: Option<KeyId>,
    /// Absent in blobs that never stored it; the configured value applies then.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

struct PoolState {
    // Registration order doubles as the round-robin order.
    keys: Vec<ApiKeyRecord>,
    pending: HashMap<RequestId, PendingRequest>,
    active_key_id: Option<KeyId>,
    concurrency: usize,
    cursor: usize,
}

impl PoolState {
    fn position(&self, key_id: &str) -> Option<usize> {
        self.keys.iter().position(|k| k.id == key_id)
    }

    fn key_mut(&mut self, key_id: &str) -> Option<&mut ApiKeyRecord> {
        self.keys.iter_mut().find(|k| k.id == key_id)
    }

    fn pending_for(&self, key_id: &str) -> usize {
        self.pending.values().filter(|p| p.key_id == key_id).count()
    }

    fn available_count(&self) -> usize {
        let now = Utc::now();
        self.keys.iter().filter(|k| k.is_available(now)).count()
    }

    /// Pick a key and charge the acquisition to it.
    fn acquire(&mut self, strategy: SelectionStrategy) -> Option<usize> {
        let now = Utc::now();
        let Self {
            keys,
            pending,
            cursor,
            ..
        } = self;

        let selected = {
            let mut pending_by_key: HashMap<&str, usize> = HashMap::new();
            for request in pending.values() {
                *pending_by_key.entry(request.key_id.as_str()).or_insert(0) += 1;
            }
            let candidates = selection::availability_set(keys, &pending_by_key, now);
            strategy.select(&candidates, cursor)
        }?;

        keys[selected].mark_acquired(now);
        Some(selected)
    }

    fn snapshot(&self) -> PersistedPool {
        PersistedPool {
            keys: self.keys.clone(),
            active_key_id: self.active_key_id.clone(),
            concurrency: Some(self.concurrency),
        }
    }
}

/// Process-wide pool of API keys. Construct one at the composition root and
/// share it (usually behind an `Arc`).
pub struct KeyPool {
    state: Mutex<PoolState>,
    policy: CooldownPolicy,
    execute_defaults: ExecuteOptions,
    listeners: ListenerRegistry,
    store: Arc<dyn KeyValueStore>,
    persist_tx: watch::Sender<PersistedPool>,
    // Held until a Tokio runtime is around to run the writer.
    writer_rx: Mutex<Option<watch::Receiver<PersistedPool>>>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl KeyPool {
    /// Create an empty pool writing through to `store`.
    ///
    /// The persistence writer is spawned onto the current Tokio runtime. A pool
    /// built outside one starts its writer on the first mutation or `flush`
    /// made from inside a runtime.
    pub fn new(store: Arc<dyn KeyValueStore>, config: &PoolConfig) -> Self {
        Self::from_parts(store, config, None)
    }

    /// Pool with default settings backed by an in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()), &PoolConfig::default())
    }

    /// Restore the pool from `store`. A missing or unreadable blob yields an
    /// empty pool; the store is a cache, not a source of truth.
    #[instrument(
        skip(store, config),
        fields(store.backend = store.backend_name()),
        name = "key_pool_load"
    )]
    pub async fn load(store: Arc<dyn KeyValueStore>, config: &PoolConfig) -> Self {
        let persisted = match store.get(STORAGE_KEY).await {
            Ok(Some(blob)) => match serde_json::from_str::<PersistedPool>(&blob) {
                Ok(persisted) => {
                    info!(keys = persisted.keys.len(), "Restored key pool from storage");
                    Some(persisted)
                }
                Err(e) => {
                    warn!(error = %e, "Stored key pool is unreadable. Starting empty.");
                    None
                }
            },
            Ok(None) => {
                info!("No stored key pool found. Starting empty.");
                None
            }
            Err(e) => {
                e.log("load_pool");
                None
            }
        };
        Self::from_parts(store, config, persisted)
    }

    fn from_parts(
        store: Arc<dyn KeyValueStore>,
        config: &PoolConfig,
        persisted: Option<PersistedPool>,
    ) -> Self {
        let (keys, active_key_id, concurrency) = match persisted {
            Some(p) => (
                p.keys,
                p.active_key_id,
                p.concurrency.unwrap_or(config.pool.concurrency),
            ),
            None => (Vec::new(), None, config.pool.concurrency),
        };

        let active_key_id = active_key_id
            .filter(|id| keys.iter().any(|k| &k.id == id))
            .or_else(|| keys.first().map(|k| k.id.clone()));

        let state = PoolState {
            keys,
            pending: HashMap::new(),
            active_key_id,
            concurrency: concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY),
            cursor: 0,
        };

        let (persist_tx, persist_rx) = watch::channel(state.snapshot());

        let pool = Self {
            state: Mutex::new(state),
            policy: CooldownPolicy::from(&config.pool),
            execute_defaults: ExecuteOptions::from(&config.retry),
            listeners: ListenerRegistry::default(),
            store,
            persist_tx,
            writer_rx: Mutex::new(Some(persist_rx)),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        };
        pool.start_writer();
        pool
    }

    fn start_writer(&self) {
        let mut pending = self.writer_rx.lock();
        if pending.is_none() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if let Some(rx) = pending.take() {
            spawn_writer(
                &handle,
                Arc::clone(&self.store),
                rx,
                Arc::clone(&self.write_lock),
            );
        }
    }

    pub fn policy(&self) -> CooldownPolicy {
        self.policy
    }

    /// Retry settings from configuration, for `execute_with_key`.
    pub fn execute_options(&self) -> ExecuteOptions {
        self.execute_defaults.clone()
    }

    fn publish(&self, state: &PoolState) {
        self.start_writer();
        self.persist_tx.send_replace(state.snapshot());
        metrics::pending_requests(state.pending.len());
    }

    // --- Registration ---

    /// Register a key. The first key registered becomes the active key.
    pub fn add_key(&self, name: &str, secret: &str) -> Result<ApiKeyRecord> {
        if name.trim().is_empty() {
            return Err(PoolError::validation("name", "Key name cannot be empty"));
        }
        if secret.trim().is_empty() {
            return Err(PoolError::validation("secret", "Key secret cannot be empty"));
        }

        let record = ApiKeyRecord::new(name, secret);
        {
            let mut state = self.state.lock();
            if state
                .keys
                .iter()
                .any(|k| k.secret.expose_secret() == record.secret.expose_secret())
            {
                return Err(PoolError::validation(
                    "secret",
                    format!("Key {} is already registered", record.masked_key),
                ));
            }
            state.keys.push(record.clone());
            if state.active_key_id.is_none() {
                state.active_key_id = Some(record.id.clone());
            }
            self.publish(&state);
        }

        info!(
            key.id = %record.id,
            key.masked = %record.masked_key,
            key.name = %record.name,
            "API key added"
        );
        self.listeners.notify();
        Ok(record)
    }

    /// Delete a key. Requests already in flight against it may still complete.
    pub fn remove_key(&self, key_id: &str) -> bool {
        {
            let mut state = self.state.lock();
            let Some(position) = state.position(key_id) else {
                return false;
            };
            let removed = state.keys.remove(position);
            if state.active_key_id.as_deref() == Some(key_id) {
                state.active_key_id = state.keys.first().map(|k| k.id.clone());
            }
            let in_flight = state.pending_for(key_id);
            self.publish(&state);
            info!(
                key.id = %removed.id,
                key.masked = %removed.masked_key,
                in_flight,
                "API key removed"
            );
        }
        self.listeners.notify();
        true
    }

    pub fn rename_key(&self, key_id: &str, name: &str) -> Result<bool> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PoolError::validation("name", "Key name cannot be empty"));
        }
        {
            let mut state = self.state.lock();
            let Some(key) = state.key_mut(key_id) else {
                return Ok(false);
            };
            key.name = name.to_string();
            self.publish(&state);
        }
        self.listeners.notify();
        Ok(true)
    }

    /// Enable or disable a key. Disabled keys are never selected.
    pub fn set_key_enabled(&self, key_id: &str, enabled: bool) -> bool {
        {
            let mut state = self.state.lock();
            let Some(key) = state.key_mut(key_id) else {
                return false;
            };
            key.is_active = enabled;
            info!(key.id = %key.id, key.masked = %key.masked_key, enabled, "API key toggled");
            self.publish(&state);
        }
        self.listeners.notify();
        true
    }

    /// Designate the key used by single-key call sites.
    pub fn set_active_key(&self, key_id: &str) -> bool {
        {
            let mut state = self.state.lock();
            if state.position(key_id).is_none() {
                return false;
            }
            state.active_key_id = Some(key_id.to_string());
            self.publish(&state);
        }
        self.listeners.notify();
        true
    }

    pub fn clear_active_key(&self) {
        {
            let mut state = self.state.lock();
            state.active_key_id = None;
            self.publish(&state);
        }
        self.listeners.notify();
    }

    pub fn active_key(&self) -> Option<ApiKeyRecord> {
        let state = self.state.lock();
        let id = state.active_key_id.as_deref()?;
        state.keys.iter().find(|k| k.id == id).cloned()
    }

    pub fn active_secret(&self) -> Option<SecretString> {
        self.active_key().map(|k| k.secret)
    }

    pub fn keys(&self) -> Vec<ApiKeyRecord> {
        self.state.lock().keys.clone()
    }

    pub fn key(&self, key_id: &str) -> Option<ApiKeyRecord> {
        self.state.lock().keys.iter().find(|k| k.id == key_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // --- Selection ---

    /// Next available key in round-robin order, or `None` if no key is usable.
    pub fn acquire_key(&self) -> Option<ApiKeyRecord> {
        self.acquire(SelectionStrategy::RoundRobin)
    }

    /// Available key with the fewest in-flight requests, then fewest consecutive errors.
    pub fn acquire_key_balanced(&self) -> Option<ApiKeyRecord> {
        self.acquire(SelectionStrategy::LeastLoaded)
    }

    pub fn acquire(&self, strategy: SelectionStrategy) -> Option<ApiKeyRecord> {
        let record = {
            let mut state = self.state.lock();
            let index = state.acquire(strategy);
            metrics::available_keys(state.available_count());
            match index {
                Some(index) => {
                    self.publish(&state);
                    state.keys[index].clone()
                }
                None => {
                    warn!(strategy = strategy.as_str(), "No API keys available for selection");
                    return None;
                }
            }
        };
        debug!(
            key.id = %record.id,
            key.masked = %record.masked_key,
            strategy = strategy.as_str(),
            "Selected API key"
        );
        metrics::key_acquired(&record.id, strategy.as_str());
        Some(record)
    }

    /// Acquire and start tracking in one step, so no other caller can observe
    /// the key between the two.
    pub(crate) fn acquire_and_start(
        &self,
        strategy: SelectionStrategy,
    ) -> Option<(ApiKeyRecord, RequestId)> {
        let (record, request_id) = {
            let mut state = self.state.lock();
            let index = state.acquire(strategy)?;
            let record = state.keys[index].clone();
            let request = PendingRequest::new(record.id.clone());
            let request_id = request.id.clone();
            state.pending.insert(request_id.clone(), request);
            self.publish(&state);
            (record, request_id)
        };
        debug!(
            key.id = %record.id,
            key.masked = %record.masked_key,
            request.id = %request_id,
            strategy = strategy.as_str(),
            "Selected API key and started request"
        );
        metrics::key_acquired(&record.id, strategy.as_str());
        Some((record, request_id))
    }

    // --- Request accounting ---

    /// Begin tracking a call charged against `key_id`.
    pub fn start_request(&self, key_id: &str) -> Result<RequestId> {
        let mut state = self.state.lock();
        if state.position(key_id).is_none() {
            return Err(PoolError::key_not_found(key_id));
        }
        let request = PendingRequest::new(key_id.to_string());
        let request_id = request.id.clone();
        state.pending.insert(request_id.clone(), request);
        metrics::pending_requests(state.pending.len());
        Ok(request_id)
    }

    /// Record a successful call. Unknown request ids are ignored.
    pub fn complete_request(&self, request_id: &str) {
        {
            let mut state = self.state.lock();
            let Some(request) = state.pending.remove(request_id) else {
                return;
            };
            let latency_ms = request.elapsed_ms();
            if let Some(key) = state.key_mut(&request.key_id) {
                key.record_success(latency_ms);
                debug!(key.id = %key.id, latency_ms, "Request completed");
            }
            self.publish(&state);
        }
        self.listeners.notify();
    }

    /// Record a failed call and cool the key down when warranted.
    ///
    /// A `retry_after` hint cools the key down for exactly that long (clamped to
    /// the maximum cooldown) regardless of its error streak. Unknown request ids
    /// are ignored.
    pub fn report_error(&self, request_id: &str, message: &str, retry_after: Option<Duration>) {
        {
            let mut state = self.state.lock();
            let Some(request) = state.pending.remove(request_id) else {
                return;
            };
            let policy = self.policy;
            if let Some(key) = state.key_mut(&request.key_id) {
                let now = Utc::now();
                key.record_failure(message, now);
                metrics::key_error(&key.id);

                match policy.cooldown_for(key.consecutive_errors, retry_after) {
                    Some(cooldown) => {
                        let delta = chrono::Duration::from_std(cooldown)
                            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
                        key.cooldown_until = now.checked_add_signed(delta);
                        metrics::key_cooldown(&key.id);
                        warn!(
                            key.id = %key.id,
                            key.masked = %key.masked_key,
                            consecutive_errors = key.consecutive_errors,
                            cooldown_ms = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX),
                            from_hint = retry_after.is_some(),
                            error = message,
                            "API key cooling down"
                        );
                    }
                    None => {
                        warn!(
                            key.id = %key.id,
                            key.masked = %key.masked_key,
                            consecutive_errors = key.consecutive_errors,
                            error = message,
                            "API call failed"
                        );
                    }
                }
            }
            self.publish(&state);
        }
        self.listeners.notify();
    }

    /// Stop tracking a call that was cancelled before it could report back.
    /// The key's health counters are left untouched.
    pub fn abandon_request(&self, request_id: &str) {
        let mut state = self.state.lock();
        if let Some(request) = state.pending.remove(request_id) {
            debug!(key.id = %request.key_id, request.id = %request_id, "Request abandoned");
            metrics::pending_requests(state.pending.len());
        }
    }

    /// Manually clear a key's error streak and cooldown.
    pub fn reset_key_errors(&self, key_id: &str) -> bool {
        {
            let mut state = self.state.lock();
            let Some(key) = state.key_mut(key_id) else {
                return false;
            };
            key.reset_errors();
            info!(key.id = %key.id, key.masked = %key.masked_key, "API key errors reset");
            self.publish(&state);
        }
        self.listeners.notify();
        true
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.state.lock().pending.contains_key(request_id)
    }

    /// In-flight requests charged against `key_id`.
    pub fn pending_for(&self, key_id: &str) -> usize {
        self.state.lock().pending_for(key_id)
    }

    pub fn pending_requests(&self) -> usize {
        self.state.lock().pending.len()
    }

    // --- Settings and status ---

    /// Set parallel calls per batch, clamped to 1..=16. Returns the stored value.
    pub fn set_concurrency(&self, concurrency: usize) -> usize {
        let stored = concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY);
        {
            let mut state = self.state.lock();
            state.concurrency = stored;
            self.publish(&state);
        }
        debug!(requested = concurrency, stored, "Concurrency updated");
        self.listeners.notify();
        stored
    }

    pub fn concurrency(&self) -> usize {
        self.state.lock().concurrency
    }

    pub fn key_health(&self, key_id: &str) -> Option<KeyHealth> {
        let state = self.state.lock();
        let now = Utc::now();
        state.keys.iter().find(|k| k.id == key_id).map(|k| KeyHealth::of(k, now))
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        let now = Utc::now();
        let keys: Vec<KeyStatus> = state
            .keys
            .iter()
            .map(|k| {
                let is_active_key = state.active_key_id.as_deref() == Some(k.id.as_str());
                KeyStatus::new(k, state.pending_for(&k.id), is_active_key, now)
            })
            .collect();
        let available_keys = keys.iter().filter(|k| k.health.is_available()).count();
        metrics::available_keys(available_keys);

        PoolStatus {
            total_keys: keys.len(),
            available_keys,
            active_key: keys.iter().find(|k| k.is_active_key).cloned(),
            pending_requests: state.pending.len(),
            concurrency: state.concurrency,
            keys,
        }
    }

    // --- Observers ---

    /// Register a callback fired after every state change.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.listeners.subscribe(Arc::new(listener));
        debug!(listeners = self.listeners.len(), "Pool listener subscribed");
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    // --- Persistence ---

    /// Write the current state to the store and wait for it.
    pub async fn flush(&self) -> Result<()> {
        self.start_writer();
        let _guard = self.write_lock.lock().await;
        let snapshot = self.persist_tx.borrow().clone();
        persist(self.store.as_ref(), &snapshot).await
    }
}

async fn persist(store: &dyn KeyValueStore, snapshot: &PersistedPool) -> Result<()> {
    let blob = serde_json::to_string(snapshot)?;
    store.set(STORAGE_KEY, blob).await
}

/// Persist the latest snapshot whenever it changes. Bursts of mutations
/// collapse into one write; failures are logged and skipped.
fn spawn_writer(
    handle: &tokio::runtime::Handle,
    store: Arc<dyn KeyValueStore>,
    mut rx: watch::Receiver<PersistedPool>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
) {
    handle.spawn(async move {
        while rx.changed().await.is_ok() {
            let _guard = write_lock.lock().await;
            let snapshot = rx.borrow_and_update().clone();
            if let Err(e) = persist(store.as_ref(), &snapshot).await {
                e.log("persist_pool");
            }
        }
        debug!("Key pool persistence writer stopped");
    });
}
