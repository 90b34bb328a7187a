// tests/pool_selection_tests.rs

mod common;

use api_key_pool::pool::SelectionStrategy;
use common::{pool_with_keys, provider_error};
use std::collections::HashSet;
use std::time::Duration;

#[tokio::test]
async fn test_round_robin_selects_each_key_once() {
    let (pool, keys) = pool_with_keys(4);

    let selected: Vec<String> = (0..keys.len())
        .map(|_| pool.acquire_key().expect("key available").id)
        .collect();

    let unique: HashSet<&String> = selected.iter().collect();
    assert_eq!(unique.len(), keys.len());
    let expected: Vec<String> = keys.iter().map(|k| k.id.clone()).collect();
    assert_eq!(selected, expected);
}

#[tokio::test]
async fn test_round_robin_wraps_around() {
    let (pool, keys) = pool_with_keys(2);

    let ids: Vec<String> = (0..5).map(|_| pool.acquire_key().unwrap().id).collect();
    assert_eq!(ids[0], keys[0].id);
    assert_eq!(ids[1], keys[1].id);
    assert_eq!(ids[2], keys[0].id);
    assert_eq!(ids[4], keys[0].id);
}

#[tokio::test]
async fn test_balanced_prefers_idle_key() {
    let (pool, keys) = pool_with_keys(2);
    let a = &keys[0];
    let b = &keys[1];

    pool.start_request(&a.id).unwrap();
    pool.start_request(&a.id).unwrap();

    let selected = pool.acquire_key_balanced().expect("key available");
    assert_eq!(selected.id, b.id);
}

#[tokio::test]
async fn test_balanced_breaks_load_ties_by_error_streak() {
    let (pool, keys) = pool_with_keys(2);

    let request = pool.start_request(&keys[0].id).unwrap();
    pool.report_error(&request, "flaky upstream", None);

    let selected = pool.acquire_key_balanced().unwrap();
    assert_eq!(selected.id, keys[1].id);
}

#[tokio::test]
async fn test_acquire_increments_request_count_and_last_used() {
    let (pool, keys) = pool_with_keys(1);

    let acquired = pool.acquire_key_balanced().unwrap();
    assert_eq!(acquired.request_count, 1);
    assert!(acquired.last_used.is_some());

    pool.acquire(SelectionStrategy::RoundRobin).unwrap();
    assert_eq!(pool.key(&keys[0].id).unwrap().request_count, 2);
    // Acquisition alone does not track a request
    assert_eq!(pool.pending_requests(), 0);
}

#[tokio::test]
async fn test_cooling_key_is_never_selected() {
    let (pool, keys) = pool_with_keys(1);

    let request = pool.start_request(&keys[0].id).unwrap();
    pool.report_error(&request, "rate limited", Some(Duration::from_secs(30)));

    assert!(pool.key(&keys[0].id).unwrap().is_active);
    assert!(pool.acquire_key().is_none());
    assert!(pool.acquire_key_balanced().is_none());
}

#[tokio::test]
async fn test_cooldown_expires_without_reset() {
    let (pool, keys) = pool_with_keys(1);

    let request = pool.start_request(&keys[0].id).unwrap();
    pool.report_error(&request, "slow down", Some(Duration::from_millis(50)));
    assert!(pool.acquire_key_balanced().is_none());

    tokio::time::sleep(Duration::from_millis(80)).await;

    let selected = pool.acquire_key_balanced().expect("cooldown should have lapsed");
    assert_eq!(selected.id, keys[0].id);
}

#[tokio::test]
async fn test_disabled_key_is_never_selected() {
    let (pool, keys) = pool_with_keys(2);

    assert!(pool.set_key_enabled(&keys[0].id, false));
    for _ in 0..4 {
        assert_eq!(pool.acquire_key().unwrap().id, keys[1].id);
    }

    assert!(pool.set_key_enabled(&keys[1].id, false));
    assert!(pool.acquire_key_balanced().is_none());
}

#[tokio::test]
async fn test_empty_pool_selects_nothing() {
    let (pool, _) = pool_with_keys(0);
    assert!(pool.acquire_key().is_none());
    assert!(pool.acquire_key_balanced().is_none());
}

#[tokio::test]
async fn test_round_robin_skips_cooling_keys() {
    let (pool, keys) = pool_with_keys(3);

    let request = pool.start_request(&keys[1].id).unwrap();
    pool.report_error(&request, &provider_error("quota").0, Some(Duration::from_secs(60)));

    let ids: HashSet<String> = (0..4).map(|_| pool.acquire_key().unwrap().id).collect();
    assert!(!ids.contains(&keys[1].id));
    assert_eq!(ids.len(), 2);
}
