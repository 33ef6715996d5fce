/*!
 * Signed cache behavior over a shared store
 */

use opguard_kernel::cache::{CacheLayer, CacheStore, KeyedHasher, MemoryCacheStore};
use opguard_kernel::ManualClock;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(60);

fn layer(secret: &[u8], store: Arc<MemoryCacheStore>, clock: Arc<ManualClock>) -> CacheLayer {
    CacheLayer::new(store, KeyedHasher::new(secret).unwrap(), clock, TTL)
}

fn setup() -> (CacheLayer, Arc<MemoryCacheStore>, Arc<ManualClock>) {
    let store = Arc::new(MemoryCacheStore::new(1_000));
    let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
    (
        layer(b"layer-tests-secret-0123456789", store.clone(), clock.clone()),
        store,
        clock,
    )
}

#[test]
fn test_entries_expire_on_the_injected_clock() {
    let (cache, _store, clock) = setup();
    assert!(cache.put("report:42", &json!({"rows": 3}), Duration::from_secs(10), &[]));

    clock.advance(Duration::from_secs(9));
    assert_eq!(cache.get::<Value>("report:42"), Some(json!({"rows": 3})));

    clock.advance(Duration::from_secs(1));
    assert_eq!(cache.get::<Value>("report:42"), None);
    assert_eq!(cache.stats().expirations, 1);
    assert_eq!(cache.stats().size, 0);
}

#[test]
fn test_remember_computes_once_and_skips_errors() {
    let (cache, _store, _clock) = setup();
    let calls = Cell::new(0);

    let failed: Result<u64, String> = cache.remember("answer", TTL, || {
        calls.set(calls.get() + 1);
        Err("upstream timeout".to_string())
    });
    assert!(failed.is_err());

    for _ in 0..3 {
        let value: Result<u64, String> = cache.remember("answer", TTL, || {
            calls.set(calls.get() + 1);
            Ok(42)
        });
        assert_eq!(value, Ok(42));
    }
    assert_eq!(calls.get(), 2);
}

#[test]
fn test_tag_sweep_removes_only_tagged_entries() {
    let (cache, _store, _clock) = setup();
    let doc = vec!["resource:doc-1".to_string()];
    let both = vec!["resource:doc-1".to_string(), "resource:doc-2".to_string()];

    cache.put("result:doc-1", &1, TTL, &doc);
    cache.put("result:listing", &2, TTL, &both);
    cache.put("result:doc-3", &3, TTL, &[]);

    assert_eq!(cache.invalidate_tag("resource:doc-1"), 2);
    assert_eq!(cache.get::<u32>("result:doc-1"), None);
    assert_eq!(cache.get::<u32>("result:listing"), None);
    assert_eq!(cache.get::<u32>("result:doc-3"), Some(3));
    assert_eq!(cache.invalidate_tag("resource:doc-2"), 0);
}

#[test]
fn test_tampered_value_is_evicted_and_recomputed() {
    let (cache, store, _clock) = setup();
    cache.put("quota:alice", &10u32, TTL, &[]);

    let derived = cache.derive_key("quota:alice");
    assert!(store.tamper(&derived, |entry| entry.value = b"1000".to_vec()));

    assert_eq!(cache.get::<u32>("quota:alice"), None);
    assert_eq!(cache.stats().integrity_failures, 1);
    assert!(store.get(&derived).is_none());

    let recomputed: Result<u32, String> = cache.remember("quota:alice", TTL, || Ok(10));
    assert_eq!(recomputed, Ok(10));
}

#[test]
fn test_extended_expiry_is_detected() {
    let (cache, store, clock) = setup();
    cache.put("session:alice", &"token", Duration::from_secs(5), &[]);

    let derived = cache.derive_key("session:alice");
    store.tamper(&derived, |entry| entry.expires_at += Duration::from_secs(3600));
    clock.advance(Duration::from_secs(10));

    assert_eq!(cache.get::<String>("session:alice"), None);
    assert_eq!(cache.stats().integrity_failures, 1);
}

#[test]
fn test_layers_with_different_secrets_are_isolated() {
    let (cache, store, clock) = setup();
    let other = layer(b"another-secret-abcdefghijklmn", store.clone(), clock);

    cache.put("config", &"primary", TTL, &[]);
    assert_ne!(cache.derive_key("config"), other.derive_key("config"));
    assert_eq!(other.get::<String>("config"), None);

    // Even a copied entry fails verification under the other secret
    let mut copied = store.get(&cache.derive_key("config")).unwrap();
    copied.key = other.derive_key("config");
    store.put(copied);
    assert_eq!(other.get::<String>("config"), None);
    assert_eq!(other.stats().integrity_failures, 1);
}

#[test]
fn test_window_counters_reset_after_window() {
    let (cache, _store, clock) = setup();
    let window = Duration::from_secs(60);

    assert_eq!(cache.increment("rate:alice:publish", window), 1);
    assert_eq!(cache.increment("rate:alice:publish", window), 2);
    assert_eq!(cache.increment("rate:bob:publish", window), 1);

    clock.advance(Duration::from_secs(61));
    assert_eq!(cache.increment("rate:alice:publish", window), 1);
}
