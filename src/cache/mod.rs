//! TTL cache for pipeline results with per-key request coalescing.
//!
//! Each key owns an async mutex. The first caller for a stale key runs the
//! producer while holding it; callers that arrive meanwhile queue on the
//! same mutex and, once it is released, take the outcome of the fetch they
//! waited on instead of starting another one. Failures are handed to those
//! waiters too, but are never stored as a cached value.

mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// A stored value and when it was produced.
#[derive(Debug)]
pub struct CacheEntry<V> {
    pub value: Arc<V>,
    pub fetched_at: DateTime<Utc>,
}

impl<V> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            fetched_at: self.fetched_at,
        }
    }
}

struct SlotState<V, E> {
    entry: Option<CacheEntry<V>>,
    last_outcome: Option<Result<Arc<V>, E>>,
}

struct Slot<V, E> {
    /// Bumped every time a producer run finishes, successful or not.
    completed: AtomicU64,
    state: tokio::sync::Mutex<SlotState<V, E>>,
}

impl<V, E> Default for Slot<V, E> {
    fn default() -> Self {
        Self {
            completed: AtomicU64::new(0),
            state: tokio::sync::Mutex::new(SlotState {
                entry: None,
                last_outcome: None,
            }),
        }
    }
}

/// Owns cached values keyed by request fingerprint. Callers get shared,
/// read-only `Arc<V>` views.
pub struct ResultCache<K, V, E, C = SystemClock> {
    clock: C,
    slots: Mutex<HashMap<K, Arc<Slot<V, E>>>>,
}

impl<K, V, E> ResultCache<K, V, E, SystemClock>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<K, V, E> Default for ResultCache<K, V, E, SystemClock>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E, C> ResultCache<K, V, E, C>
where
    K: Eq + Hash + Clone,
    C: Clock,
{
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached value for `key` if it is younger than `ttl`,
    /// otherwise runs `producer` and caches what it returns.
    ///
    /// At most one producer runs per key at a time. A failed run leaves any
    /// previous entry untouched and its error goes to every caller that
    /// was waiting on it.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, ttl: Duration, producer: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Clone,
    {
        let slot = self.slot(&key);
        let seen = slot.completed.load(Ordering::Acquire);
        let mut state = slot.state.lock().await;

        if let Some(entry) = &state.entry {
            if self.is_fresh(entry, ttl) {
                debug!(fetched_at = %entry.fetched_at, "Cache hit");
                return Ok(Arc::clone(&entry.value));
            }
        }

        if slot.completed.load(Ordering::Acquire) != seen {
            if let Some(outcome) = &state.last_outcome {
                debug!(ok = outcome.is_ok(), "Sharing result of in-flight fetch");
                return outcome.clone();
            }
        }

        debug!(stale = state.entry.is_some(), "Cache miss, running producer");
        let outcome = producer().await.map(Arc::new);

        match &outcome {
            Ok(value) => {
                state.entry = Some(CacheEntry {
                    value: Arc::clone(value),
                    fetched_at: self.clock.now(),
                });
            }
            Err(_) => debug!("Producer failed, cache entry left unchanged"),
        }
        state.last_outcome = Some(outcome.clone());
        slot.completed.fetch_add(1, Ordering::Release);

        outcome
    }

    /// Current entry for `key`, fresh or not. `None` while a fetch for the key is running.
    pub fn peek(&self, key: &K) -> Option<CacheEntry<V>> {
        let slot = self.lock_slots().get(key).cloned()?;
        let state = slot.state.try_lock().ok()?;
        state.entry.clone()
    }

    /// Drops the entry for `key` so the next request refetches.
    ///
    /// Waits for a running fetch on `key` to finish first. The slot itself
    /// is only released when no other caller holds it, so a caller queued
    /// behind the fetch never races a fresh slot for the same key.
    pub async fn invalidate(&self, key: &K) {
        let slot = self.lock_slots().get(key).cloned();
        let Some(slot) = slot else {
            return;
        };

        {
            let mut state = slot.state.lock().await;
            state.entry = None;
            state.last_outcome = None;
        }

        let mut slots = self.lock_slots();
        // map + this handle
        let idle = Arc::strong_count(&slot) == 2;
        if idle && slots.get(key).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
            slots.remove(key);
        }
    }

    pub async fn clear(&self) {
        let keys: Vec<K> = self.lock_slots().keys().cloned().collect();
        for key in &keys {
            self.invalidate(key).await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_fresh(&self, entry: &CacheEntry<V>, ttl: Duration) -> bool {
        match TimeDelta::from_std(ttl) {
            Ok(ttl) => self.clock.now() - entry.fetched_at < ttl,
            // longer than chrono can represent
            Err(_) => true,
        }
    }

    fn slot(&self, key: &K) -> Arc<Slot<V, E>> {
        Arc::clone(self.lock_slots().entry(key.clone()).or_default())
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<K, Arc<Slot<V, E>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicUsize;

    type TestCache = ResultCache<&'static str, u32, String, Arc<ManualClock>>;

    fn cache() -> (TestCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        (ResultCache::with_clock(Arc::clone(&clock)), clock)
    }

    const TTL: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_second_call_within_ttl_is_a_hit() {
        let (cache, clock) = cache();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value = cache
                .get_or_fetch("feed", TTL, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            assert_eq!(*value, 7);
            clock.advance(TimeDelta::minutes(30));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let (cache, clock) = cache();
        let calls = AtomicUsize::new(0);

        let produce = || async {
            Ok(calls.fetch_add(1, Ordering::SeqCst) as u32)
        };

        assert_eq!(*cache.get_or_fetch("feed", TTL, produce).await.unwrap(), 0);
        clock.advance(TimeDelta::seconds(3600));
        assert_eq!(*cache.get_or_fetch("feed", TTL, produce).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (cache, _clock) = cache();

        let a = cache.get_or_fetch("a", TTL, || async { Ok(1) }).await;
        let b = cache
            .get_or_fetch("b", TTL, || async { Err::<u32, _>("down".to_string()) })
            .await;

        assert_eq!(*a.unwrap(), 1);
        assert_eq!(b.unwrap_err(), "down");
        assert_eq!(*cache.get_or_fetch("a", TTL, || async { Ok(2) }).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let (cache, clock) = cache();

        cache.get_or_fetch("feed", TTL, || async { Ok(1) }).await.unwrap();
        clock.advance(TimeDelta::hours(2));

        let err = cache
            .get_or_fetch("feed", TTL, || async { Err::<u32, _>("503".to_string()) })
            .await;
        assert!(err.is_err());

        // stale entry still there, but not served
        assert_eq!(cache.peek(&"feed").map(|e| *e.value), Some(1));

        let value = cache.get_or_fetch("feed", TTL, || async { Ok(2) }).await.unwrap();
        assert_eq!(*value, 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let (cache, _clock) = cache();
        let cache = Arc::new(cache);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("feed", TTL, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(42)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(*handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_failure() {
        let (cache, _clock) = cache();
        let calls = AtomicUsize::new(0);

        let producer = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err::<u32, _>("timeout".to_string())
        };

        let (a, b, c) = tokio::join!(
            cache.get_or_fetch("feed", TTL, producer),
            cache.get_or_fetch("feed", TTL, producer),
            cache.get_or_fetch("feed", TTL, producer),
        );

        assert!(a.is_err() && b.is_err() && c.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // a later request retries
        let value = cache.get_or_fetch("feed", TTL, || async { Ok(5) }).await.unwrap();
        assert_eq!(*value, 5);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let (cache, _clock) = cache();

        cache.get_or_fetch("feed", TTL, || async { Ok(1) }).await.unwrap();
        assert_eq!(cache.len(), 1);

        cache.invalidate(&"feed").await;
        assert!(cache.is_empty());

        let value = cache.get_or_fetch("feed", TTL, || async { Ok(2) }).await.unwrap();
        assert_eq!(*value, 2);

        cache.clear().await;
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_during_fetch_keeps_one_producer_running() {
        let (cache, _clock) = cache();
        let cache = Arc::new(cache);
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));

        let spawn_fetch = |value: u32| {
            let cache = Arc::clone(&cache);
            let running = Arc::clone(&running);
            let max_running = Arc::clone(&max_running);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .get_or_fetch("k", TTL, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        max_running.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok::<u32, String>(value)
                    })
                    .await
            })
        };

        let first = spawn_fetch(1);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let invalidating = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.invalidate(&"k").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = spawn_fetch(2);

        assert_eq!(*first.await.unwrap().unwrap(), 1);
        invalidating.await.unwrap();
        assert_eq!(*second.await.unwrap().unwrap(), 2);

        assert_eq!(max_running.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
