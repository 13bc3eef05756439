//! Time-windowed memoization with background refresh.
//!
//! Each key moves through `Empty -> Fetching -> Fresh -> Stale -> Fetching`.
//! Only the cold path waits on the network; once a key holds a value, reads
//! return it immediately and an expired value is refreshed by a spawned task,
//! at most one per key. A failed fetch never replaces the last good value.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ExchangeError;
use crate::market_data::rate_limit::MAX_RETRY_AFTER;
use crate::metrics;
use crate::state::reading::{CacheState, FetchFailure, Reading};

pub const BASE_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

const UPDATE_BUFFER: usize = 256;

/// Where a cache gets its values from, and how long they stay fresh.
#[async_trait]
pub trait Source<K, V>: Send + Sync {
    fn ttl(&self, key: &K) -> Duration;

    async fn fetch(&self, key: &K) -> Result<V, ExchangeError>;
}

type Done = Shared<BoxFuture<'static, ()>>;

struct InFlight {
    seq: u64,
    done: Done,
}

struct CacheEntry<V> {
    value: Arc<V>,
    fetched_at: Instant,
    ttl: Duration,
    /// Sequence number of the fetch that produced this value.
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.fetched_at) >= self.ttl
    }
}

struct Slot<V> {
    generation: u64,
    entry: Option<CacheEntry<V>>,
    in_flight: Option<InFlight>,
    last_failure: Option<FetchFailure>,
    retry_at: Option<Instant>,
    /// Set by a permanent failure; cleared by invalidation.
    halted: bool,
}

impl<V> Slot<V> {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            entry: None,
            in_flight: None,
            last_failure: None,
            retry_at: None,
            halted: false,
        }
    }

    fn can_refresh(&self, now: Instant) -> bool {
        !self.halted && self.retry_at.is_none_or(|at| now >= at)
    }

    fn reading(&self, now: Instant) -> Reading<V> {
        let expired = self.entry.as_ref().is_some_and(|e| e.expired(now));
        let state = match (&self.in_flight, &self.entry) {
            (Some(_), _) => CacheState::Fetching,
            (None, None) => CacheState::Empty,
            (None, Some(_)) if expired => CacheState::Stale,
            (None, Some(_)) => CacheState::Fresh,
        };

        Reading {
            value: self.entry.as_ref().map(|e| Arc::clone(&e.value)),
            state,
            expired,
            age: self.entry.as_ref().map(|e| now.duration_since(e.fetched_at)),
            last_failure: self.last_failure.clone(),
        }
    }
}

enum Lookup<V> {
    Ready(Reading<V>),
    /// Serve this reading; the refresh future still has to be spawned.
    Refresh(Reading<V>, Done),
    Cold { done: Done, started: bool },
}

struct Inner<K, V> {
    name: &'static str,
    source: Arc<dyn Source<K, V>>,
    slots: DashMap<K, Slot<V>>,
    seq: AtomicU64,
    generations: AtomicU64,
    updates: broadcast::Sender<K>,
}

/// Cheap to clone; every clone shares the same slots.
pub struct RefreshCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for RefreshCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn backoff(error: &ExchangeError, consecutive: u32) -> Duration {
    let exp = BASE_BACKOFF
        .saturating_mul(1 << consecutive.saturating_sub(1).min(6))
        .min(MAX_BACKOFF);
    match error {
        ExchangeError::RateLimited { retry_after } => exp.max((*retry_after).min(MAX_RETRY_AFTER)),
        _ => exp,
    }
}

impl<K, V> Inner<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn new_slot(&self) -> Slot<V> {
        Slot::new(self.generations.fetch_add(1, Ordering::Relaxed))
    }

    /// Apply a finished fetch. Results for evicted keys, or older than the
    /// value already applied, are dropped.
    fn complete(&self, key: &K, generation: u64, seq: u64, result: Result<V, ExchangeError>, took: Duration) {
        let now = Instant::now();
        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind(),
        };

        let applied = {
            let Some(mut slot) = self.slots.get_mut(key) else {
                debug!(cache = self.name, ?key, "key evicted, discarding refresh");
                return;
            };
            if slot.generation != generation {
                debug!(cache = self.name, ?key, "key re-created since fetch started, discarding refresh");
                return;
            }
            if slot.in_flight.as_ref().is_some_and(|f| f.seq == seq) {
                slot.in_flight = None;
            }
            if slot.entry.as_ref().is_some_and(|e| e.seq > seq) {
                debug!(cache = self.name, ?key, seq, "newer fetch already applied, discarding");
                return;
            }

            match result {
                Ok(value) => {
                    slot.entry = Some(CacheEntry {
                        value: Arc::new(value),
                        fetched_at: now,
                        ttl: self.source.ttl(key),
                        seq,
                    });
                    slot.last_failure = None;
                    slot.retry_at = None;
                    slot.halted = false;
                    true
                }
                Err(error) => {
                    let consecutive = slot.last_failure.as_ref().map_or(0, |f| f.consecutive) + 1;
                    if error.is_permanent() {
                        slot.halted = true;
                        slot.retry_at = None;
                    } else {
                        slot.retry_at = now
                            .checked_add(backoff(&error, consecutive))
                            .or_else(|| now.checked_add(MAX_BACKOFF));
                    }
                    warn!(
                        cache = self.name,
                        ?key,
                        error = %error,
                        consecutive,
                        has_last_good = slot.entry.is_some(),
                        "refresh failed"
                    );
                    slot.last_failure = Some(FetchFailure {
                        error,
                        at: now,
                        consecutive,
                    });
                    false
                }
            }
        };

        metrics::record_refresh(self.name, outcome, took.as_secs_f64() * 1000.0);
        if applied {
            debug!(cache = self.name, ?key, seq, "entry replaced");
            // No subscribers is fine.
            let _ = self.updates.send(key.clone());
        }
    }
}

impl<K, V> RefreshCache<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(name: &'static str, source: Arc<dyn Source<K, V>>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        Self {
            inner: Arc::new(Inner {
                name,
                source,
                slots: DashMap::new(),
                seq: AtomicU64::new(0),
                generations: AtomicU64::new(0),
                updates,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Current value for `key`. Waits on the network only while the key has
    /// never held a value.
    pub async fn get(&self, key: &K) -> Reading<V> {
        let reading = match self.lookup(key, Instant::now()) {
            Lookup::Ready(reading) => reading,
            Lookup::Refresh(reading, done) => {
                tokio::spawn(done);
                reading
            }
            Lookup::Cold { done, started } => {
                if started {
                    tokio::spawn(done.clone());
                }
                done.await;
                self.peek(key)
            }
        };

        metrics::record_cache_read(self.inner.name, reading.state.as_str());
        reading
    }

    /// Read without triggering any fetch.
    pub fn peek(&self, key: &K) -> Reading<V> {
        let now = Instant::now();
        self.inner
            .slots
            .get(key)
            .map(|slot| slot.reading(now))
            .unwrap_or_else(Reading::empty)
    }

    pub fn state(&self, key: &K) -> CacheState {
        self.peek(key).state
    }

    /// Drop the entry. A fetch still in flight for it is discarded on completion.
    pub fn evict(&self, key: &K) -> bool {
        self.inner.slots.remove(key).is_some()
    }

    /// Expire every entry and lift backoff, keeping values as last-known-good.
    pub fn invalidate_all(&self) {
        for mut slot in self.inner.slots.iter_mut() {
            if let Some(entry) = slot.entry.as_mut() {
                entry.ttl = Duration::ZERO;
            }
            slot.retry_at = None;
            slot.halted = false;
        }
    }

    pub fn clear(&self) {
        self.inner.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    /// Keys whose entry was replaced by a successful fetch.
    pub fn subscribe(&self) -> broadcast::Receiver<K> {
        self.inner.updates.subscribe()
    }

    fn lookup(&self, key: &K, now: Instant) -> Lookup<V> {
        let mut slot = self
            .inner
            .slots
            .entry(key.clone())
            .or_insert_with(|| self.inner.new_slot());

        let has_value = slot.entry.is_some();
        let expired = slot.entry.as_ref().is_some_and(|e| e.expired(now));

        if let Some(in_flight) = &slot.in_flight {
            return if has_value {
                Lookup::Ready(slot.reading(now))
            } else {
                Lookup::Cold {
                    done: in_flight.done.clone(),
                    started: false,
                }
            };
        }

        if has_value && !expired {
            return Lookup::Ready(slot.reading(now));
        }

        if !slot.can_refresh(now) {
            return Lookup::Ready(slot.reading(now));
        }

        let done = self.start(key, &mut slot);
        if has_value {
            debug!(cache = self.inner.name, ?key, "serving stale value, refreshing in background");
            Lookup::Refresh(slot.reading(now), done)
        } else {
            debug!(cache = self.inner.name, ?key, "cold fetch");
            Lookup::Cold { done, started: true }
        }
    }

    fn start(&self, key: &K, slot: &mut Slot<V>) -> Done {
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let generation = slot.generation;
        let inner = Arc::clone(&self.inner);
        let key = key.clone();

        let done = async move {
            let started = Instant::now();
            let result = inner.source.fetch(&key).await;
            inner.complete(&key, generation, seq, result, started.elapsed());
        }
        .boxed()
        .shared();

        slot.in_flight = Some(InFlight {
            seq,
            done: done.clone(),
        });
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;

    const TTL: Duration = Duration::from_secs(30);

    #[derive(Default)]
    struct FakeSource {
        calls: AtomicU32,
        delays: HashMap<u32, Duration>,
        failures: HashMap<u32, ExchangeError>,
        fail_always: Option<ExchangeError>,
    }

    impl FakeSource {
        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Source<String, u32> for FakeSource {
        fn ttl(&self, _key: &String) -> Duration {
            TTL
        }

        async fn fetch(&self, _key: &String) -> Result<u32, ExchangeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(delay) = self.delays.get(&call) {
                tokio::time::sleep(*delay).await;
            }
            if let Some(err) = self.fail_always.as_ref().or(self.failures.get(&call)) {
                return Err(err.clone());
            }
            Ok(call)
        }
    }

    fn cache(source: FakeSource) -> (RefreshCache<String, u32>, Arc<FakeSource>) {
        let source = Arc::new(source);
        (RefreshCache::new("test", source.clone()), source)
    }

    fn key() -> String {
        "BTCUSDT".to_string()
    }

    /// Let spawned refreshes run to completion.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn cold_get_fetches_once_then_hits() {
        let (cache, source) = cache(FakeSource::default());
        assert_eq!(cache.state(&key()), CacheState::Empty);

        let first = cache.get(&key()).await;
        let second = cache.get(&key()).await;

        assert_eq!(first.value(), Some(&1));
        assert!(Arc::ptr_eq(first.value.as_ref().unwrap(), second.value.as_ref().unwrap()));
        assert_eq!(second.state, CacheState::Fresh);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_value_is_served_without_waiting() {
        let (cache, source) = cache(FakeSource {
            delays: HashMap::from([(2, Duration::from_secs(5))]),
            ..Default::default()
        });
        cache.get(&key()).await;
        tokio::time::advance(TTL).await;

        let before = Instant::now();
        let stale = cache.get(&key()).await;
        assert_eq!(Instant::now(), before);
        assert_eq!(stale.value(), Some(&1));
        assert_eq!(stale.state, CacheState::Fetching);

        // in flight: no second refresh
        let again = cache.get(&key()).await;
        assert_eq!(again.value(), Some(&1));
        settle().await;
        assert_eq!(source.calls(), 2);

        tokio::time::sleep(Duration::from_secs(6)).await;
        let fresh = cache.get(&key()).await;
        assert_eq!(fresh.value(), Some(&2));
        assert_eq!(fresh.state, CacheState::Fresh);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_last_good_value() {
        let (cache, source) = cache(FakeSource {
            failures: HashMap::from([(2, NetworkError::Timeout.into())]),
            ..Default::default()
        });
        cache.get(&key()).await;
        tokio::time::advance(TTL).await;

        let reading = cache.get(&key()).await;
        assert_eq!(reading.value(), Some(&1));
        settle().await;

        let after = cache.peek(&key());
        assert_eq!(after.value(), Some(&1));
        assert_eq!(after.state, CacheState::Stale);
        let failure = after.last_failure.expect("failure recorded");
        assert_eq!(failure.error, ExchangeError::Network(NetworkError::Timeout));
        assert_eq!(failure.consecutive, 1);

        // backing off
        cache.get(&key()).await;
        assert_eq!(source.calls(), 2);

        tokio::time::advance(BASE_BACKOFF).await;
        cache.get(&key()).await;
        settle().await;
        let recovered = cache.get(&key()).await;
        assert_eq!(recovered.value(), Some(&3));
        assert!(recovered.last_failure.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cold_failure_is_an_empty_reading() {
        let (cache, source) = cache(FakeSource {
            failures: HashMap::from([(1, ExchangeError::Malformed("bad".into()))]),
            ..Default::default()
        });

        let reading = cache.get(&key()).await;
        assert!(reading.value.is_none());
        assert_eq!(reading.state, CacheState::Empty);
        assert!(reading.last_failure.is_some());

        cache.get(&key()).await;
        assert_eq!(source.calls(), 1);

        tokio::time::advance(BASE_BACKOFF).await;
        assert_eq!(cache.get(&key()).await.value(), Some(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_not_retried_until_evicted() {
        let (cache, source) = cache(FakeSource {
            fail_always: Some(ExchangeError::NotFound("BTCUSDT".into())),
            ..Default::default()
        });

        let reading = cache.get(&key()).await;
        assert!(reading.is_not_found());

        tokio::time::advance(MAX_BACKOFF * 10).await;
        cache.get(&key()).await;
        assert_eq!(source.calls(), 1);

        assert!(cache.evict(&key()));
        cache.get(&key()).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_cold_callers_share_one_fetch() {
        let (cache, source) = cache(FakeSource {
            delays: HashMap::from([(1, Duration::from_secs(2))]),
            ..Default::default()
        });

        let k = key();
        let (a, b) = tokio::join!(cache.get(&k), cache.get(&k));
        assert_eq!(a.value(), Some(&1));
        assert_eq!(b.value(), Some(&1));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_retry_after_is_recorded_as_a_bounded_backoff() {
        let (cache, source) = cache(FakeSource {
            fail_always: Some(ExchangeError::RateLimited {
                retry_after: Duration::from_secs(u64::MAX / 2),
            }),
            ..Default::default()
        });

        let reader = cache.clone();
        let reading = tokio::spawn(async move { reader.get(&key()).await })
            .await
            .unwrap();
        assert!(reading.value.is_none());
        assert_eq!(reading.last_failure.as_ref().map(|f| f.consecutive), Some(1));

        cache.get(&key()).await;
        assert_eq!(source.calls(), 1);

        tokio::time::advance(MAX_RETRY_AFTER).await;
        cache.get(&key()).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn later_started_fetch_wins_over_slower_older_one() {
        let (cache, _source) = cache(FakeSource {
            delays: HashMap::from([(1, Duration::from_secs(10)), (2, Duration::from_secs(1))]),
            ..Default::default()
        });

        let older = {
            let mut slot = cache
                .inner
                .slots
                .entry(key())
                .or_insert_with(|| cache.inner.new_slot());
            cache.start(&key(), &mut slot)
        };
        tokio::spawn(older);
        tokio::task::yield_now().await;

        let newer = {
            let mut slot = cache.inner.slots.get_mut(&key()).unwrap();
            cache.start(&key(), &mut slot)
        };
        tokio::spawn(newer);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cache.peek(&key()).value(), Some(&2));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(cache.peek(&key()).value(), Some(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn evicted_key_discards_late_result() {
        let (cache, _source) = cache(FakeSource {
            delays: HashMap::from([(2, Duration::from_secs(5))]),
            ..Default::default()
        });
        cache.get(&key()).await;
        tokio::time::advance(TTL).await;
        cache.get(&key()).await;
        settle().await;

        cache.evict(&key());
        assert_eq!(cache.state(&key()), CacheState::Empty);
        assert_eq!(cache.get(&key()).await.value(), Some(&3));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(cache.peek(&key()).value(), Some(&3));
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_hear_about_replacements() {
        let (cache, _source) = cache(FakeSource::default());
        let mut updates = cache.subscribe();

        cache.get(&key()).await;
        assert_eq!(updates.try_recv().unwrap(), key());

        cache.get(&key()).await;
        assert!(updates.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_keeps_values_and_forces_refresh() {
        let (cache, source) = cache(FakeSource::default());
        cache.get(&key()).await;

        cache.invalidate_all();
        let reading = cache.get(&key()).await;
        assert_eq!(reading.value(), Some(&1));
        assert_eq!(reading.state, CacheState::Fetching);

        settle().await;
        assert_eq!(cache.peek(&key()).value(), Some(&2));
        assert_eq!(source.calls(), 2);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let timeout = ExchangeError::from(NetworkError::Timeout);
        assert_eq!(backoff(&timeout, 1), Duration::from_secs(1));
        assert_eq!(backoff(&timeout, 3), Duration::from_secs(4));
        assert_eq!(backoff(&timeout, 20), MAX_BACKOFF);

        let limited = ExchangeError::RateLimited {
            retry_after: Duration::from_secs(30),
        };
        assert_eq!(backoff(&limited, 1), Duration::from_secs(30));
    }
}
