//! LookupCache — TTL store with per-key in-flight slots.
//!
//! The entry map and the slot table sit behind one lock so that a key is
//! always in exactly one of three places: fresh entry, open slot, or nowhere.
//! The upstream computation runs on its own task; callers only hold a
//! oneshot receiver, so a caller going away never cancels the query.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::LookupError;
use crate::lookup::{Identifier, LookupResult};

type Outcome = Result<LookupResult, LookupError>;

/// Whether a lookup was answered from a stored entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    /// Value for the `X-Cache-Status` header
    pub fn as_header(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// Counters for operators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
}

struct CacheEntry {
    value: LookupResult,
    inserted_at: Instant,
}

#[derive(Default)]
struct Table {
    entries: HashMap<Identifier, CacheEntry>,
    /// Insertion order for capacity eviction. May hold stale pairs; a pair
    /// is live only if its timestamp matches the stored entry.
    order: VecDeque<(Identifier, Instant)>,
    /// Open in-flight slots: waiters in join order
    slots: HashMap<Identifier, Vec<oneshot::Sender<Outcome>>>,
}

impl Table {
    /// Fresh value for `key`, evicting it lazily if expired
    fn fresh(&mut self, key: &Identifier, now: Instant, ttl: Duration) -> Option<LookupResult> {
        let expired = now.duration_since(self.entries.get(key)?.inserted_at) >= ttl;
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.value.clone())
    }

    fn insert(&mut self, key: Identifier, value: LookupResult, now: Instant, max_entries: usize) {
        if !self.entries.contains_key(&key) {
            while self.entries.len() >= max_entries {
                if !self.evict_oldest() {
                    break;
                }
            }
        }
        self.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                inserted_at: now,
            },
        );
        self.order.push_back((key, now));
        if self.order.len() > self.entries.len() * 2 + 64 {
            self.compact_order();
        }
    }

    /// Drop the least recently inserted entry
    fn evict_oldest(&mut self) -> bool {
        while let Some((key, at)) = self.order.pop_front() {
            if self
                .entries
                .get(&key)
                .is_some_and(|e| e.inserted_at == at)
            {
                self.entries.remove(&key);
                tracing::debug!(identifier = %key, "Evicted oldest cache entry (capacity)");
                return true;
            }
        }
        false
    }

    fn evict_expired(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.duration_since(e.inserted_at) < ttl);
        self.compact_order();
        before - self.entries.len()
    }

    fn compact_order(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(key, at)| entries.get(key).is_some_and(|e| e.inserted_at == *at));
    }
}

struct Inner {
    ttl: Duration,
    max_entries: usize,
    table: Mutex<Table>,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

/// Request-coalescing TTL cache, cheap to clone
#[derive(Clone)]
pub struct LookupCache {
    inner: Arc<Inner>,
}

impl LookupCache {
    /// Create a cache; `max_entries` is clamped to at least 1
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                ttl,
                max_entries: max_entries.max(1),
                table: Mutex::new(Table::default()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Stored value if younger than the TTL
    pub fn get(&self, key: &Identifier) -> Option<LookupResult> {
        self.inner
            .table
            .lock()
            .fresh(key, Instant::now(), self.inner.ttl)
    }

    /// Physically stored entries (expired ones included until evicted)
    pub fn len(&self) -> usize {
        self.inner.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of open in-flight slots
    pub fn in_flight(&self) -> usize {
        self.inner.table.lock().slots.len()
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, in_flight) = {
            let table = self.inner.table.lock();
            (table.entries.len(), table.slots.len())
        };
        CacheStats {
            entries,
            in_flight,
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
        }
    }

    /// Return the fresh value for `key`, or compute it at most once.
    ///
    /// The first caller to miss opens a slot and runs `compute` on a spawned
    /// task; later callers for the same key join the slot and receive the
    /// same outcome, in join order. Only successes are stored.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: Identifier,
        compute: F,
    ) -> Result<(LookupResult, CacheStatus), LookupError>
    where
        F: FnOnce(Identifier) -> Fut + Send,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let (rx, leader) = {
            let mut table = self.inner.table.lock();
            if let Some(value) = table.fresh(&key, Instant::now(), self.inner.ttl) {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                return Ok((value, CacheStatus::Hit));
            }

            let (tx, rx) = oneshot::channel();
            let leader = match table.slots.get_mut(&key) {
                Some(waiters) => {
                    waiters.push(tx);
                    false
                }
                None => {
                    table.slots.insert(key.clone(), vec![tx]);
                    true
                }
            };
            (rx, leader)
        };

        if leader {
            self.inner.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(identifier = %key, "Cache miss; querying upstream");
            let query = compute(key.clone());
            let slot = SlotGuard {
                cache: self.clone(),
                key: Some(key),
            };
            tokio::spawn(async move {
                let outcome = query.await;
                slot.finish(outcome);
            });
        } else {
            self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(identifier = %key, "Joined in-flight lookup");
        }

        match rx.await {
            Ok(outcome) => outcome.map(|value| (value, CacheStatus::Miss)),
            Err(_) => Err(LookupError::Query {
                cause: "in-flight lookup was abandoned".to_string(),
            }),
        }
    }

    /// Store the outcome (successes only), close the slot, release waiters
    fn complete(&self, key: &Identifier, outcome: Outcome) {
        let waiters = {
            let mut table = self.inner.table.lock();
            if let Ok(value) = &outcome {
                table.insert(
                    key.clone(),
                    value.clone(),
                    Instant::now(),
                    self.inner.max_entries,
                );
            }
            table.slots.remove(key).unwrap_or_default()
        };

        if let Err(err) = &outcome {
            tracing::debug!(
                identifier = %key,
                category = err.category(),
                waiters = waiters.len(),
                "Upstream lookup failed; nothing cached"
            );
        }
        for waiter in waiters {
            // A waiter whose caller went away just misses the delivery
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Remove every entry. Open slots are left alone and still deliver.
    pub fn flush(&self) {
        let flushed = {
            let mut table = self.inner.table.lock();
            let n = table.entries.len();
            table.entries.clear();
            table.order.clear();
            n
        };
        tracing::info!(flushed, "Lookup cache flushed");
    }

    /// Remove every expired entry; same TTL as lazy reads
    pub fn evict_expired(&self) -> usize {
        self.inner
            .table
            .lock()
            .evict_expired(Instant::now(), self.inner.ttl)
    }

    /// Periodically evict expired entries. Abort the handle to stop.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = cache.evict_expired();
                if evicted > 0 {
                    tracing::debug!(evicted, remaining = cache.len(), "Evicted expired cache entries");
                }
            }
        })
    }
}

/// Closes the slot if the computation task dies before completing,
/// so waiters get an error instead of hanging and the key is not wedged.
struct SlotGuard {
    cache: LookupCache,
    /// Taken once the outcome has been delivered
    key: Option<Identifier>,
}

impl SlotGuard {
    fn finish(mut self, outcome: Outcome) {
        if let Some(key) = self.key.take() {
            self.cache.complete(&key, outcome);
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let waiters = self.cache.inner.table.lock().slots.remove(&key);
        tracing::warn!(
            identifier = %key,
            waiters = waiters.map_or(0, |w| w.len()),
            "In-flight lookup abandoned"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::Profile;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    const TTL: Duration = Duration::from_secs(60);

    fn id(raw: &str) -> Identifier {
        Identifier::parse(raw).unwrap()
    }

    fn alice() -> LookupResult {
        LookupResult::Registered(Profile {
            display_name: Some("Alice".to_string()),
            canonical_number: Some("15559999999".to_string()),
            avatar_url: None,
            is_business: false,
        })
    }

    /// Compute fn that counts calls and answers after `delay`
    fn counting(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
        outcome: Outcome,
    ) -> impl FnOnce(Identifier) -> std::pin::Pin<Box<dyn Future<Output = Outcome> + Send>> + Send
    {
        let calls = Arc::clone(calls);
        move |_key| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                outcome
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_lookup_hits() {
        let cache = LookupCache::new(TTL, 100);
        let calls = Arc::new(AtomicUsize::new(0));

        let (first, status) = cache
            .get_or_compute(id("1555"), counting(&calls, Duration::ZERO, Ok(alice())))
            .await
            .unwrap();
        assert_eq!(status, CacheStatus::Miss);

        let (second, status) = cache
            .get_or_compute(id("1555"), counting(&calls, Duration::ZERO, Ok(alice())))
            .await
            .unwrap();
        assert_eq!(status, CacheStatus::Hit);
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_coalesce() {
        let cache = LookupCache::new(TTL, 100);
        let calls = Arc::new(AtomicUsize::new(0));
        let delay = Duration::from_millis(100);

        let (a, b, c) = tokio::join!(
            cache.get_or_compute(id("1555"), counting(&calls, delay, Ok(alice()))),
            cache.get_or_compute(id("1555"), counting(&calls, delay, Ok(alice()))),
            cache.get_or_compute(id("1555"), counting(&calls, delay, Ok(alice()))),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for outcome in [a, b, c] {
            assert_eq!(outcome.unwrap(), (alice(), CacheStatus::Miss));
        }
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.coalesced, 2);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_do_not_coalesce() {
        let cache = LookupCache::new(TTL, 100);
        let calls = Arc::new(AtomicUsize::new(0));
        let delay = Duration::from_millis(10);

        let (a, b) = tokio::join!(
            cache.get_or_compute(id("1"), counting(&calls, delay, Ok(alice()))),
            cache.get_or_compute(id("2"), counting(&calls, delay, Ok(LookupResult::NotRegistered))),
        );
        assert_eq!(a.unwrap().0, alice());
        assert_eq!(b.unwrap().0, LookupResult::NotRegistered);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reaches_all_waiters_and_is_not_cached() {
        let cache = LookupCache::new(TTL, 100);
        let calls = Arc::new(AtomicUsize::new(0));
        let delay = Duration::from_millis(100);
        let failure = Err(LookupError::Query {
            cause: "timeout".to_string(),
        });

        let (a, b) = tokio::join!(
            cache.get_or_compute(id("1555"), counting(&calls, delay, failure.clone())),
            cache.get_or_compute(id("1555"), counting(&calls, delay, failure.clone())),
        );
        assert_eq!(a.unwrap_err(), failure.clone().unwrap_err());
        assert_eq!(b.unwrap_err(), failure.unwrap_err());
        assert!(cache.is_empty());

        let (_, status) = cache
            .get_or_compute(id("1555"), counting(&calls, delay, Ok(alice())))
            .await
            .unwrap();
        assert_eq!(status, CacheStatus::Miss);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    async fn crashing_query() -> Outcome {
        panic!("session client crashed")
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_query_releases_slot() {
        let cache = LookupCache::new(TTL, 100);

        let err = cache
            .get_or_compute(id("1555"), |_| crashing_query())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "query");
        assert_eq!(cache.in_flight(), 0);
        assert!(cache.is_empty());

        // The key is not wedged
        let calls = Arc::new(AtomicUsize::new(0));
        let (value, status) = cache
            .get_or_compute(id("1555"), counting(&calls, Duration::ZERO, Ok(alice())))
            .await
            .unwrap();
        assert_eq!(value, alice());
        assert_eq!(status, CacheStatus::Miss);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_recomputed() {
        let cache = LookupCache::new(TTL, 100);
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_compute(id("1555"), counting(&calls, Duration::ZERO, Ok(alice())))
            .await
            .unwrap();
        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        assert!(cache.get(&id("1555")).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&id("1555")), None);

        let (_, status) = cache
            .get_or_compute(id("1555"), counting(&calls, Duration::ZERO, Ok(alice())))
            .await
            .unwrap();
        assert_eq!(status, CacheStatus::Miss);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The refreshed entry has a new insertion time
        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        assert!(cache.get(&id("1555")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_least_recently_inserted() {
        let cache = LookupCache::new(TTL, 2);
        let calls = Arc::new(AtomicUsize::new(0));

        for key in ["1", "2", "3"] {
            cache
                .get_or_compute(id(key), counting(&calls, Duration::ZERO, Ok(alice())))
                .await
                .unwrap();
            tokio::time::advance(Duration::from_millis(1)).await;
        }

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&id("1")), None);
        assert!(cache.get(&id("2")).is_some());
        assert!(cache.get(&id("3")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_keeps_in_flight_slots() {
        let cache = LookupCache::new(TTL, 100);
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_compute(id("1"), counting(&calls, Duration::ZERO, Ok(alice())))
            .await
            .unwrap();

        let pending = {
            let cache = cache.clone();
            let compute = counting(&calls, Duration::from_millis(100), Ok(alice()));
            tokio::spawn(async move { cache.get_or_compute(id("2"), compute).await })
        };
        while cache.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        cache.flush();
        assert_eq!(cache.get(&id("1")), None);
        assert_eq!(cache.in_flight(), 1);

        let (value, status) = pending.await.unwrap().unwrap();
        assert_eq!(value, alice());
        assert_eq!(status, CacheStatus::Miss);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_caller_does_not_cancel_query() {
        let cache = LookupCache::new(TTL, 100);
        let calls = Arc::new(AtomicUsize::new(0));

        let caller = {
            let cache = cache.clone();
            let compute = counting(&calls, Duration::from_millis(100), Ok(alice()));
            tokio::spawn(async move { cache.get_or_compute(id("1555"), compute).await })
        };
        while cache.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        caller.abort();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(cache.get(&id("1555")), Some(alice()));
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_uses_same_ttl() {
        let cache = LookupCache::new(TTL, 100);
        let calls = Arc::new(AtomicUsize::new(0));
        cache
            .get_or_compute(id("1555"), counting(&calls, Duration::ZERO, Ok(alice())))
            .await
            .unwrap();

        let sweeper = cache.spawn_sweeper(Duration::from_secs(10));
        tokio::time::sleep(TTL - Duration::from_secs(5)).await;
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(cache.len(), 0);
        sweeper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_counter() {
        let cache = LookupCache::new(TTL, 100);
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            cache
                .get_or_compute(id("1555"), counting(&calls, Duration::ZERO, Ok(alice())))
                .await
                .unwrap();
        }
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }
}
