//! Time-bounded snapshot of a bulk status query.
//!
//! Batch-system adapters answer per-drone status questions from one bulk query instead
//! of polling the backend on every drone tick. [`AsyncCacheMap`] holds the last
//! snapshot and refreshes it at most once per `max_age`; concurrent callers that find
//! the snapshot stale wait for a single refresh instead of issuing their own.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

type UpdateFn<K, V, E> = Arc<dyn Fn() -> BoxFuture<'static, Result<HashMap<K, V>, E>> + Send + Sync>;

/// A map refreshed from an async update function at most once per `max_age`.
///
/// A failed refresh keeps the previous snapshot and does not count as an update, so
/// the next caller retries. Callers that queued behind an attempt share its outcome
/// instead of repeating it.
pub struct AsyncCacheMap<K, V, E> {
    update: UpdateFn<K, V, E>,
    max_age: Duration,
    snapshot: RwLock<HashMap<K, V>>,
    /// Time of the last successful refresh; the lock also serializes refreshes.
    last_update: Mutex<Option<Instant>>,
    /// Number of finished refresh attempts, successful or not.
    attempts: AtomicU64,
}

impl<K, V, E> AsyncCacheMap<K, V, E>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: fmt::Display + Send + 'static,
{
    /// Create an empty cache map that is refreshed by calling `update`.
    pub fn new<F, Fut>(update: F, max_age: Duration) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HashMap<K, V>, E>> + Send + 'static,
    {
        Self {
            update: Arc::new(move || update().boxed()),
            max_age,
            snapshot: RwLock::new(HashMap::new()),
            last_update: Mutex::new(None),
            attempts: AtomicU64::new(0),
        }
    }

    /// Refresh the snapshot if it is older than `max_age` or was never loaded.
    ///
    /// Returns `true` if this call replaced the snapshot.
    pub async fn refresh_if_stale(&self) -> bool {
        let seen = self.attempts.load(Ordering::Acquire);
        let mut last_update = self.last_update.lock().await;
        if self.attempts.load(Ordering::Acquire) != seen {
            // An attempt finished while this caller waited for the lock.
            return false;
        }
        if last_update.is_some_and(|at| at.elapsed() <= self.max_age) {
            return false;
        }

        let outcome = (self.update)().await;
        self.attempts.fetch_add(1, Ordering::AcqRel);
        match outcome {
            Ok(fresh) => {
                debug!(entries = fresh.len(), "refreshed cache map");
                *self.snapshot.write() = fresh;
                *last_update = Some(Instant::now());
                true
            }
            Err(err) => {
                warn!(error = %err, "cache map refresh failed, keeping previous snapshot");
                false
            }
        }
    }

    /// Refresh if stale, then look up `key`.
    ///
    /// `None` means the key is unknown to the backend.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.refresh_if_stale().await;
        self.snapshot.read().get(key).cloned()
    }

    /// Return a copy of the current snapshot without refreshing it.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<K, V>
    where
        K: Clone,
    {
        self.snapshot.read().clone()
    }

    /// Time of the last successful refresh, if any.
    pub async fn last_update(&self) -> Option<Instant> {
        *self.last_update.lock().await
    }

    /// Maximum age of the snapshot before it is refreshed.
    #[must_use]
    pub const fn max_age(&self) -> Duration {
        self.max_age
    }
}

impl<K, V, E> fmt::Debug for AsyncCacheMap<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCacheMap")
            .field("max_age", &self.max_age)
            .field("entries", &self.snapshot.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use futures::future::join_all;

    fn counting_cache(
        max_age: Duration,
    ) -> (AsyncCacheMap<String, u32, String>, Arc<AtomicUsize>, Arc<AtomicBool>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let failing = Arc::new(AtomicBool::new(false));
        let (counter, fail) = (Arc::clone(&calls), Arc::clone(&failing));

        let cache = AsyncCacheMap::new(
            move || {
                let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let fail = fail.load(Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    if fail {
                        return Err("backend unreachable".to_string());
                    }
                    let call = u32::try_from(call).unwrap_or(u32::MAX);
                    Ok(HashMap::from([("drone-1".to_string(), call)]))
                }
            },
            max_age,
        );
        (cache, calls, failing)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_refreshes_coalesce() {
        let (cache, calls, _) = counting_cache(Duration::from_secs(60));

        let refreshed = join_all((0..20).map(|_| cache.refresh_if_stale())).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(refreshed.iter().filter(|r| **r).count(), 1);
        assert_eq!(cache.get(&"drone-1".to_string()).await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_after_max_age() {
        let (cache, calls, _) = counting_cache(Duration::from_secs(60));

        assert_eq!(cache.get(&"drone-1".to_string()).await, Some(1));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.get(&"drone-1".to_string()).await, Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.get(&"drone-1".to_string()).await, Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_snapshot_and_retries() {
        let (cache, calls, failing) = counting_cache(Duration::from_secs(60));
        assert!(cache.refresh_if_stale().await);
        let loaded_at = cache.last_update().await;

        tokio::time::advance(Duration::from_secs(61)).await;
        failing.store(true, Ordering::SeqCst);
        assert!(!cache.refresh_if_stale().await);
        assert_eq!(cache.last_update().await, loaded_at);
        assert_eq!(cache.snapshot().get("drone-1"), Some(&1));

        // Not advanced, so the next call tries again.
        failing.store(false, Ordering::SeqCst);
        assert!(cache.refresh_if_stale().await);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.snapshot().get("drone-1"), Some(&3));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_a_failed_refresh() {
        let (cache, calls, failing) = counting_cache(Duration::from_secs(60));
        failing.store(true, Ordering::SeqCst);

        let refreshed = join_all((0..20).map(|_| cache.refresh_if_stale())).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(refreshed.iter().all(|r| !*r));
        assert_eq!(cache.last_update().await, None);

        // The next caller retries.
        failing.store(false, Ordering::SeqCst);
        assert!(cache.refresh_if_stale().await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_key_is_none() {
        let (cache, _, _) = counting_cache(Duration::from_secs(60));
        assert_eq!(cache.get(&"drone-2".to_string()).await, None);
    }
}
