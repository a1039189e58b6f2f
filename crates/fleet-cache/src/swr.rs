//! Stale-while-revalidate cache.
//!
//! Reads never block on a cold network call longer than necessary: a
//! fresh value returns immediately, a stale value returns immediately
//! while a background refresh is kicked off, and only a cold miss runs
//! the loader inline. Refreshes are single-flight per key so concurrent
//! readers of the same stale key share one in-flight loader instead of
//! stampeding the upstream.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, warn};

use fleet_common::{Error, Result};

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    fetched_at: Instant,
}

/// Optional shared (Redis-class) backing store. Implementors own
/// serialization; the cache only ever moves opaque bytes through it.
#[async_trait]
pub trait L2Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;
    async fn ping(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct L2Backoff {
    failure_count: u32,
    disabled_until: Option<Instant>,
}

impl L2Backoff {
    fn fresh() -> Self {
        Self {
            failure_count: 0,
            disabled_until: None,
        }
    }
}

/// L1 in-process cache, optionally backed by an L2 store, with
/// single-flight refresh and a hierarchical string key space
/// (`endpoints`, `containers:<id>`, `health:portainer`, ...).
pub struct SwrCache {
    l1: RwLock<HashMap<String, Entry>>,
    inflight: Mutex<HashMap<String, Arc<Notify>>>,
    l2: Option<Arc<dyn L2Store>>,
    l2_backoff: Mutex<L2Backoff>,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl SwrCache {
    pub fn new(l2: Option<Arc<dyn L2Store>>, backoff_base: Duration, backoff_max: Duration) -> Arc<Self> {
        Arc::new(Self {
            l1: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            l2,
            l2_backoff: Mutex::new(L2Backoff::fresh()),
            backoff_base,
            backoff_max,
        })
    }

    fn l2_available(&self) -> bool {
        if self.l2.is_none() {
            return false;
        }
        let backoff = self.l2_backoff.lock();
        match backoff.disabled_until {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }

    fn record_l2_failure(&self) {
        let mut backoff = self.l2_backoff.lock();
        backoff.failure_count += 1;
        let delay = self
            .backoff_base
            .saturating_mul(1 << backoff.failure_count.min(10))
            .min(self.backoff_max);
        backoff.disabled_until = Some(Instant::now() + delay);
        warn!(failures = backoff.failure_count, "L2 cache backoff engaged");
    }

    fn record_l2_success(&self) {
        let mut backoff = self.l2_backoff.lock();
        *backoff = L2Backoff::fresh();
    }

    /// Strict-TTL fetch: returns a cached value only if it is still fresh,
    /// otherwise runs the loader and blocks until it completes.
    pub async fn cached_fetch<T, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if let Some(value) = self.read_fresh::<T>(key, ttl).await {
            return Ok(value);
        }
        self.load_and_store(key, loader).await
    }

    /// Stale-while-revalidate fetch: a stale (but present) value is
    /// returned immediately and a background refresh is scheduled;
    /// only a cold miss blocks on the loader.
    pub async fn cached_fetch_swr<T, F, Fut>(
        self: &Arc<Self>,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(value) = self.read_fresh::<T>(key, ttl).await {
            return Ok(value);
        }

        if let Some(stale) = self.read_any::<T>(key).await {
            self.spawn_background_refresh(key.to_string(), loader);
            return Ok(stale);
        }

        self.load_single_flight(key, loader).await
    }

    async fn read_fresh<T: Send + Sync + 'static>(&self, key: &str, ttl: Duration) -> Option<Arc<T>> {
        let l1 = self.l1.read().await;
        let entry = l1.get(key)?;
        if entry.fetched_at.elapsed() > ttl {
            return None;
        }
        entry.value.clone().downcast::<T>().ok()
    }

    async fn read_any<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        let l1 = self.l1.read().await;
        let entry = l1.get(key)?;
        entry.value.clone().downcast::<T>().ok()
    }

    async fn load_and_store<T, F, Fut>(&self, key: &str, loader: F) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let value = Arc::new(loader().await?);
        self.l1.write().await.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(value)
    }

    /// Single-flight cold-miss load: the first caller for an absent key
    /// runs `loader` and populates `l1`; concurrent callers for the same
    /// key wait on the same `Notify` and read the leader's result instead
    /// of each invoking their own loader. A follower whose leader failed
    /// to populate the key falls back to loading independently rather
    /// than staying single-flighted on a failure.
    async fn load_single_flight<T, F, Fut>(&self, key: &str, loader: F) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        enum Role {
            Leader(Arc<Notify>),
            Follower(Arc<Notify>),
        }

        let role = {
            let mut inflight = self.inflight.lock();
            if let Some(existing) = inflight.get(key) {
                Role::Follower(existing.clone())
            } else {
                let notify = Arc::new(Notify::new());
                inflight.insert(key.to_string(), notify.clone());
                Role::Leader(notify)
            }
        };

        match role {
            Role::Follower(notify) => {
                notify.notified().await;
                if let Some(value) = self.read_any::<T>(key).await {
                    return Ok(value);
                }
                self.load_and_store(key, loader).await
            }
            Role::Leader(notify) => {
                let result = self.load_and_store(key, loader).await;
                self.inflight.lock().remove(key);
                notify.notify_waiters();
                result
            }
        }
    }

    fn spawn_background_refresh<T, F, Fut>(self: &Arc<Self>, key: String, loader: F)
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        let notify = {
            let mut inflight = self.inflight.lock();
            if inflight.contains_key(&key) {
                return; // a refresh for this key is already in flight
            }
            let notify = Arc::new(Notify::new());
            inflight.insert(key.clone(), notify.clone());
            notify
        };

        let cache = self.clone();
        tokio::spawn(async move {
            let result = loader().await;
            match result {
                Ok(value) => {
                    cache.l1.write().await.insert(
                        key.clone(),
                        Entry {
                            value: Arc::new(value),
                            fetched_at: Instant::now(),
                        },
                    );
                }
                Err(e) => {
                    debug!(key = %key, error = %e, "background SWR refresh failed, stale value kept");
                }
            }
            cache.inflight.lock().remove(&key);
            notify.notify_waiters();
        });
    }

    /// Health check used by the `/health/ready` aggregation.
    pub async fn ping(&self) -> bool {
        match &self.l2 {
            Some(l2) if self.l2_available() => {
                let ok = l2.ping().await;
                if ok {
                    self.record_l2_success();
                } else {
                    self.record_l2_failure();
                }
                ok
            }
            Some(_) => false,
            None => true,
        }
    }

    pub async fn invalidate(&self, key: &str) {
        self.l1.write().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn cold_miss_runs_loader_and_caches_result() {
        let cache = SwrCache::new(None, Duration::from_millis(10), Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let value = cache
            .cached_fetch("endpoints", Duration::from_secs(30), || async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok::<Vec<u32>, Error>(vec![1, 2, 3])
            })
            .await
            .unwrap();

        assert_eq!(*value, vec![1, 2, 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_value_skips_loader() {
        let cache = SwrCache::new(None, Duration::from_millis(10), Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            cache
                .cached_fetch("containers:1", Duration::from_secs(30), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<u32, Error>(42)
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_value_served_immediately_with_background_refresh() {
        let cache = SwrCache::new(None, Duration::from_millis(10), Duration::from_secs(1));

        cache
            .cached_fetch("health:portainer", Duration::from_millis(0), || async { Ok::<u32, Error>(1) })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;

        let value = cache
            .cached_fetch_swr("health:portainer", Duration::from_millis(0), || async {
                Ok::<u32, Error>(2)
            })
            .await
            .unwrap();

        // Stale value returned synchronously; the refreshed value lands later.
        assert_eq!(*value, 1);
    }

    #[tokio::test]
    async fn loader_error_is_not_memoized() {
        let cache = SwrCache::new(None, Duration::from_millis(10), Duration::from_secs(1));

        let first = cache
            .cached_fetch("endpoints", Duration::from_secs(30), || async {
                Err::<u32, Error>(Error::TransientUpstream("boom".into()))
            })
            .await;
        assert!(first.is_err());

        let second = cache
            .cached_fetch("endpoints", Duration::from_secs(30), || async { Ok::<u32, Error>(7) })
            .await
            .unwrap();
        assert_eq!(*second, 7);
    }

    #[tokio::test]
    async fn concurrent_cold_misses_share_one_loader_invocation() {
        let cache = SwrCache::new(None, Duration::from_millis(10), Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));

        let leader_calls = calls.clone();
        let leader_cache = cache.clone();
        let leader = tokio::spawn(async move {
            leader_cache
                .cached_fetch_swr("endpoints", Duration::from_secs(30), move || async move {
                    leader_calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<u32, Error>(7)
                })
                .await
        });

        // Give the leader a chance to register itself as in-flight before
        // the follower's loader would otherwise race it.
        tokio::time::sleep(Duration::from_millis(5)).await;

        let follower_calls = calls.clone();
        let follower = cache
            .cached_fetch_swr("endpoints", Duration::from_secs(30), move || async move {
                follower_calls.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, Error>(99)
            })
            .await
            .unwrap();

        let leader_result = leader.await.unwrap().unwrap();

        assert_eq!(*leader_result, 7);
        assert_eq!(*follower, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ping_is_true_when_no_l2_configured() {
        let cache = SwrCache::new(None, Duration::from_millis(10), Duration::from_secs(1));
        assert!(cache.ping().await);
    }
}
