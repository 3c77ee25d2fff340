//! Throttled value cache, used for the source's finalized height.
//!
//! A value is re-fetched only once it is older than the refresh interval.
//! The slot is guarded by an async mutex held across the fetch, so
//! concurrent callers never start a second fetch; they wait and read the
//! freshly cached value instead.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::IndexerError;

struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

/// Caches the result of a remote call for at most `interval`.
pub struct Throttler<T> {
    interval: Duration,
    slot: Mutex<Option<Cached<T>>>,
}

impl<T: Clone + Send> Throttler<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slot: Mutex::new(None),
        }
    }

    /// Return the cached value, or await `fetch` if it is missing or stale.
    ///
    /// Fetch errors are returned to the caller and leave the cache untouched.
    pub async fn get<F, Fut>(&self, fetch: F) -> Result<T, IndexerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, IndexerError>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(cached) = slot.as_ref() {
            if cached.fetched_at.elapsed() < self.interval {
                return Ok(cached.value.clone());
            }
        }

        let value = fetch().await?;
        *slot = Some(Cached {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use std::sync::Arc;

    async fn fetch_height(calls: &AtomicU32, height: &AtomicU64) -> Result<u64, IndexerError> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(height.load(Ordering::SeqCst))
    }

    #[tokio::test(start_paused = true)]
    async fn ten_calls_within_interval_fetch_once() {
        let calls = AtomicU32::new(0);
        let height = AtomicU64::new(1_000);
        let cache = Throttler::new(Duration::from_secs(30));

        for _ in 0..10 {
            let h = cache.get(|| fetch_height(&calls, &height)).await.unwrap();
            assert_eq!(h, 1_000);
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refetches_after_interval() {
        let calls = AtomicU32::new(0);
        let height = AtomicU64::new(10);
        let cache = Throttler::new(Duration::from_secs(30));

        assert_eq!(cache.get(|| fetch_height(&calls, &height)).await.unwrap(), 10);
        height.store(25, Ordering::SeqCst);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get(|| fetch_height(&calls, &height)).await.unwrap(), 10);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(|| fetch_height(&calls, &height)).await.unwrap(), 25);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_fetch() {
        let calls = Arc::new(AtomicU32::new(0));
        let cache = Arc::new(Throttler::new(Duration::from_secs(30)));

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let calls = calls.clone();
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get(|| async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        Ok(77u64)
                    })
                    .await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 77);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache: Throttler<u64> = Throttler::new(Duration::from_secs(30));
        let err = cache
            .get(|| async { Err(IndexerError::Source("unreachable".into())) })
            .await;
        assert!(err.is_err());

        // The failed fetch left nothing behind, so this one runs.
        assert_eq!(cache.get(|| async { Ok(5) }).await.unwrap(), 5);
        assert_eq!(cache.get(|| async { Ok(6) }).await.unwrap(), 5);
    }
}
