//! Fixed-window rate limiting behind a pluggable counter store.
//!
//! `MemoryRateLimitStore` keeps counters in process memory. With several instances behind a
//! load balancer each one counts separately, so the effective limit becomes
//! `instances * max_requests`. A shared store (Redis `INCR` + `PEXPIRE`, or a SQL upsert keyed
//! by `(key, window_start)`) implements the same trait without touching call sites.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u32,
    pub window_start_ms: i64,
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Increment the counter for `key` in the window containing `now_ms` and return it.
    async fn increment(&self, key: &str, window_ms: i64, now_ms: i64) -> anyhow::Result<WindowCount>;

    /// Number of keys currently tracked.
    async fn len(&self) -> usize;

    /// Drop windows that ended before `now_ms`.
    async fn prune(&self, window_ms: i64, now_ms: i64) -> usize;
}

#[derive(Default)]
pub struct MemoryRateLimitStore {
    windows: DashMap<String, WindowCount>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn increment(&self, key: &str, window_ms: i64, now_ms: i64) -> anyhow::Result<WindowCount> {
        let window_start_ms = now_ms - now_ms.rem_euclid(window_ms);
        let mut entry = self.windows.entry(key.to_string()).or_insert(WindowCount {
            count: 0,
            window_start_ms,
        });
        if entry.window_start_ms != window_start_ms {
            *entry = WindowCount {
                count: 0,
                window_start_ms,
            };
        }
        entry.count = entry.count.saturating_add(1);
        Ok(*entry)
    }

    async fn len(&self) -> usize {
        self.windows.len()
    }

    async fn prune(&self, window_ms: i64, now_ms: i64) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| w.window_start_ms + window_ms > now_ms);
        before.saturating_sub(self.windows.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after_secs: u64,
}

pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    max_requests: u32,
    window_ms: i64,
    max_keys: usize,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, max_requests: u32, window_secs: u64, max_keys: usize) -> Self {
        Self {
            store,
            max_requests,
            window_ms: (window_secs.max(1) * 1000) as i64,
            max_keys,
        }
    }

    pub fn in_memory(max_requests: u32, window_secs: u64, max_keys: usize) -> Self {
        Self::new(
            Arc::new(MemoryRateLimitStore::new()),
            max_requests,
            window_secs,
            max_keys,
        )
    }

    pub async fn check(&self, key: &str) -> anyhow::Result<RateLimitDecision> {
        self.check_at(key, chrono::Utc::now().timestamp_millis()).await
    }

    pub async fn check_at(&self, key: &str, now_ms: i64) -> anyhow::Result<RateLimitDecision> {
        if self.store.len().await > self.max_keys {
            let pruned = self.store.prune(self.window_ms, now_ms).await;
            tracing::debug!(pruned, "pruned expired rate limit windows");
        }

        let window = self.store.increment(key, self.window_ms, now_ms).await?;
        let allowed = window.count <= self.max_requests;
        let reset_in_ms = (window.window_start_ms + self.window_ms - now_ms).max(0);

        Ok(RateLimitDecision {
            allowed,
            remaining: self.max_requests.saturating_sub(window.count),
            retry_after_secs: ((reset_in_ms + 999) / 1000) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limit_within_window() {
        let limiter = RateLimiter::in_memory(3, 60, 100);
        let now = 1_700_000_000_000;
        for expected_remaining in [2, 1, 0] {
            let d = limiter.check_at("ip:1", now).await.unwrap();
            assert!(d.allowed);
            assert_eq!(d.remaining, expected_remaining);
        }
        let denied = limiter.check_at("ip:1", now + 10).await.unwrap();
        assert!(!denied.allowed);
        assert!(denied.retry_after_secs > 0 && denied.retry_after_secs <= 60);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::in_memory(1, 60, 100);
        let now = 1_700_000_000_000;
        assert!(limiter.check_at("ip:1", now).await.unwrap().allowed);
        assert!(limiter.check_at("ip:2", now).await.unwrap().allowed);
        assert!(!limiter.check_at("ip:1", now).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_new_window_resets_count() {
        let limiter = RateLimiter::in_memory(1, 60, 100);
        let now = 1_700_000_040_000;
        assert!(limiter.check_at("k", now).await.unwrap().allowed);
        assert!(!limiter.check_at("k", now + 1).await.unwrap().allowed);
        assert!(limiter.check_at("k", now + 60_000).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_prune_when_store_exceeds_bound() {
        let store = Arc::new(MemoryRateLimitStore::new());
        let limiter = RateLimiter::new(store.clone(), 10, 60, 2);
        let now = 1_700_000_000_000;
        for i in 0..3 {
            limiter.check_at(&format!("k{i}"), now).await.unwrap();
        }
        assert_eq!(store.len().await, 3);

        limiter.check_at("fresh", now + 120_000).await.unwrap();
        assert_eq!(store.len().await, 1);
    }
}
