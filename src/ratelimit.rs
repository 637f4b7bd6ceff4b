//! Per-client rate limiting.
//!
//! Each client key owns a [`TokenBucket`]. The [`RateLimiterRegistry`] hands
//! buckets out, refreshing the entry's last-seen time on every lookup, and a
//! background sweep drops entries idle longer than the inactivity threshold.
//!
//! Lookups and refreshes share the map's read lock (the refresh is an atomic
//! store); creating an entry and sweeping take the write lock, so a sweep can
//! never interleave with a lookup of the entry it is about to remove.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ProxyError, Result};

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(2 * 60);
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket refilled continuously at `rate` tokens per second, holding at
/// most `burst` tokens. Starts full.
#[derive(Debug)]
pub struct TokenBucket {
    rate: u32,
    burst: u32,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(rate: u32, burst: u32) -> Self {
        Self {
            rate,
            burst,
            state: Mutex::new(BucketState {
                tokens: f64::from(burst),
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Take one token if one is available. Never waits.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * f64::from(self.rate)).min(f64::from(self.burst));
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct Entry {
    limiter: Arc<TokenBucket>,
    /// Milliseconds since the registry epoch.
    last_seen_ms: AtomicU64,
}

#[derive(Debug)]
pub struct RateLimiterRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    rate: u32,
    burst: u32,
    idle_timeout: Duration,
    epoch: Instant,
}

impl RateLimiterRegistry {
    pub fn new(rate: u32, burst: u32) -> Self {
        Self::with_idle_timeout(rate, burst, IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(rate: u32, burst: u32, idle_timeout: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            rate,
            burst,
            idle_timeout,
            epoch: Instant::now(),
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Return the bucket for `key`, creating it on first use.
    pub fn acquire(&self, key: &str) -> Arc<TokenBucket> {
        let now = self.now_ms();

        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get(key) {
                entry.last_seen_ms.fetch_max(now, Ordering::Relaxed);
                return Arc::clone(&entry.limiter);
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have created it between the two locks.
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            limiter: Arc::new(TokenBucket::new(self.rate, self.burst)),
            last_seen_ms: AtomicU64::new(now),
        });
        entry.last_seen_ms.fetch_max(now, Ordering::Relaxed);
        Arc::clone(&entry.limiter)
    }

    /// Admit or reject one request from `key`.
    pub fn check(&self, key: &str) -> Result<()> {
        let limiter = self.acquire(key);
        if limiter.try_acquire() {
            Ok(())
        } else {
            Err(ProxyError::RateLimited {
                limit: limiter.rate(),
            })
        }
    }

    /// Remove entries idle for longer than the inactivity threshold.
    /// Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.now_ms();
        let threshold = u64::try_from(self.idle_timeout.as_millis()).unwrap_or(u64::MAX);

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| {
            now.saturating_sub(entry.last_seen_ms.load(Ordering::Relaxed)) <= threshold
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run [`sweep`](Self::sweep) every `period` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = registry.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, remaining = registry.len(), "swept idle rate limiters");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    #[tokio::test(start_paused = true)]
    async fn test_bucket_allows_burst_then_rejects() {
        let bucket = TokenBucket::new(1, 3);

        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_refills_over_time() {
        let bucket = TokenBucket::new(2, 2);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        // Never refills above the burst size.
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn test_concurrent_first_callers_share_one_limiter() {
        let registry = Arc::new(RateLimiterRegistry::new(5, 5));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.acquire("10.0.0.1")
                })
            })
            .collect();

        let limiters: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(registry.len(), 1);
        for limiter in &limiters[1..] {
            assert!(Arc::ptr_eq(&limiters[0], limiter));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_reports_configured_rate() {
        let registry = RateLimiterRegistry::new(4, 1);

        registry.check("a").unwrap();
        let err = registry.check("a").unwrap_err();
        assert!(matches!(err, ProxyError::RateLimited { limit: 4 }));

        // Other clients are unaffected.
        registry.check("b").unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_idle_entries() {
        let registry = RateLimiterRegistry::with_idle_timeout(1, 1, Duration::from_secs(600));
        let stale = registry.acquire("stale");
        assert!(stale.try_acquire());

        tokio::time::advance(Duration::from_secs(540)).await;
        registry.acquire("fresh");
        tokio::time::advance(Duration::from_secs(120)).await;

        assert_eq!(registry.sweep(), 1);
        assert_eq!(registry.len(), 1);

        // A returning client gets a fresh, full bucket.
        let recreated = registry.acquire("stale");
        assert!(!Arc::ptr_eq(&stale, &recreated));
        assert!(recreated.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_refreshes_last_seen() {
        let registry = RateLimiterRegistry::with_idle_timeout(1, 1, Duration::from_secs(600));
        let first = registry.acquire("client");

        tokio::time::advance(Duration::from_secs(500)).await;
        let again = registry.acquire("client");
        tokio::time::advance(Duration::from_secs(500)).await;

        assert_eq!(registry.sweep(), 0);
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_evicts_and_stops() {
        let registry = Arc::new(RateLimiterRegistry::with_idle_timeout(
            1,
            1,
            Duration::from_secs(10),
        ));
        let shutdown = CancellationToken::new();
        let sweeper = registry.spawn_sweeper(Duration::from_secs(5), shutdown.clone());

        registry.acquire("idle");
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(registry.is_empty());

        shutdown.cancel();
        sweeper.await.unwrap();
    }
}
