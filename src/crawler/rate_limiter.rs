//! Per-domain token bucket with an explicit acquire/release pair, separate
//! from the bucket itself, so a caller holds the domain's mutual-exclusion
//! slot for the duration of one request rather than just the instant the
//! token is spent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout as tokio_timeout;
use url::Url;

const DEFAULT_RATE_PER_SEC: f64 = 1.0;
const DEFAULT_BURST: f64 = 1.0;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
    crawl_delay: Option<f64>,
    /// When the last request against this domain was granted, for
    /// `effective_delay` spacing independent of the token bucket's own
    /// refill rate.
    last_request: Option<Instant>,
    /// `true` while some caller holds the domain's mutual-exclusion slot.
    locked: bool,
}

impl Bucket {
    fn new(now: Instant) -> Self {
        Bucket {
            tokens: DEFAULT_BURST,
            max_tokens: DEFAULT_BURST,
            refill_rate: DEFAULT_RATE_PER_SEC,
            last_refill: now,
            crawl_delay: None,
            last_request: None,
            locked: false,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
            self.last_refill = now;
        }
    }

    /// Minimum spacing between requests: max(1/rate, crawl-delay hint).
    fn effective_delay(&self) -> f64 {
        let base = 1.0 / self.refill_rate.max(0.0001);
        self.crawl_delay.map(|d| base.max(d)).unwrap_or(base)
    }

    /// `false` while the domain is still within its `effective_delay` spacing
    /// window since the last granted request.
    fn past_effective_delay(&self, now: Instant) -> bool {
        match self.last_request {
            Some(t) => now.duration_since(t).as_secs_f64() >= self.effective_delay(),
            None => true,
        }
    }
}

/// Snapshot of a domain's bucket state, for diagnostics and admin recovery.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct DomainStats {
    pub tokens: f64,
    pub max_tokens: f64,
    pub refill_rate: f64,
    pub crawl_delay: Option<f64>,
    pub locked: bool,
}

/// Per-domain token-bucket rate limiter with mutual exclusion.
///
/// `acquire` takes both the domain lock and a token; the caller must call
/// `release` after its request completes (or use `acquire_guard`, which
/// releases automatically on drop).
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        RateLimiter {
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn domain_of(url: &str) -> String {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
            .unwrap_or_default()
    }

    /// Set a minimum crawl delay (seconds) for the domain of `url`, typically
    /// from a robots.txt `Crawl-delay` directive.
    pub async fn set_crawl_delay(&self, url: &str, seconds: f64) {
        let domain = Self::domain_of(url);
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(domain).or_insert_with(|| Bucket::new(Instant::now()));
        bucket.crawl_delay = Some(seconds);
    }

    /// Seconds the caller would need to wait right now for a token to be
    /// available and the domain's `effective_delay` spacing to have
    /// elapsed, ignoring the mutual-exclusion lock.
    pub async fn wait_time_for(&self, url: &str) -> f64 {
        let domain = Self::domain_of(url);
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(domain).or_insert_with(|| Bucket::new(now));
        bucket.refill(now);

        let token_wait = if bucket.tokens >= 1.0 {
            0.0
        } else {
            (1.0 - bucket.tokens) / bucket.refill_rate.max(0.0001)
        };
        let delay_wait = match bucket.last_request {
            Some(t) => (bucket.effective_delay() - now.duration_since(t).as_secs_f64()).max(0.0),
            None => 0.0,
        };
        token_wait.max(delay_wait)
    }

    /// Acquire the domain lock and one token, waiting up to `timeout` if
    /// `blocking`. Honors the domain's `effective_delay` (max of 1/rate and
    /// any robots-provided crawl-delay) as a minimum spacing since the last
    /// granted request, on top of the token bucket itself. Returns `false`
    /// (without starving other callers) if the timeout elapses first.
    pub async fn acquire(&self, url: &str, blocking: bool, timeout: Duration) -> bool {
        let domain = Self::domain_of(url);
        let deadline = Instant::now() + timeout;

        loop {
            {
                let mut buckets = self.buckets.lock().await;
                let now = Instant::now();
                let bucket = buckets.entry(domain.clone()).or_insert_with(|| Bucket::new(now));
                bucket.refill(now);
                if !bucket.locked && bucket.tokens >= 1.0 && bucket.past_effective_delay(now) {
                    bucket.locked = true;
                    bucket.tokens -= 1.0;
                    bucket.last_request = Some(now);
                    return true;
                }
            }

            if !blocking || Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Acquire with a hard wall-clock cutoff, via `tokio::time::timeout`;
    /// equivalent to `acquire(url, true, timeout)` but fails fast on cancellation.
    pub async fn acquire_timeout(&self, url: &str, timeout: Duration) -> bool {
        tokio_timeout(timeout, self.acquire(url, true, timeout))
            .await
            .unwrap_or(false)
    }

    /// Release the domain's mutual-exclusion lock. Idempotent: releasing an
    /// already-free domain is a no-op.
    pub async fn release(&self, url: &str) {
        let domain = Self::domain_of(url);
        let mut buckets = self.buckets.lock().await;
        if let Some(bucket) = buckets.get_mut(&domain) {
            bucket.locked = false;
        }
    }

    /// RAII guard: `acquire`s now, `release`s when dropped.
    pub async fn acquire_guard(&self, url: &str, timeout: Duration) -> Option<RateLimiterGuard> {
        if self.acquire(url, true, timeout).await {
            Some(RateLimiterGuard {
                limiter: self.clone(),
                url: url.to_string(),
            })
        } else {
            None
        }
    }

    pub async fn get_stats(&self, url: &str) -> DomainStats {
        let domain = Self::domain_of(url);
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(domain).or_insert_with(|| Bucket::new(now));
        bucket.refill(now);
        DomainStats {
            tokens: bucket.tokens,
            max_tokens: bucket.max_tokens,
            refill_rate: bucket.refill_rate,
            crawl_delay: bucket.crawl_delay,
            locked: bucket.locked,
        }
    }

    pub async fn reset_domain(&self, host: &str) {
        self.buckets.lock().await.remove(&host.to_lowercase());
    }

    pub async fn reset_all(&self) {
        self.buckets.lock().await.clear();
    }
}

/// Auto-releasing handle returned by `RateLimiter::acquire_guard`.
pub struct RateLimiterGuard {
    limiter: RateLimiter,
    url: String,
}

impl Drop for RateLimiterGuard {
    fn drop(&mut self) {
        let limiter = self.limiter.clone();
        let url = std::mem::take(&mut self.url);
        tokio::spawn(async move {
            limiter.release(&url).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_release_frees_lock() {
        let rl = RateLimiter::new();
        assert!(rl.acquire("https://example.com/a", false, Duration::from_millis(0)).await);
        assert!(!rl.acquire("https://example.com/b", false, Duration::from_millis(0)).await);
        rl.release("https://example.com/a").await;
        assert!(rl.acquire("https://example.com/c", false, Duration::from_millis(0)).await);
    }

    #[tokio::test]
    async fn test_double_release_is_noop() {
        let rl = RateLimiter::new();
        rl.release("https://example.com").await;
        rl.release("https://example.com").await;
        assert!(rl.acquire("https://example.com", false, Duration::from_millis(0)).await);
    }

    #[tokio::test]
    async fn test_second_immediate_acquire_fails_without_blocking() {
        let rl = RateLimiter::new();
        assert!(rl.acquire("https://example.com", false, Duration::from_millis(0)).await);
        rl.release("https://example.com").await;
        // Token was spent; bucket has burst=1 so a second immediate, non-blocking
        // acquire (new lock, but no tokens left) should fail.
        assert!(!rl.acquire("https://example.com", false, Duration::from_millis(0)).await);
    }

    #[tokio::test]
    async fn test_different_domains_independent() {
        let rl = RateLimiter::new();
        assert!(rl.acquire("https://a.com", false, Duration::from_millis(0)).await);
        assert!(rl.acquire("https://b.com", false, Duration::from_millis(0)).await);
    }

    #[tokio::test]
    async fn test_crawl_delay_widens_effective_delay() {
        let rl = RateLimiter::new();
        rl.set_crawl_delay("https://slow.com", 5.0).await;
        let domain = RateLimiter::domain_of("https://slow.com");
        let bucket = rl.buckets.lock().await.get(&domain).copied().unwrap();
        assert_eq!(bucket.effective_delay(), 5.0);
    }

    #[tokio::test]
    async fn test_reset_domain_clears_lock() {
        let rl = RateLimiter::new();
        rl.acquire("https://x.com", false, Duration::from_millis(0)).await;
        rl.reset_domain("x.com").await;
        assert!(rl.acquire("https://x.com", false, Duration::from_millis(0)).await);
    }

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let rl = RateLimiter::new();
        {
            let _guard = rl.acquire_guard("https://guarded.com", Duration::from_millis(50)).await;
            assert!(!rl.acquire("https://guarded.com", false, Duration::from_millis(0)).await);
        }
        // Give the spawned release task a chance to run.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rl.acquire("https://guarded.com", false, Duration::from_millis(0)).await);
    }

    #[tokio::test]
    async fn test_wait_time_for_zero_when_token_available() {
        let rl = RateLimiter::new();
        assert_eq!(rl.wait_time_for("https://fresh.com").await, 0.0);
    }

    #[tokio::test]
    async fn test_crawl_delay_blocks_back_to_back_requests() {
        let rl = RateLimiter::new();
        rl.set_crawl_delay("https://slow.com", 0.2).await;

        assert!(rl.acquire("https://slow.com", false, Duration::from_millis(0)).await);
        rl.release("https://slow.com").await;

        // Lock is free again but the crawl-delay window hasn't elapsed yet.
        assert!(!rl.acquire("https://slow.com", false, Duration::from_millis(0)).await);

        tokio::time::sleep(Duration::from_millis(210)).await;
        assert!(rl.acquire("https://slow.com", false, Duration::from_millis(0)).await);
    }
}
