//! Fixed-window rate limiting
//!
//! Requests are counted against one-minute windows aligned to wall-clock
//! minute boundaries. The counter increment and the limit check happen
//! under a single write guard, so two concurrent requests cannot both
//! claim the last slot in a window.
//!
//! Window state sits behind [`RateWindowStore`]; the default
//! [`MemoryWindowStore`] is per-process (for development and single-node
//! deployments), and a shared backing store can be injected via
//! [`RateLimiter::with_store`] without touching callers.
//!
//! Limits are configurable via environment variables:
//! - `RATE_LIMIT_PER_KEY_PER_MINUTE`: Requests per API key (default: 60)
//! - `RATE_LIMIT_PER_IP_PER_MINUTE`: Unauthenticated requests per IP (default: 20)

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use time::OffsetDateTime;

/// Window length in seconds
pub const WINDOW_SECONDS: i64 = 60;

/// Get configurable per-API-key rate limit per minute
fn get_per_key_rate_limit() -> u32 {
    static LIMIT: OnceLock<u32> = OnceLock::new();
    *LIMIT.get_or_init(|| {
        std::env::var("RATE_LIMIT_PER_KEY_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60)
    })
}

/// Get configurable per-IP rate limit per minute
fn get_per_ip_rate_limit() -> u32 {
    static LIMIT: OnceLock<u32> = OnceLock::new();
    *LIMIT.get_or_init(|| {
        std::env::var("RATE_LIMIT_PER_IP_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20)
    })
}

/// Rate limit check result
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp of the next window boundary
    pub reset_at: i64,
    pub retry_after_seconds: Option<u32>,
}

/// Window counter storage.
///
/// Implementations must make the count-and-check per identity atomic; the
/// limiter never holds its own lock around these calls.
#[async_trait]
pub trait RateWindowStore: Send + Sync {
    /// Count one request against `identity`'s window at `now_unix` and
    /// report the decision. A denied request must not consume a slot.
    async fn check_at(&self, identity: &str, limit: u32, now_unix: i64) -> RateLimitDecision;

    /// Drop windows that ended long before `now_unix`.
    async fn cleanup(&self, now_unix: i64);
}

/// In-memory window counters (per process; a gateway instance enforces
/// its own limits)
pub struct MemoryWindowStore {
    /// identity -> (count, window_start)
    windows: tokio::sync::RwLock<HashMap<String, (u32, i64)>>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self {
            windows: tokio::sync::RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateWindowStore for MemoryWindowStore {
    async fn check_at(&self, identity: &str, limit: u32, now_unix: i64) -> RateLimitDecision {
        let window_start = now_unix - (now_unix % WINDOW_SECONDS);

        let mut windows = self.windows.write().await;
        let entry = windows
            .entry(identity.to_string())
            .or_insert((0, window_start));

        // Stale window resets on first touch
        if entry.1 != window_start {
            entry.0 = 0;
            entry.1 = window_start;
        }

        let allowed = entry.0 < limit;
        if allowed {
            entry.0 += 1;
        }

        RateLimitDecision {
            allowed,
            limit,
            remaining: limit.saturating_sub(entry.0),
            reset_at: window_start + WINDOW_SECONDS,
            retry_after_seconds: if allowed {
                None
            } else {
                Some((window_start + WINDOW_SECONDS - now_unix).max(1) as u32)
            },
        }
    }

    async fn cleanup(&self, now_unix: i64) {
        let cutoff = now_unix - 3600;
        let mut windows = self.windows.write().await;
        windows.retain(|_, (_, start)| *start > cutoff);
    }
}

/// Rate limiter service
pub struct RateLimiter {
    store: Arc<dyn RateWindowStore>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryWindowStore::new()))
    }

    /// Build a limiter over an injected window store
    pub fn with_store(store: Arc<dyn RateWindowStore>) -> Self {
        Self { store }
    }

    /// Check rate limit for an authenticated API key.
    /// Configurable via RATE_LIMIT_PER_KEY_PER_MINUTE (default: 60)
    pub async fn check_api_key(&self, key_id: &str) -> RateLimitDecision {
        let identity = format!("ratelimit:key:{}", key_id);
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.store
            .check_at(&identity, get_per_key_rate_limit(), now)
            .await
    }

    /// Check rate limit for a client IP (unauthenticated surface such as
    /// webhooks and health probes).
    /// Configurable via RATE_LIMIT_PER_IP_PER_MINUTE (default: 20)
    pub async fn check_ip(&self, ip_address: &str) -> RateLimitDecision {
        let identity = format!("ratelimit:ip:{}", ip_address);
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.store
            .check_at(&identity, get_per_ip_rate_limit(), now)
            .await
    }

    /// Drop counters older than an hour (call periodically)
    pub async fn cleanup(&self) {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.store.cleanup(now).await;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allows_within_limit() {
        let table = MemoryWindowStore::new();

        for i in 0..5 {
            let decision = table.check_at("key-a", 10, 1_000_000).await;
            assert!(decision.allowed, "Request {} should be allowed", i);
            assert_eq!(decision.remaining, 10 - i - 1);
        }
    }

    #[tokio::test]
    async fn test_blocks_over_limit() {
        let table = MemoryWindowStore::new();

        for _ in 0..3 {
            let decision = table.check_at("key-a", 3, 1_000_000).await;
            assert!(decision.allowed);
        }

        let decision = table.check_at("key-a", 3, 1_000_010).await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        let retry = decision.retry_after_seconds.unwrap();
        assert!(retry >= 1 && retry <= WINDOW_SECONDS as u32);
    }

    #[tokio::test]
    async fn test_blocked_count_does_not_consume_slot() {
        let table = MemoryWindowStore::new();

        table.check_at("key-a", 1, 1_000_000).await;
        // Denied requests do not extend the exhaustion
        for _ in 0..10 {
            let decision = table.check_at("key-a", 1, 1_000_001).await;
            assert!(!decision.allowed);
        }

        // New window: allowed again
        let decision = table.check_at("key-a", 1, 1_000_000 + WINDOW_SECONDS).await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_separate_identities_independent() {
        let table = MemoryWindowStore::new();

        for _ in 0..3 {
            table.check_at("key-a", 3, 1_000_000).await;
        }
        assert!(!table.check_at("key-a", 3, 1_000_000).await.allowed);
        assert!(table.check_at("key-b", 3, 1_000_000).await.allowed);
    }

    #[tokio::test]
    async fn test_window_resets_on_boundary() {
        let table = MemoryWindowStore::new();
        let now = 1_000_019;
        let window_start = now - (now % WINDOW_SECONDS);

        for _ in 0..2 {
            table.check_at("key-a", 2, now).await;
        }
        assert!(!table.check_at("key-a", 2, now).await.allowed);

        let next_window = window_start + WINDOW_SECONDS;
        let decision = table.check_at("key-a", 2, next_window).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
        assert_eq!(decision.reset_at, next_window + WINDOW_SECONDS);
    }

    #[tokio::test]
    async fn test_cleanup_drops_stale_windows() {
        let table = MemoryWindowStore::new();

        table.check_at("old", 10, 1_000_000).await;
        table.check_at("fresh", 10, 1_000_000 + 7_200).await;

        table.cleanup(1_000_000 + 7_200).await;

        let windows = table.windows.read().await;
        assert!(!windows.contains_key("old"));
        assert!(windows.contains_key("fresh"));
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let limiter = RateLimiter::new();
        let cloned = limiter.clone();

        limiter.store.check_at("shared", 2, 1_000_000).await;
        cloned.store.check_at("shared", 2, 1_000_000).await;

        let decision = limiter.store.check_at("shared", 2, 1_000_000).await;
        assert!(!decision.allowed);
    }

    /// Store that denies everything; stands in for a shared backing store
    struct ClosedStore;

    #[async_trait]
    impl RateWindowStore for ClosedStore {
        async fn check_at(
            &self,
            _identity: &str,
            limit: u32,
            now_unix: i64,
        ) -> RateLimitDecision {
            RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_at: now_unix + WINDOW_SECONDS,
                retry_after_seconds: Some(1),
            }
        }

        async fn cleanup(&self, _now_unix: i64) {}
    }

    #[tokio::test]
    async fn test_injected_store_backs_every_check() {
        let limiter = RateLimiter::with_store(Arc::new(ClosedStore));

        assert!(!limiter.check_api_key("key-a").await.allowed);
        assert!(!limiter.check_ip("203.0.113.9").await.allowed);
    }
}
