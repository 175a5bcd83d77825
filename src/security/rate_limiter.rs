use crate::store::Store;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Endpoint classes with independent windows and ceilings. Payment endpoints
/// are the strictest; everything unmatched falls into the general class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    Payment,
    Booking,
    General,
}

impl EndpointClass {
    pub fn classify(path: &str) -> Self {
        if path.starts_with("/api/checkout") || path.starts_with("/api/payment") {
            EndpointClass::Payment
        } else if path.starts_with("/api/bookings") {
            EndpointClass::Booking
        } else {
            EndpointClass::General
        }
    }

    fn key_prefix(&self) -> &'static str {
        match self {
            EndpointClass::Payment => "ratelimit:payment",
            EndpointClass::Booking => "ratelimit:booking",
            EndpointClass::General => "ratelimit:general",
        }
    }
}

/// Per-class window size and ceiling
#[derive(Debug, Clone, Copy)]
pub struct ClassLimit {
    pub max_requests: i64,
    pub window_seconds: u64,
}

/// Ceilings for each endpoint class. Defaults are the tested baseline:
/// payment 3/min, booking 5/min, general 10/min.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub payment: ClassLimit,
    pub booking: ClassLimit,
    pub general: ClassLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            payment: ClassLimit { max_requests: 3, window_seconds: 60 },
            booking: ClassLimit { max_requests: 5, window_seconds: 60 },
            general: ClassLimit { max_requests: 10, window_seconds: 60 },
        }
    }
}

impl RateLimitConfig {
    pub fn for_class(&self, class: EndpointClass) -> ClassLimit {
        match class {
            EndpointClass::Payment => self.payment,
            EndpointClass::Booking => self.booking,
            EndpointClass::General => self.general,
        }
    }
}

#[derive(Debug)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: i64,
    pub remaining: i64,
    pub reset_at: u64,
}

/// Sliding-window request counter backed by a Redis sorted set per
/// (endpoint class, identity key). Limits for distinct keys are independent;
/// once a window's elapsed duration passes, a previously blocked key is
/// allowed again.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn Store>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Count this request against the key's window and report whether it is
    /// allowed. Exceeding the ceiling yields `allowed=false, remaining=0`;
    /// the caller returns the 429.
    pub async fn limit(&self, key: &str, class: EndpointClass) -> Result<RateLimitResult> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| anyhow!("System clock before epoch: {}", e))?
            .as_secs_f64();

        let ClassLimit { max_requests, window_seconds } = self.config.for_class(class);
        let window_key = format!("{}:{}", class.key_prefix(), key);
        let window_start = now - window_seconds as f64;

        // Drop entries that have slid out of the window
        self.store
            .zrembyscore(&window_key, 0.0, window_start)
            .await
            .context("Failed to trim rate window")?;

        let current_count = self
            .store
            .zcount(&window_key, window_start, now)
            .await
            .context("Failed to count rate window")?;

        if current_count >= max_requests {
            // Reset when the oldest counted request leaves the window
            let oldest: Vec<(String, f64)> = self
                .store
                .zrange_withscores(&window_key, 0, 0)
                .await
                .unwrap_or_default();

            let reset_at = match oldest.first() {
                Some((_, oldest_ts)) => (oldest_ts + window_seconds as f64) as u64,
                None => (now + window_seconds as f64) as u64,
            };

            return Ok(RateLimitResult {
                allowed: false,
                limit: max_requests,
                remaining: 0,
                reset_at,
            });
        }

        // Members carry a nonce so concurrent requests landing on the same
        // timestamp all count instead of collapsing into one ZADD member.
        let member = format!("{:.6}:{}", now, uuid::Uuid::new_v4());
        self.store
            .zadd(&window_key, now, &member)
            .await
            .context("Failed to record request")?;

        // Auto-cleanup idle windows
        self.store
            .expire(&window_key, (window_seconds + 10) as i64)
            .await
            .context("Failed to set window expiration")?;

        Ok(RateLimitResult {
            allowed: true,
            limit: max_requests,
            remaining: max_requests - current_count - 1,
            reset_at: (now + window_seconds as f64) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[test]
    fn test_default_class_limits() {
        let config = RateLimitConfig::default();
        assert_eq!(config.for_class(EndpointClass::Payment).max_requests, 3);
        assert_eq!(config.for_class(EndpointClass::Payment).window_seconds, 60);
        assert_eq!(config.for_class(EndpointClass::Booking).max_requests, 5);
        assert_eq!(config.for_class(EndpointClass::General).max_requests, 10);
    }

    #[test]
    fn test_path_classification() {
        assert_eq!(
            EndpointClass::classify("/api/checkout"),
            EndpointClass::Payment
        );
        assert_eq!(
            EndpointClass::classify("/api/payment/confirm"),
            EndpointClass::Payment
        );
        assert_eq!(
            EndpointClass::classify("/api/bookings/123"),
            EndpointClass::Booking
        );
        assert_eq!(EndpointClass::classify("/api/tours"), EndpointClass::General);
        assert_eq!(EndpointClass::classify("/health"), EndpointClass::General);
    }

    #[test]
    fn test_class_key_prefixes_are_distinct() {
        // Distinct prefixes keep per-class windows independent for one key
        let prefixes = [
            EndpointClass::Payment.key_prefix(),
            EndpointClass::Booking.key_prefix(),
            EndpointClass::General.key_prefix(),
        ];
        assert_eq!(
            prefixes.len(),
            prefixes.iter().collect::<std::collections::HashSet<_>>().len()
        );
    }

    #[tokio::test]
    async fn test_window_ceiling_blocks_fourth_payment_request() {
        let limiter = RateLimiter::new(
            Arc::new(MemoryStore::new()),
            RateLimitConfig::default(),
        );

        for i in 0..3 {
            let result = limiter.limit("10.0.0.1", EndpointClass::Payment).await.unwrap();
            assert!(result.allowed, "request {} should be within the window", i + 1);
            assert_eq!(result.remaining, 2 - i);
        }

        let blocked = limiter.limit("10.0.0.1", EndpointClass::Payment).await.unwrap();
        assert!(!blocked.allowed);
        assert_eq!(blocked.remaining, 0);
        assert_eq!(blocked.limit, 3);
        assert!(blocked.reset_at > 0);
    }

    #[tokio::test]
    async fn test_windows_are_independent_per_key_and_class() {
        let limiter = RateLimiter::new(
            Arc::new(MemoryStore::new()),
            RateLimitConfig::default(),
        );

        for _ in 0..3 {
            limiter.limit("10.0.0.1", EndpointClass::Payment).await.unwrap();
        }
        assert!(!limiter.limit("10.0.0.1", EndpointClass::Payment).await.unwrap().allowed);

        // Another caller and another class are both unaffected
        assert!(limiter.limit("10.0.0.2", EndpointClass::Payment).await.unwrap().allowed);
        assert!(limiter.limit("10.0.0.1", EndpointClass::Booking).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_same_instant_requests_each_count() {
        // Burst fast enough that several requests share a timestamp; the
        // nonce in each member keeps them from overwriting each other.
        let limiter = RateLimiter::new(
            Arc::new(MemoryStore::new()),
            RateLimitConfig {
                payment: ClassLimit { max_requests: 5, window_seconds: 60 },
                ..RateLimitConfig::default()
            },
        );

        let mut allowed = 0;
        for _ in 0..8 {
            if limiter.limit("10.0.0.9", EndpointClass::Payment).await.unwrap().allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }
}
