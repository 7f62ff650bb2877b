//! Rate limiting for sensitive endpoints
//!
//! Fixed-window counters. Redis is used for distributed limiting across
//! nodes; the in-memory limiter covers single-node deployments.

use crate::store::StoreError;
use async_trait::async_trait;
use fred::prelude::*;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum requests allowed in the window
    pub max_requests: u32,
    /// Time window duration
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self::with_window(max_requests, Duration::from_secs(window_secs))
    }

    pub fn with_window(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

/// Rate string parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateParseError {
    #[error("rate '{0}' must look like N/unit (e.g. 5/m)")]
    Format(String),

    #[error("unknown rate unit '{0}' (use s, m, h or d)")]
    Unit(String),
}

impl FromStr for RateLimitConfig {
    type Err = RateParseError;

    /// Parse `N/unit` with an optional multiplier: `5/m`, `10/min`, `3/10s`, `100/h`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format_err = || RateParseError::Format(s.to_string());

        let (count, period) = s.trim().split_once('/').ok_or_else(format_err)?;
        let max_requests: u32 = count.trim().parse().map_err(|_| format_err())?;

        let period = period.trim();
        let split = period
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(format_err)?;
        let (multiplier, unit) = period.split_at(split);
        let multiplier: u64 = if multiplier.is_empty() {
            1
        } else {
            multiplier.parse().map_err(|_| format_err())?
        };
        if multiplier == 0 {
            return Err(format_err());
        }

        let unit_secs = match unit.to_ascii_lowercase().as_str() {
            "s" | "sec" | "second" => 1,
            "m" | "min" | "minute" => 60,
            "h" | "hour" => 60 * 60,
            "d" | "day" => 24 * 60 * 60,
            other => return Err(RateParseError::Unit(other.to_string())),
        };

        Ok(Self::new(max_requests, multiplier * unit_secs))
    }
}

impl fmt::Display for RateLimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}s", self.max_requests, self.window.as_secs())
    }
}

/// Pre-configured rate limits for different operations
pub mod limits {
    use super::*;

    /// Login attempts: 10/min for authenticated callers, 5/min for anonymous
    pub fn login_authenticated() -> RateLimitConfig {
        RateLimitConfig::new(10, 60)
    }

    pub fn login_anonymous() -> RateLimitConfig {
        RateLimitConfig::new(5, 60)
    }
}

/// Rate limit key for a request: the caller identity when present, else the address
pub fn rate_key(identity: Option<&str>, address: Option<&str>) -> Option<String> {
    match (identity.filter(|i| !i.is_empty()), address) {
        (Some(user), _) => Some(format!("user:{}", user)),
        (None, Some(ip)) => Some(format!("ip:{}", ip)),
        (None, None) => None,
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Current count in the window
    pub current: u32,
    /// Maximum allowed in the window
    pub limit: u32,
    /// Seconds until the window resets
    pub reset_in_secs: u64,
    /// Remaining requests in this window
    pub remaining: u32,
}

impl RateLimitResult {
    fn from_count(current: u32, config: &RateLimitConfig, reset_in_secs: u64) -> Self {
        let allowed = current <= config.max_requests;
        Self {
            allowed,
            current,
            limit: config.max_requests,
            reset_in_secs,
            remaining: config.max_requests.saturating_sub(current),
        }
    }

    /// Create headers for rate limit response
    pub fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("X-RateLimit-Limit".to_string(), self.limit.to_string()),
            ("X-RateLimit-Remaining".to_string(), self.remaining.to_string()),
            ("X-RateLimit-Reset".to_string(), self.reset_in_secs.to_string()),
        ]
    }
}

/// Atomic check-and-increment over a fixed window.
///
/// Every call counts as one request, including calls that come back limited;
/// a limited key stays limited until its window elapses.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// # Arguments
    /// * `key_prefix` - Prefix for the rate limit key (e.g., "auth:login")
    /// * `identifier` - Unique identifier (e.g., "user:42" or "ip:203.0.113.5")
    /// * `config` - Rate limit configuration
    async fn check(
        &self,
        key_prefix: &str,
        identifier: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitResult, StoreError>;
}

fn limiter_key(key_prefix: &str, identifier: &str) -> String {
    format!("rl:{}:{}", key_prefix, identifier)
}

/// Distributed rate limiter using Redis
#[derive(Clone)]
pub struct RedisRateLimiter {
    redis: Client,
}

impl RedisRateLimiter {
    pub fn new(redis: Client) -> Self {
        Self { redis }
    }

    /// Reset rate limit for an identifier
    pub async fn reset(&self, key_prefix: &str, identifier: &str) -> Result<(), StoreError> {
        let _: i64 = self.redis.del(limiter_key(key_prefix, identifier)).await?;
        Ok(())
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    /// INCR is atomic per key, so concurrent callers each observe a distinct count.
    async fn check(
        &self,
        key_prefix: &str,
        identifier: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitResult, StoreError> {
        let key = limiter_key(key_prefix, identifier);
        let window_secs = config.window.as_secs().max(1) as i64;

        let current: i64 = self.redis.incr(&key).await?;

        // Set expiry on first request
        if current == 1 {
            let _: bool = self.redis.expire(&key, window_secs, None).await?;
        }

        // A key without TTL (lost EXPIRE) would never reset; repair it
        let mut ttl: i64 = self.redis.ttl(&key).await?;
        if ttl < 0 {
            let _: bool = self.redis.expire(&key, window_secs, None).await?;
            ttl = window_secs;
        }

        let current = u32::try_from(current).unwrap_or(u32::MAX);
        Ok(RateLimitResult::from_count(current, config, ttl as u64))
    }
}

/// In-memory rate limiter for local-only rate limiting
pub mod local {
    use super::*;
    use dashmap::DashMap;
    use std::time::Instant;

    pub struct LocalRateLimiter {
        buckets: DashMap<String, (u32, Instant)>,
    }

    impl LocalRateLimiter {
        pub fn new() -> Self {
            Self {
                buckets: DashMap::new(),
            }
        }

        /// The entry guard holds the shard lock, serializing callers per key
        pub fn check_key(&self, key: &str, config: &RateLimitConfig) -> RateLimitResult {
            let now = Instant::now();

            let mut entry = self.buckets.entry(key.to_string()).or_insert((0, now));
            let (count, window_start) = entry.value_mut();

            // Reset if window expired
            if now.duration_since(*window_start) >= config.window {
                *count = 0;
                *window_start = now;
            }

            *count = count.saturating_add(1);
            let elapsed = now.duration_since(*window_start);
            let reset_in_secs = config.window.saturating_sub(elapsed).as_secs();

            RateLimitResult::from_count(*count, config, reset_in_secs)
        }

        /// Clean up expired entries (call periodically)
        pub fn cleanup(&self, max_age: Duration) {
            let now = Instant::now();
            self.buckets.retain(|_, (_, start)| now.duration_since(*start) < max_age);
        }

        pub fn len(&self) -> usize {
            self.buckets.len()
        }

        pub fn is_empty(&self) -> bool {
            self.buckets.is_empty()
        }
    }

    impl Default for LocalRateLimiter {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl RateLimiter for LocalRateLimiter {
        async fn check(
            &self,
            key_prefix: &str,
            identifier: &str,
            config: &RateLimitConfig,
        ) -> Result<RateLimitResult, StoreError> {
            Ok(self.check_key(&limiter_key(key_prefix, identifier), config))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::local::LocalRateLimiter;
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_rate_limit_config() {
        let config = RateLimitConfig::new(100, 60);
        assert_eq!(config.max_requests, 100);
        assert_eq!(config.window.as_secs(), 60);
    }

    #[test]
    fn test_parse_rate() {
        assert_eq!("5/m".parse::<RateLimitConfig>().unwrap(), RateLimitConfig::new(5, 60));
        assert_eq!("10/min".parse::<RateLimitConfig>().unwrap(), RateLimitConfig::new(10, 60));
        assert_eq!("100/h".parse::<RateLimitConfig>().unwrap(), RateLimitConfig::new(100, 3600));
        assert_eq!("3/10s".parse::<RateLimitConfig>().unwrap(), RateLimitConfig::new(3, 10));
        assert_eq!(" 1000 / d ".parse::<RateLimitConfig>().unwrap(), RateLimitConfig::new(1000, 86400));
    }

    #[test]
    fn test_parse_rate_errors() {
        assert!(matches!("5".parse::<RateLimitConfig>(), Err(RateParseError::Format(_))));
        assert!(matches!("x/m".parse::<RateLimitConfig>(), Err(RateParseError::Format(_))));
        assert!(matches!("5/10".parse::<RateLimitConfig>(), Err(RateParseError::Format(_))));
        assert!(matches!("5/0m".parse::<RateLimitConfig>(), Err(RateParseError::Format(_))));
        assert!(matches!("5/w".parse::<RateLimitConfig>(), Err(RateParseError::Unit(_))));
    }

    #[test]
    fn test_login_limits() {
        assert_eq!(limits::login_authenticated(), "10/m".parse().unwrap());
        assert_eq!(limits::login_anonymous(), "5/m".parse().unwrap());
    }

    #[test]
    fn test_rate_key() {
        assert_eq!(rate_key(Some("42"), Some("1.2.3.4")).as_deref(), Some("user:42"));
        assert_eq!(rate_key(None, Some("1.2.3.4")).as_deref(), Some("ip:1.2.3.4"));
        assert_eq!(rate_key(Some(""), Some("1.2.3.4")).as_deref(), Some("ip:1.2.3.4"));
        assert_eq!(rate_key(None, None), None);
    }

    #[test]
    fn test_result_headers() {
        let result = RateLimitResult::from_count(6, &RateLimitConfig::new(5, 60), 42);
        assert!(!result.allowed);
        let headers = result.headers();
        assert!(headers.contains(&("X-RateLimit-Limit".to_string(), "5".to_string())));
        assert!(headers.contains(&("X-RateLimit-Remaining".to_string(), "0".to_string())));
        assert!(headers.contains(&("X-RateLimit-Reset".to_string(), "42".to_string())));
    }

    #[test]
    fn test_local_rate_limiter() {
        let limiter = LocalRateLimiter::new();
        let config = RateLimitConfig::new(3, 60);

        // First 3 requests should be allowed
        for i in 1..=3 {
            let result = limiter.check_key("test", &config);
            assert!(result.allowed, "Request {} should be allowed", i);
            assert_eq!(result.current, i as u32);
            assert_eq!(result.remaining, 3 - i as u32);
        }

        // 4th request should be blocked
        let result = limiter.check_key("test", &config);
        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);

        // Other keys are independent
        assert!(limiter.check_key("other", &config).allowed);
    }

    #[test]
    fn test_local_rate_limiter_window_reset() {
        let limiter = LocalRateLimiter::new();
        let config = RateLimitConfig::with_window(3, Duration::from_millis(50));

        for _ in 0..3 {
            assert!(limiter.check_key("test", &config).allowed);
        }
        assert!(!limiter.check_key("test", &config).allowed);

        std::thread::sleep(Duration::from_millis(70));

        let result = limiter.check_key("test", &config);
        assert!(result.allowed);
        assert_eq!(result.current, 1);
    }

    #[test]
    fn test_local_rate_limiter_stays_limited_within_window() {
        let limiter = LocalRateLimiter::new();
        let config = RateLimitConfig::new(1, 60);

        assert!(limiter.check_key("test", &config).allowed);
        for _ in 0..5 {
            assert!(!limiter.check_key("test", &config).allowed);
        }
    }

    #[test]
    fn test_local_rate_limiter_concurrent_same_key() {
        let limiter = Arc::new(LocalRateLimiter::new());
        let config = RateLimitConfig::new(10, 60);

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let limiter = limiter.clone();
                let config = config.clone();
                std::thread::spawn(move || limiter.check_key("shared", &config).allowed)
            })
            .collect();

        let allowed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(allowed, 10);
    }

    #[test]
    fn test_local_rate_limiter_cleanup() {
        let limiter = LocalRateLimiter::new();
        let config = RateLimitConfig::new(3, 60);
        limiter.check_key("a", &config);
        limiter.check_key("b", &config);

        std::thread::sleep(Duration::from_millis(5));
        limiter.cleanup(Duration::from_millis(1));
        assert!(limiter.is_empty());
    }

    #[tokio::test]
    async fn test_local_rate_limiter_trait_prefixes_keys() {
        let limiter = LocalRateLimiter::new();
        let config = RateLimitConfig::new(1, 60);

        assert!(limiter.check("auth:login", "ip:1.2.3.4", &config).await.unwrap().allowed);
        assert!(!limiter.check("auth:login", "ip:1.2.3.4", &config).await.unwrap().allowed);
        assert!(limiter.check("other", "ip:1.2.3.4", &config).await.unwrap().allowed);
        assert_eq!(limiter.len(), 2);
    }
}
