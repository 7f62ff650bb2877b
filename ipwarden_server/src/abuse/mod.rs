//! Abuse prevention module
//!
//! Provides protection against:
//! - Known-bad addresses (IP block list)
//! - Credential stuffing (rate limiting on sensitive endpoints)
//! - High-volume and sensitive-path access (periodic anomaly scanning)

pub mod blocklist;
pub mod rate_limit;
pub mod scanner;

pub use blocklist::{block_ip, check_address, unblock_ip, BlockCheck, BlockError};
pub use rate_limit::{local::LocalRateLimiter, RateLimitConfig, RateLimitResult, RateLimiter, RedisRateLimiter};
pub use scanner::{spawn_scanner, AnomalyScanner, ScanRules};
