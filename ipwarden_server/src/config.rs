//! Server configuration loaded from environment variables

use crate::abuse::rate_limit::{limits, RateLimitConfig, RateParseError};
use crate::abuse::ScanRules;
use ipwarden_common::constants;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,

    /// Public port for HTTP traffic
    pub port: u16,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string; geo cache and rate limiter run in-process when unset
    pub redis_url: Option<String>,

    /// Geolocation provider base URL (e.g., "https://ipapi.co")
    pub geo_provider_url: String,

    /// Hard timeout for one geo lookup
    pub geo_timeout: Duration,

    /// TTL for resolved geo entries
    pub geo_cache_ttl: Duration,

    /// TTL for failed lookups (zero disables negative caching)
    pub geo_negative_ttl: Duration,

    /// Rate-checked login endpoint
    pub login_path: String,

    pub login_rate_authenticated: RateLimitConfig,
    pub login_rate_anonymous: RateLimitConfig,

    /// Header carrying the caller identity set by an upstream auth layer.
    ///
    /// Unset disables identity lookup and login attempts are keyed on the
    /// client address. Only enable behind a proxy that strips this header
    /// from client requests.
    pub identity_header: Option<String>,

    /// Scheduler period (zero disables the built-in scheduler)
    pub scan_interval: Duration,

    /// Trailing window covered by each scan
    pub scan_window: Duration,

    pub scan_rules: ScanRules,

    /// Bearer token for the admin API (admin API disabled when unset)
    pub admin_token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ScanRules::default();
        let mut default_exact: Vec<String> = defaults.exact_paths.iter().cloned().collect();
        default_exact.sort();

        let scan_rules = ScanRules::new(
            parse_number(&var, "SCAN_HIGH_VOLUME_THRESHOLD", constants::HIGH_VOLUME_THRESHOLD)?,
            parse_list(&var, "SENSITIVE_PATHS").unwrap_or(default_exact),
            parse_list(&var, "SENSITIVE_PREFIXES").unwrap_or(defaults.prefixes),
            parse_list(&var, "SENSITIVE_KEYWORDS").unwrap_or(defaults.keywords),
        );

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: var("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
            database_url: var("DATABASE_URL").ok_or(ConfigError::MissingEnv("DATABASE_URL"))?,
            redis_url: var("REDIS_URL").filter(|url| !url.trim().is_empty()),
            geo_provider_url: var("GEO_PROVIDER_URL")
                .unwrap_or_else(|| constants::GEO_PROVIDER_URL.to_string()),
            geo_timeout: Duration::from_millis(parse_number(&var, "GEO_TIMEOUT_MS", constants::GEO_TIMEOUT_MS)?),
            geo_cache_ttl: Duration::from_secs(parse_number(
                &var,
                "GEO_CACHE_TTL_SECS",
                constants::GEO_CACHE_TTL_SECONDS,
            )?),
            geo_negative_ttl: Duration::from_secs(parse_number(
                &var,
                "GEO_NEGATIVE_TTL_SECS",
                constants::GEO_NEGATIVE_TTL_SECONDS,
            )?),
            login_path: parse_login_path(var("LOGIN_PATH"))?,
            login_rate_authenticated: parse_rate(&var, "LOGIN_RATE_AUTHENTICATED", limits::login_authenticated())?,
            login_rate_anonymous: parse_rate(&var, "LOGIN_RATE_ANONYMOUS", limits::login_anonymous())?,
            identity_header: var("IDENTITY_HEADER")
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty()),
            scan_interval: Duration::from_secs(parse_number(
                &var,
                "SCAN_INTERVAL_SECS",
                constants::SCAN_INTERVAL_SECONDS,
            )?),
            scan_window: Duration::from_secs(parse_number(
                &var,
                "SCAN_WINDOW_SECS",
                constants::SCAN_WINDOW_SECONDS,
            )?),
            scan_rules,
            admin_token: var("ADMIN_TOKEN").filter(|t| !t.is_empty()),
        })
    }
}

fn parse_number<F>(var: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
        None => Ok(default),
    }
}

fn parse_rate<F>(var: &F, key: &'static str, default: RateLimitConfig) -> Result<RateLimitConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(value) => value
            .parse()
            .map_err(|source| ConfigError::InvalidRate { key, source }),
        None => Ok(default),
    }
}

/// Absolute path outside the reserved `/health` and `/_admin` routes
fn parse_login_path(value: Option<String>) -> Result<String, ConfigError> {
    let Some(path) = value.map(|v| v.trim().to_string()) else {
        return Ok("/login".to_string());
    };

    let reserved = path.trim_end_matches('/') == "/health" || path.starts_with("/_admin");
    if !path.starts_with('/') || reserved {
        return Err(ConfigError::InvalidLoginPath(path));
    }
    Ok(path)
}

/// Comma-separated list; `None` when the variable is unset
fn parse_list<F>(var: &F, key: &str) -> Option<Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    var(key).map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid LOGIN_PATH '{0}': must start with '/' and not use /health or /_admin")]
    InvalidLoginPath(String),

    #[error("Invalid number for {key}: '{value}'")]
    InvalidNumber { key: &'static str, value: String },

    #[error("Invalid rate for {key}: {source}")]
    InvalidRate {
        key: &'static str,
        source: RateParseError,
    },
}
