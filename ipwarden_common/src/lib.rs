//! ipwarden Common - shared data model for the IP tracking service
//!
//! This crate contains the records, admin API bodies and address helpers
//! used by both the server and CLI.

mod net;

pub use net::{canonical_ip, is_public_ip, AddressError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Country and city resolved for an address.
///
/// Both fields are optional; blank values never survive construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// ISO-2 country code, upper-cased (e.g. "US")
    pub country: Option<String>,

    /// City name
    pub city: Option<String>,
}

impl GeoLocation {
    /// Build a location from raw provider values, dropping blank fields
    pub fn new(country: Option<&str>, city: Option<&str>) -> Self {
        Self {
            country: country.and_then(normalize_country),
            city: city.and_then(normalize_city),
        }
    }

    /// Location with neither field known
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_unknown(&self) -> bool {
        self.country.is_none() && self.city.is_none()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

fn normalize_country(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(trimmed.to_ascii_uppercase())
    } else {
        None
    }
}

fn normalize_city(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(truncate_chars(trimmed, constants::MAX_CITY_LEN))
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// One processed request, as written to the audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Client address, if one could be determined
    pub address: Option<String>,

    /// Request path (without query string)
    pub path: String,

    /// When the request was processed
    pub timestamp: DateTime<Utc>,

    pub country: Option<String>,
    pub city: Option<String>,
}

impl AuditEntry {
    pub fn new(address: Option<String>, path: &str, location: GeoLocation) -> Self {
        Self::at(address, path, location, Utc::now())
    }

    /// Entry with an explicit timestamp
    pub fn at(
        address: Option<String>,
        path: &str,
        location: GeoLocation,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            address: address.map(|a| truncate_chars(&a, constants::MAX_ADDRESS_LEN)),
            path: truncate_chars(path, constants::MAX_PATH_LEN),
            timestamp,
            country: location.country,
            city: location.city,
        }
    }
}

/// An address flagged by the anomaly scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspiciousIp {
    pub address: String,
    pub reason: String,
    pub first_seen: Option<DateTime<Utc>>,
}

/// A blocked address as listed by the admin API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedIp {
    pub address: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Body of `POST /_admin/api/blocked`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockIpRequest {
    pub ip: String,
}

/// Whether a block request inserted a new row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Added,
    AlreadyBlocked,
}

impl BlockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockStatus::Added => "added",
            BlockStatus::AlreadyBlocked => "already_blocked",
        }
    }
}

/// Response to a block request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockIpResponse {
    /// Canonical form of the blocked address
    pub ip: String,
    pub status: BlockStatus,
}

/// Response to an unblock request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnblockIpResponse {
    pub ip: String,
    pub removed: bool,
}

/// Summary of one anomaly scan run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    /// Trailing window covered by the scan, in seconds
    pub window_secs: u64,

    /// Addresses over the high-volume threshold
    pub high_volume: usize,

    /// Distinct (address, path) pairs hitting sensitive paths
    pub sensitive: usize,

    /// Flags inserted by this run
    pub created: usize,

    /// Flags that already existed
    pub existing: usize,
}

/// Error body returned by the HTTP API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl ErrorBody {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Shared constants
pub mod constants {
    /// Cache key prefix for geo entries
    pub const GEO_CACHE_PREFIX: &str = "geo:";

    /// Default TTL for resolved geo entries (24 hours)
    pub const GEO_CACHE_TTL_SECONDS: u64 = 24 * 60 * 60;

    /// Default TTL for failed lookups
    pub const GEO_NEGATIVE_TTL_SECONDS: u64 = 5 * 60;

    /// Default geo provider timeout
    pub const GEO_TIMEOUT_MS: u64 = 2500;

    /// Default geo provider base URL
    pub const GEO_PROVIDER_URL: &str = "https://ipapi.co";

    /// Rate limit group for the login endpoint
    pub const LOGIN_RATE_GROUP: &str = "auth:login";

    /// Header carrying the original client address
    pub const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";

    /// Default scan period and trailing window
    pub const SCAN_INTERVAL_SECONDS: u64 = 60 * 60;
    pub const SCAN_WINDOW_SECONDS: u64 = 60 * 60;

    /// Requests per window above which an address is flagged
    pub const HIGH_VOLUME_THRESHOLD: u64 = 100;

    /// Column bounds for audit entries
    pub const MAX_ADDRESS_LEN: usize = 45;
    pub const MAX_PATH_LEN: usize = 2048;
    pub const MAX_CITY_LEN: usize = 128;
}
