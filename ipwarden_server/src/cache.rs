//! TTL-bounded geo cache
//!
//! Redis backs the cache in a multi-node deployment (`crate::redis`); the
//! in-process `LocalGeoCache` is used when no Redis URL is configured.
//! Stale entries are ignored at lookup time; `LocalGeoCache::purge_expired`
//! sweeps the rest and runs from the server's periodic cleanup task.

use crate::store::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use ipwarden_common::{constants, GeoLocation};
use std::time::{Duration, Instant};

/// Cache key for an address (e.g. "geo:8.8.8.8")
pub fn cache_key(address: &str) -> String {
    format!("{}{}", constants::GEO_CACHE_PREFIX, address)
}

/// Address -> location cache with per-entry TTL
#[async_trait]
pub trait GeoCache: Send + Sync {
    async fn get(&self, address: &str) -> Result<Option<GeoLocation>, StoreError>;

    async fn set(&self, address: &str, location: &GeoLocation, ttl: Duration) -> Result<(), StoreError>;

    /// Connectivity check for health reporting
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CachedGeo {
    location: GeoLocation,
    expires_at: Instant,
}

/// In-process geo cache
#[derive(Default)]
pub struct LocalGeoCache {
    entries: DashMap<String, CachedGeo>,
}

impl LocalGeoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including ones that have expired but not been replaced
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.entries.contains_key(&cache_key(address))
    }

    /// Drop every expired entry; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries.retain(|_, v| v.expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl GeoCache for LocalGeoCache {
    async fn get(&self, address: &str) -> Result<Option<GeoLocation>, StoreError> {
        let key = cache_key(address);
        let Some(entry) = self.entries.get(&key) else {
            return Ok(None);
        };

        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.entries.remove_if(&key, |_, v| v.expires_at <= Instant::now());
            return Ok(None);
        }

        Ok(Some(entry.location.clone()))
    }

    async fn set(&self, address: &str, location: &GeoLocation, ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(
            cache_key(address),
            CachedGeo {
                location: location.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}
