//! Geolocation: public-address filtering, provider lookups and caching
//!
//! Lookups never fail the caller. Provider errors and timeouts degrade to
//! `Resolution::Unavailable`; non-public or malformed addresses are
//! `Resolution::Skipped` without any network call.

pub mod ipapi;

use crate::cache::GeoCache;
use async_trait::async_trait;
use ipwarden_common::{canonical_ip, is_public_ip, GeoLocation};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use ipapi::IpApiProvider;

/// Error from a geolocation provider
#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for GeoError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GeoError::Timeout
        } else {
            GeoError::Http(e)
        }
    }
}

/// External geolocation lookup
#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, GeoError>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Outcome of resolving one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Provider answered; fields may still be empty
    Found(GeoLocation),
    /// Empty, malformed or non-public address; no lookup attempted
    Skipped,
    /// Provider failed or timed out
    Unavailable,
}

impl Resolution {
    pub fn location(&self) -> Option<&GeoLocation> {
        match self {
            Resolution::Found(loc) => Some(loc),
            _ => None,
        }
    }
}

/// Validates addresses and calls the provider under a hard timeout
#[derive(Clone)]
pub struct GeoResolver {
    provider: Arc<dyn GeoProvider>,
    timeout: Duration,
}

impl GeoResolver {
    pub fn new(provider: Arc<dyn GeoProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Parse the address and keep it only if it is globally routable
    pub fn public_ip(address: &str) -> Option<IpAddr> {
        canonical_ip(address).ok().filter(is_public_ip)
    }

    pub async fn resolve(&self, address: &str) -> Resolution {
        let Some(ip) = Self::public_ip(address) else {
            return Resolution::Skipped;
        };

        match tokio::time::timeout(self.timeout, self.provider.lookup(ip)).await {
            Ok(Ok(location)) => Resolution::Found(location),
            Ok(Err(e)) => {
                warn!(ip = %ip, provider = self.provider.name(), error = %e, "Geo lookup failed");
                Resolution::Unavailable
            }
            Err(_) => {
                warn!(ip = %ip, provider = self.provider.name(), "Geo lookup timed out");
                Resolution::Unavailable
            }
        }
    }
}

/// Where a request's location came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoSource {
    Cache,
    Provider,
    /// No address, or the address is not public
    Skipped,
    /// Provider failed; location left empty
    Unavailable,
}

/// Location plus its source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub location: GeoLocation,
    pub source: GeoSource,
}

impl Located {
    fn new(location: GeoLocation, source: GeoSource) -> Self {
        Self { location, source }
    }
}

/// Cache-first geolocation.
///
/// Cache errors count as misses and failed writes are ignored. Concurrent
/// misses for the same cold key may each reach the provider; the last write
/// wins with an equivalent value.
#[derive(Clone)]
pub struct GeoLocator {
    resolver: GeoResolver,
    cache: Arc<dyn GeoCache>,
    ttl: Duration,
    negative_ttl: Duration,
}

impl GeoLocator {
    /// `negative_ttl` of zero disables caching of failed lookups
    pub fn new(resolver: GeoResolver, cache: Arc<dyn GeoCache>, ttl: Duration, negative_ttl: Duration) -> Self {
        Self {
            resolver,
            cache,
            ttl,
            negative_ttl,
        }
    }

    pub async fn locate(&self, address: Option<&str>) -> Located {
        let Some(address) = address.filter(|a| GeoResolver::public_ip(a).is_some()) else {
            return Located::new(GeoLocation::unknown(), GeoSource::Skipped);
        };

        match self.cache.get(address).await {
            Ok(Some(location)) => {
                debug!(ip = %address, "Geo cache hit");
                return Located::new(location, GeoSource::Cache);
            }
            Ok(None) => {}
            Err(e) => warn!(ip = %address, error = %e, "Geo cache read failed, treating as miss"),
        }

        let (location, source, ttl) = match self.resolver.resolve(address).await {
            Resolution::Found(location) => (location, GeoSource::Provider, self.ttl),
            Resolution::Unavailable => (GeoLocation::unknown(), GeoSource::Unavailable, self.negative_ttl),
            Resolution::Skipped => return Located::new(GeoLocation::unknown(), GeoSource::Skipped),
        };

        if !ttl.is_zero() {
            if let Err(e) = self.cache.set(address, &location, ttl).await {
                warn!(ip = %address, error = %e, "Geo cache write failed");
            }
        }

        Located::new(location, source)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider returning a fixed answer and counting calls
    pub struct FakeProvider {
        answer: Option<GeoLocation>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        pub fn answering(country: &str, city: &str) -> Self {
            Self {
                answer: Some(GeoLocation::new(Some(country), Some(city))),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing() -> Self {
            Self {
                answer: None,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GeoProvider for FakeProvider {
        async fn lookup(&self, _ip: IpAddr) -> Result<GeoLocation, GeoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.answer
                .clone()
                .ok_or_else(|| GeoError::InvalidResponse("fake failure".to_string()))
        }

        fn name(&self) -> &str {
            "fake"
        }
    }
}
