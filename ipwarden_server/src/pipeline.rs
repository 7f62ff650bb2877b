//! Per-request ingress pipeline
//!
//! Order of evaluation for every request:
//! 1. client address (first `X-Forwarded-For` entry, else the peer address)
//! 2. block list: blocked requests stop here, with nothing else recorded
//! 3. rate limit, for requests matching a configured rate rule
//! 4. geolocation, cache first
//! 5. one audit entry
//!
//! Storage and provider failures never abort a request: the block check
//! fails open, geo degrades to an unknown location, the rate check fails open
//! and a failed audit write is dropped.

use crate::abuse::blocklist::{check_address, BlockCheck};
use crate::abuse::rate_limit::{rate_key, RateLimitConfig, RateLimitResult, RateLimiter};
use crate::geo::{GeoLocator, Located};
use crate::store::{AuditLog, BlockList};
use http::Method;
use ipwarden_common::{canonical_ip, constants, AuditEntry};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Transport-independent view of an incoming request
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// Raw `X-Forwarded-For` header value
    pub forwarded_for: Option<String>,
    /// Transport-level peer address
    pub peer: Option<IpAddr>,
    pub method: Method,
    pub path: String,
    /// Authenticated caller identity, if an upstream layer set one
    pub identity: Option<String>,
}

impl RequestInfo {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            forwarded_for: None,
            peer: None,
            method,
            path: path.to_string(),
            identity: None,
        }
    }

    pub fn with_peer(mut self, peer: IpAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_forwarded_for(mut self, value: &str) -> Self {
        self.forwarded_for = Some(value.to_string());
        self
    }

    pub fn with_identity(mut self, identity: &str) -> Self {
        self.identity = Some(identity.to_string());
        self
    }
}

/// Client address for a request.
///
/// The first comma-separated `X-Forwarded-For` entry wins when it parses as
/// an IP address; an absent header or an unparseable first entry falls back
/// to the peer address. Addresses are returned in canonical form.
pub fn client_address(forwarded_for: Option<&str>, peer: Option<IpAddr>) -> Option<String> {
    forwarded_for
        .and_then(|value| value.split(',').next())
        .and_then(|first| canonical_ip(first).ok())
        .or(peer)
        .map(|ip| ip.to_string())
}

/// Rate limit applied to one endpoint
#[derive(Debug, Clone)]
pub struct RateRule {
    pub path: String,
    pub methods: Vec<Method>,
    /// Key prefix shared by all callers of this endpoint
    pub group: String,
    pub authenticated: RateLimitConfig,
    pub anonymous: RateLimitConfig,
}

impl RateRule {
    /// POST-only login rule
    pub fn login(path: &str, authenticated: RateLimitConfig, anonymous: RateLimitConfig) -> Self {
        Self {
            path: path.to_string(),
            methods: vec![Method::POST],
            group: constants::LOGIN_RATE_GROUP.to_string(),
            authenticated,
            anonymous,
        }
    }

    /// Matches the path exactly, ignoring one trailing slash
    pub fn applies(&self, method: &Method, path: &str) -> bool {
        if !self.methods.contains(method) {
            return false;
        }
        let want = self.path.strip_suffix('/').unwrap_or(&self.path);
        path == self.path || (!want.is_empty() && path.strip_suffix('/').unwrap_or(path) == want)
    }

    fn config_for(&self, authenticated: bool) -> &RateLimitConfig {
        if authenticated {
            &self.authenticated
        } else {
            &self.anonymous
        }
    }
}

/// Rate limit step outcome
#[derive(Debug, Clone)]
pub enum RateCheck {
    /// No rate rule matched the request
    NotApplicable,
    /// Rule matched but there was no identity or address to key on
    Skipped,
    Allowed(RateLimitResult),
    Limited(RateLimitResult),
    /// Limiter store failed; request allowed (fail-open)
    Degraded,
}

/// Audit step outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Recorded,
    /// The write failed and was swallowed
    Dropped,
}

/// Everything the pipeline learned about an admitted request
#[derive(Debug, Clone)]
pub struct Admission {
    pub address: Option<String>,
    pub block: BlockCheck,
    pub rate: RateCheck,
    pub geo: Located,
    pub audit: AuditStatus,
}

/// Terminal outcome for one request
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Address is on the block list
    Forbidden { address: String },
    /// Rate limit exceeded on a rate-checked endpoint
    TooManyRequests {
        address: Option<String>,
        result: RateLimitResult,
    },
    /// Request may proceed
    Admitted(Admission),
}

/// Orchestrates block list, rate limiter, geolocation and audit logging
pub struct IngressPipeline {
    blocklist: Arc<dyn BlockList>,
    limiter: Arc<dyn RateLimiter>,
    locator: GeoLocator,
    audit: Arc<dyn AuditLog>,
    rate_rules: Vec<RateRule>,
}

impl IngressPipeline {
    pub fn new(
        blocklist: Arc<dyn BlockList>,
        limiter: Arc<dyn RateLimiter>,
        locator: GeoLocator,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            blocklist,
            limiter,
            locator,
            audit,
            rate_rules: Vec::new(),
        }
    }

    pub fn with_rate_rule(mut self, rule: RateRule) -> Self {
        self.rate_rules.push(rule);
        self
    }

    pub async fn evaluate(&self, request: &RequestInfo) -> Verdict {
        let address = client_address(request.forwarded_for.as_deref(), request.peer);

        let block = check_address(self.blocklist.as_ref(), address.as_deref()).await;
        if let (BlockCheck::Blocked, Some(ip)) = (block, address.as_ref()) {
            info!(ip = %ip, path = %request.path, "Blocked request");
            return Verdict::Forbidden { address: ip.clone() };
        }

        let rate = self.check_rate(request, address.as_deref()).await;
        if let RateCheck::Limited(result) = rate {
            info!(ip = ?address, path = %request.path, current = result.current, "Rate limit exceeded");
            return Verdict::TooManyRequests { address, result };
        }

        let geo = self.locator.locate(address.as_deref()).await;

        let entry = AuditEntry::new(address.clone(), &request.path, geo.location.clone());
        let audit = match self.audit.append(&entry).await {
            Ok(()) => AuditStatus::Recorded,
            Err(e) => {
                warn!(ip = ?address, path = %request.path, error = %e, "Failed to write audit entry");
                AuditStatus::Dropped
            }
        };

        Verdict::Admitted(Admission {
            address,
            block,
            rate,
            geo,
            audit,
        })
    }

    async fn check_rate(&self, request: &RequestInfo, address: Option<&str>) -> RateCheck {
        let Some(rule) = self
            .rate_rules
            .iter()
            .find(|rule| rule.applies(&request.method, &request.path))
        else {
            return RateCheck::NotApplicable;
        };

        let identity = request.identity.as_deref().filter(|i| !i.is_empty());
        let Some(key) = rate_key(identity, address) else {
            debug!(path = %request.path, "No rate limit key for request");
            return RateCheck::Skipped;
        };

        let config = rule.config_for(identity.is_some());
        match self.limiter.check(&rule.group, &key, config).await {
            Ok(result) if result.allowed => RateCheck::Allowed(result),
            Ok(result) => RateCheck::Limited(result),
            Err(e) => {
                warn!(key = %key, error = %e, "Rate limiter unavailable, allowing request");
                RateCheck::Degraded
            }
        }
    }
}
