//! Address parsing and routability helpers

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

/// Address validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,

    #[error("'{0}' is not a valid IP address")]
    Invalid(String),
}

/// Parse an IPv4 or IPv6 address, ignoring surrounding whitespace.
///
/// The returned `IpAddr` renders in canonical form via `to_string()`
/// (e.g. `2001:DB8:0:0::1` becomes `2001:db8::1`).
pub fn canonical_ip(raw: &str) -> Result<IpAddr, AddressError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AddressError::Empty);
    }

    trimmed
        .parse::<IpAddr>()
        .map_err(|_| AddressError::Invalid(trimmed.to_string()))
}

/// Whether the address is globally routable.
///
/// Private, loopback, link-local, shared, documentation, benchmarking,
/// multicast and reserved ranges are all treated as non-public.
pub fn is_public_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => is_public_v6(v6),
    }
}

fn is_public_v4(ip: &Ipv4Addr) -> bool {
    let o = ip.octets();

    if o[0] == 0
        || ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
    {
        return false;
    }

    // 100.64.0.0/10 carrier-grade NAT
    if o[0] == 100 && (o[1] & 0xc0) == 64 {
        return false;
    }

    // 192.0.0.0/24 protocol assignments
    if o[0] == 192 && o[1] == 0 && o[2] == 0 {
        return false;
    }

    // 198.18.0.0/15 benchmarking
    if o[0] == 198 && (o[1] & 0xfe) == 18 {
        return false;
    }

    // 240.0.0.0/4 reserved
    o[0] < 240
}

fn is_public_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_public_v4(&v4);
    }

    if ip.is_unspecified() || ip.is_loopback() || ip.is_multicast() {
        return false;
    }

    let s = ip.segments();

    // fc00::/7 unique local
    if (s[0] & 0xfe00) == 0xfc00 {
        return false;
    }

    // fe80::/10 link-local
    if (s[0] & 0xffc0) == 0xfe80 {
        return false;
    }

    // 2001:db8::/32 documentation
    if s[0] == 0x2001 && s[1] == 0x0db8 {
        return false;
    }

    // 100::/64 discard-only
    !(s[0] == 0x0100 && s[1] == 0 && s[2] == 0 && s[3] == 0)
}
