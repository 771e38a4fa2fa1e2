// crates/uapk-gateway-connectors/src/ssrf.rs
// ============================================================================
// Module: SSRF Validation
// Description: URL, domain-allowlist, and address-range validation.
// Purpose: Keep connector egress away from internal and unlisted targets.
// Dependencies: url, std::net
// ============================================================================

//! ## Overview
//! Validation is fail-closed: no allowlist means no egress, suffix-only
//! domain matches are rejected (`evilexample.com` never matches an
//! `example.com` allowlist entry), and a host is refused when any of its
//! resolved addresses falls into a private, loopback, or link-local range.
//! The resolved address set is recorded so callers can detect DNS drift
//! immediately before issuing the request.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::net::ToSocketAddrs;

use url::Url;

// ============================================================================
// SECTION: Violations
// ============================================================================

/// One SSRF validation failure.
///
/// # Invariants
/// - Variants are stable for programmatic handling; connectors map them onto
///   their stable error codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsrfViolation {
    /// URL could not be parsed.
    InvalidUrl(String),
    /// Scheme is not `http` or `https`.
    SchemeNotAllowed(String),
    /// URL has no host.
    MissingHost,
    /// No domain allowlist is configured; egress is denied by default.
    NoAllowedDomains,
    /// Host is not on the effective allowlist.
    DomainNotAllowed(String),
    /// Host resolution failed.
    ResolutionFailed(String),
    /// A resolved address falls into a blocked range.
    BlockedAddress(IpAddr),
}

impl fmt::Display for SsrfViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl(message) => write!(f, "Invalid URL: {message}"),
            Self::SchemeNotAllowed(scheme) => write!(f, "Invalid URL scheme: {scheme}"),
            Self::MissingHost => write!(f, "Missing hostname in URL"),
            Self::NoAllowedDomains => write!(f, "No allowed domains configured"),
            Self::DomainNotAllowed(host) => write!(f, "Domain '{host}' not in allowlist"),
            Self::ResolutionFailed(host) => write!(f, "Could not resolve hostname: {host}"),
            Self::BlockedAddress(ip) => {
                write!(f, "Access to private/internal IP {ip} blocked (SSRF protection)")
            }
        }
    }
}

// ============================================================================
// SECTION: Validated Target
// ============================================================================

/// A URL that passed the mandatory validation sequence.
///
/// # Invariants
/// - `ips` is the full resolved address set recorded at validation time.
#[derive(Debug, Clone)]
pub struct ValidatedTarget {
    /// Parsed target URL.
    pub url: Url,
    /// Lowercase host used for drift re-resolution.
    pub host: String,
    /// Addresses observed at validation time.
    pub ips: BTreeSet<IpAddr>,
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates a URL against the allowlist and blocked address ranges.
///
/// `allow_private_networks` skips the address-range checks; it exists for
/// development manifests that target local fixtures and must stay off in
/// production.
///
/// # Errors
///
/// Returns the first [`SsrfViolation`] encountered; validation is
/// fail-closed and performs no network access beyond DNS resolution.
pub fn validate_url(
    raw_url: &str,
    allowed_domains: &[String],
    allow_private_networks: bool,
) -> Result<ValidatedTarget, SsrfViolation> {
    if allowed_domains.is_empty() {
        return Err(SsrfViolation::NoAllowedDomains);
    }

    let url = Url::parse(raw_url).map_err(|err| SsrfViolation::InvalidUrl(err.to_string()))?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(SsrfViolation::SchemeNotAllowed(scheme.to_string()));
    }
    let Some(host) = url.host_str() else {
        return Err(SsrfViolation::MissingHost);
    };
    let host = host.to_ascii_lowercase();

    if !domain_allowed(&host, allowed_domains) {
        return Err(SsrfViolation::DomainNotAllowed(host));
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let ips = resolve_host(&host, port)?;
    if !allow_private_networks {
        for ip in &ips {
            if is_blocked_address(*ip) {
                return Err(SsrfViolation::BlockedAddress(*ip));
            }
        }
    }

    Ok(ValidatedTarget {
        url,
        host,
        ips,
    })
}

/// Returns true when the host matches the allowlist.
///
/// A match is the exact domain or a subdomain with an explicit dot boundary;
/// bare suffix matches are rejected so `evilexample.com` never matches an
/// `example.com` entry.
#[must_use]
pub fn domain_allowed(host: &str, allowed_domains: &[String]) -> bool {
    allowed_domains.iter().any(|entry| {
        let entry = entry.to_ascii_lowercase();
        host == entry || host.ends_with(&format!(".{entry}"))
    })
}

/// Re-resolves the host and reports whether the address set changed.
///
/// Resolution failure counts as drift: the request must not proceed on a
/// weaker answer than validation saw.
#[must_use]
pub fn dns_drifted(host: &str, port: u16, expected: &BTreeSet<IpAddr>) -> bool {
    match resolve_host(host, port) {
        Ok(current) => &current != expected,
        Err(_) => true,
    }
}

/// Resolves a host to the set of all returned addresses.
fn resolve_host(host: &str, port: u16) -> Result<BTreeSet<IpAddr>, SsrfViolation> {
    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        return Ok(BTreeSet::from([ip]));
    }
    (host, port)
        .to_socket_addrs()
        .map(|addrs| addrs.map(|addr| addr.ip()).collect::<BTreeSet<IpAddr>>())
        .map_err(|_| SsrfViolation::ResolutionFailed(host.to_string()))
}

// ============================================================================
// SECTION: Blocked Ranges
// ============================================================================

/// Returns true for loopback, private, link-local, and unique-local targets.
///
/// IPv4: `127/8`, `10/8`, `172.16/12`, `192.168/16`, `169.254/16`.
/// IPv6: `::1/128`, `fc00::/7`, `fe80::/10`, plus IPv4-mapped addresses
/// re-checked under the IPv4 rules.
#[must_use]
pub fn is_blocked_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback() || addr.is_private() || addr.is_link_local(),
        IpAddr::V6(addr) => {
            let mapped_blocked = addr.to_ipv4_mapped().is_some_and(|mapped| {
                mapped.is_loopback() || mapped.is_private() || mapped.is_link_local()
            });
            mapped_blocked
                || addr.is_loopback()
                || addr.is_unique_local()
                || addr.is_unicast_link_local()
        }
    }
}
