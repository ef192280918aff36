//! Relay URL normalization and filtering.
//!
//! The canonical URL is the identity of a relay, so every URL entering the
//! system (seed file, relay-list tags) goes through [`normalize_relay_url`].
//!
//! # Normalization Rules
//!
//! - Missing scheme defaults to `wss://`
//! - Scheme and host are lowercased, default ports dropped
//! - Trailing slashes removed, paths otherwise preserved
//! - Only `ws://` and `wss://` are accepted
//!
//! # Filtering Rules
//!
//! Normalized URLs are reported as [`NormalizeResult::Blocked`] when the host is:
//! - loopback, unspecified, private, CGNAT, link-local or broadcast IPv4
//! - IPv6 loopback, unspecified, link-local, unique-local or IPv4-mapped
//! - `localhost`, `*.local`, `*.localhost`, `*.internal`, `*.lan`
//! - `*.onion`, unless [`NormalizeOptions::allow_onion`] is set

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use nostr::RelayUrl;

/// Options for URL normalization.
#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions {
    /// Allow .onion (Tor hidden service) addresses.
    pub allow_onion: bool,
}

/// Result of URL normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeResult {
    /// URL is valid and normalized.
    Ok(String),
    /// URL is syntactically invalid.
    Invalid(String),
    /// URL is well-formed but points somewhere we never connect to.
    Blocked(String),
}

impl NormalizeResult {
    /// Returns the normalized URL if valid.
    pub fn ok(self) -> Option<String> {
        match self {
            Self::Ok(url) => Some(url),
            _ => None,
        }
    }

    /// Returns true if the URL is valid.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// Normalize a relay URL with default options.
///
/// ```ignore
/// use relaywatch_core::normalize_relay_url;
///
/// assert_eq!(
///     normalize_relay_url("Relay.Example.COM/").ok(),
///     Some("wss://relay.example.com".to_string())
/// );
/// ```
pub fn normalize_relay_url(url: &str) -> NormalizeResult {
    normalize_relay_url_with_opts(url, &NormalizeOptions::default())
}

/// Normalize a relay URL with custom options.
pub fn normalize_relay_url_with_opts(url: &str, opts: &NormalizeOptions) -> NormalizeResult {
    let url = url.trim();
    if url.is_empty() {
        return NormalizeResult::Invalid("empty URL".to_string());
    }

    let candidate = match url.split_once("://") {
        Some((scheme, rest)) => {
            let scheme = scheme.to_ascii_lowercase();
            if scheme != "wss" && scheme != "ws" {
                return NormalizeResult::Invalid(format!("unsupported scheme '{}'", scheme));
            }
            format!("{}://{}", scheme, rest)
        }
        None => format!("wss://{}", url),
    };

    let parsed = match RelayUrl::parse(&candidate) {
        Ok(u) => u,
        Err(e) => return NormalizeResult::Invalid(format!("invalid relay URL: {}", e)),
    };

    let mut normalized = parsed.to_string();
    while normalized.ends_with('/') {
        normalized.pop();
    }

    let host = relay_host(&normalized);
    if host.is_empty() {
        return NormalizeResult::Invalid("empty host".to_string());
    }
    if let Some(reason) = blocked_host(host, opts) {
        return NormalizeResult::Blocked(reason);
    }

    NormalizeResult::Ok(normalized)
}

/// Host portion of a normalized URL, without port or IPv6 brackets.
pub fn relay_host(url: &str) -> &str {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);

    if let Some(rest) = authority.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    authority.split(':').next().unwrap_or(authority)
}

fn blocked_host(host: &str, opts: &NormalizeOptions) -> Option<String> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_non_public_ip(&ip).then(|| format!("non-public address {} not allowed", ip));
    }

    if host == "localhost" {
        return Some("localhost not allowed".to_string());
    }
    for suffix in [".localhost", ".local", ".internal", ".lan"] {
        if host.ends_with(suffix) {
            return Some(format!("{} addresses not allowed", suffix));
        }
    }
    if host.ends_with(".onion") && !opts.allow_onion {
        return Some(".onion addresses not allowed".to_string());
    }
    if !host.contains('.') {
        return Some("single-label host not allowed".to_string());
    }

    None
}

/// Whether an address is unsuitable as a public relay endpoint.
pub fn is_non_public_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_non_public_v4(v4),
        IpAddr::V6(v6) => {
            // IPv4-mapped addresses are never legitimate relay endpoints
            v6.to_ipv4_mapped().is_some() || is_non_public_v6(v6)
        }
    }
}

fn is_non_public_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_multicast()
        || (a == 100 && (64..=127).contains(&b)) // CGNAT 100.64.0.0/10
        || a >= 240
}

fn is_non_public_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || (first & 0xffc0) == 0xfe80 // link-local
        || (first & 0xfe00) == 0xfc00 // unique local
}
