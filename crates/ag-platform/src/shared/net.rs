//! Client address resolution and subnet binding
//!
//! Sessions are bound to the /24-equivalent subnet of the login IP.
//! Resolution precedence: first `X-Forwarded-For` entry, then the
//! transport peer address. Loopback and IPv4-mapped IPv6 forms are
//! normalized before comparison; anything that is not four dotted
//! decimal octets never matches (fails closed).

use std::net::SocketAddr;

use axum::http::HeaderMap;

/// Resolve the caller's IP from headers and the transport peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let raw = forwarded
        .map(str::to_string)
        .or_else(|| peer.map(|p| p.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string());

    normalize_ip(&raw)
}

/// Normalize loopback and IPv4-mapped IPv6 literals to plain IPv4.
pub fn normalize_ip(ip: &str) -> String {
    if ip == "::1" {
        return "127.0.0.1".to_string();
    }
    if let Some(mapped) = ip.strip_prefix("::ffff:") {
        return mapped.to_string();
    }
    ip.to_string()
}

/// True when both addresses are dotted-decimal IPv4 and share their
/// first three octets.
pub fn same_subnet(ip1: &str, ip2: &str) -> bool {
    let a: Vec<&str> = ip1.split('.').collect();
    let b: Vec<&str> = ip2.split('.').collect();

    if a.len() != 4 || b.len() != 4 {
        return false;
    }
    a[0] == b[0] && a[1] == b[1] && a[2] == b[2]
}
