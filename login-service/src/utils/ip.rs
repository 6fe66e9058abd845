use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

/// First `X-Forwarded-For` hop if present and parseable, else the peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
        .or_else(|| peer.map(|addr| addr.ip()))
}

/// Two-letter country code from a CDN header such as `CF-IPCountry`.
/// Anything else (including Cloudflare's `XX`/`T1` markers) is dropped.
pub fn country_from_header(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    let valid = value.len() == 2 && value.chars().all(|c| c.is_ascii_alphabetic());
    let code = value.to_ascii_uppercase();
    (valid && code != "XX").then_some(code)
}

/// Drop the host part of an address: IPv4 to /24, IPv6 to /48.
pub fn mask_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            format!("{}.{}.{}.x", a, b, c)
        }
        IpAddr::V6(v6) => {
            let s = v6.segments();
            format!("{:x}:{:x}:{:x}:x:x:x:x:x", s[0], s[1], s[2])
        }
    }
}

/// Address as it may be stored, honoring the full-IP setting.
pub fn display_ip(ip: Option<IpAddr>, full: bool) -> String {
    match ip {
        Some(ip) if full => ip.to_string(),
        Some(ip) => mask_ip(ip),
        None => String::new(),
    }
}
