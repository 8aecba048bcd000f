//! Client identification utilities
//!
//! The origin address recorded at handshake initiation is compared on
//! completion, so both steps must derive it the same way.

use axum::http::{HeaderMap, header};
use std::net::IpAddr;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Resolve the client address of a request received from `peer`
///
/// X-Forwarded-For is only believed when `peer` is one of `trusted_proxies`.
/// The header is then read right to left: trusted hops are skipped and the
/// first untrusted entry is the client. An unparseable entry stops the walk at
/// the nearest trusted hop, so a client-supplied prefix can never win.
pub fn extract_client_ip(headers: &HeaderMap, peer: IpAddr, trusted_proxies: &[IpAddr]) -> IpAddr {
    if !trusted_proxies.contains(&peer) {
        return peer;
    }

    let mut values = Vec::new();
    for value in headers.get_all(X_FORWARDED_FOR) {
        match value.to_str() {
            Ok(v) => values.push(v),
            Err(_) => return peer,
        }
    }

    let mut client = peer;
    for entry in values.iter().flat_map(|v| v.split(',')).rev() {
        match entry.trim().parse::<IpAddr>() {
            Ok(ip) if trusted_proxies.contains(&ip) => client = ip,
            Ok(ip) => return ip,
            Err(_) => return client,
        }
    }
    client
}

/// User-Agent header, if present and valid UTF-8
pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Bearer token from the Authorization header
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn xff(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_untrusted_peer_ignores_xff() {
        let headers = xff("1.2.3.4");
        let peer = ip("6.6.6.6");

        assert_eq!(extract_client_ip(&headers, peer, &[]), peer);
        assert_eq!(extract_client_ip(&headers, peer, &[ip("10.0.0.1")]), peer);
    }

    #[test]
    fn test_trusted_proxy_forwards_client() {
        let proxy = ip("10.0.0.1");

        let ip_seen = extract_client_ip(&xff("1.2.3.4"), proxy, &[proxy]);
        assert_eq!(ip_seen, ip("1.2.3.4"));
    }

    #[test]
    fn test_forged_prefix_does_not_win() {
        // Client sent "9.9.9.9" itself; the proxy appended the real address
        let proxy = ip("10.0.0.1");

        let ip_seen = extract_client_ip(&xff("9.9.9.9, 1.2.3.4"), proxy, &[proxy]);
        assert_eq!(ip_seen, ip("1.2.3.4"));
    }

    #[test]
    fn test_chained_trusted_proxies_are_skipped() {
        let edge = ip("10.0.0.2");
        let inner = ip("10.0.0.1");

        let ip_seen = extract_client_ip(&xff("1.2.3.4, 10.0.0.2"), inner, &[edge, inner]);
        assert_eq!(ip_seen, ip("1.2.3.4"));
    }

    #[test]
    fn test_garbage_xff_stops_at_trusted_hop() {
        let proxy = ip("10.0.0.1");

        assert_eq!(extract_client_ip(&xff("unknown"), proxy, &[proxy]), proxy);
        assert_eq!(extract_client_ip(&HeaderMap::new(), proxy, &[proxy]), proxy);
    }

    #[test]
    fn test_extract_user_agent() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_user_agent(&headers), None);

        headers.insert(header::USER_AGENT, HeaderValue::from_static("loader/2.1"));
        assert_eq!(extract_user_agent(&headers), Some("loader/2.1".to_string()));
    }

    #[test]
    fn test_extract_bearer() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(extract_bearer(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&headers), None);
    }
}
