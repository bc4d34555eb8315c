//! Client identity resolution.
//!
//! Forwarded-client headers are client-controlled, so they are only believed
//! when the request arrives from a configured proxy. Everyone else is
//! identified by the address of the TCP peer.

use std::net::IpAddr;

use axum::http::HeaderMap;
use tracing::debug;

use crate::ratelimit::UNKNOWN_CLIENT;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Where a resolved identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// Set by an upstream layer, e.g. the authenticated user id
    Supplied,
    /// The TCP peer address
    Peer,
    /// A forwarded header set by a trusted proxy
    Forwarded,
    /// Nothing usable; the shared unknown bucket
    Fallback,
}

/// The identity a request is rate limited under.
///
/// An upstream layer that has already authenticated the caller can insert a
/// [`ClientIdentity::supplied`] value into the request extensions; the rate
/// limit middleware then uses it instead of resolving the peer address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Identity string passed to the limiter
    pub value: String,
    /// How the identity was obtained
    pub source: IdentitySource,
}

impl ClientIdentity {
    /// An identity vouched for by the integrator.
    pub fn supplied(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            source: IdentitySource::Supplied,
        }
    }

    fn from_ip(ip: IpAddr, source: IdentitySource) -> Self {
        Self {
            value: ip.to_string(),
            source,
        }
    }

    fn fallback() -> Self {
        Self {
            value: UNKNOWN_CLIENT.to_string(),
            source: IdentitySource::Fallback,
        }
    }
}

/// Maps request metadata to a [`ClientIdentity`].
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    trusted_proxies: Vec<IpAddr>,
}

impl IdentityResolver {
    /// Resolver that trusts forwarded headers from the given proxies only.
    pub fn new(trusted_proxies: Vec<IpAddr>) -> Self {
        Self { trusted_proxies }
    }

    /// Resolver that always uses the peer address.
    pub fn direct() -> Self {
        Self::default()
    }

    /// Whether `ip` is a trusted proxy.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.trusted_proxies.contains(ip)
    }

    /// Resolve the identity for a request from `peer` carrying `headers`.
    pub fn resolve(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> ClientIdentity {
        match peer {
            Some(ip) if self.is_trusted(&ip) => forwarded_client(headers)
                .map(|client| ClientIdentity::from_ip(client, IdentitySource::Forwarded))
                .unwrap_or_else(|| ClientIdentity::from_ip(ip, IdentitySource::Peer)),
            Some(ip) => ClientIdentity::from_ip(ip, IdentitySource::Peer),
            None => {
                debug!("No peer address available, using shared unknown bucket");
                ClientIdentity::fallback()
            }
        }
    }
}

/// Client address announced by a proxy: the first `X-Forwarded-For` entry,
/// then `X-Real-IP`. Entries that are not IP addresses are ignored.
fn forwarded_client(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded_for = headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok());

    forwarded_for.or_else(|| {
        headers
            .get(X_REAL_IP)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for &(name, value) in pairs {
            map.insert(name, HeaderValue::from_static(value));
        }
        map
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_peer_address_used_by_default() {
        let resolver = IdentityResolver::direct();
        let identity = resolver.resolve(&HeaderMap::new(), Some(ip("192.168.1.7")));

        assert_eq!(identity.value, "192.168.1.7");
        assert_eq!(identity.source, IdentitySource::Peer);
    }

    #[test]
    fn test_untrusted_peer_headers_ignored() {
        let resolver = IdentityResolver::new(vec![ip("10.0.0.1")]);
        let spoofed = headers(&[("x-forwarded-for", "1.1.1.1"), ("x-real-ip", "2.2.2.2")]);

        let identity = resolver.resolve(&spoofed, Some(ip("203.0.113.9")));
        assert_eq!(identity.value, "203.0.113.9");
        assert_eq!(identity.source, IdentitySource::Peer);
    }

    #[test]
    fn test_trusted_proxy_forwarded_for() {
        let resolver = IdentityResolver::new(vec![ip("10.0.0.1")]);
        let forwarded = headers(&[("x-forwarded-for", " 198.51.100.4 , 10.0.0.1")]);

        let identity = resolver.resolve(&forwarded, Some(ip("10.0.0.1")));
        assert_eq!(identity.value, "198.51.100.4");
        assert_eq!(identity.source, IdentitySource::Forwarded);
    }

    #[test]
    fn test_trusted_proxy_real_ip() {
        let resolver = IdentityResolver::new(vec![ip("10.0.0.1")]);
        let forwarded = headers(&[("x-forwarded-for", "not-an-ip"), ("x-real-ip", "2001:db8::1")]);

        let identity = resolver.resolve(&forwarded, Some(ip("10.0.0.1")));
        assert_eq!(identity.value, "2001:db8::1");
        assert_eq!(identity.source, IdentitySource::Forwarded);
    }

    #[test]
    fn test_trusted_proxy_without_headers_uses_peer() {
        let resolver = IdentityResolver::new(vec![ip("10.0.0.1")]);

        let identity = resolver.resolve(&HeaderMap::new(), Some(ip("10.0.0.1")));
        assert_eq!(identity.value, "10.0.0.1");
        assert_eq!(identity.source, IdentitySource::Peer);
    }

    #[test]
    fn test_no_peer_falls_back() {
        let resolver = IdentityResolver::new(vec![ip("10.0.0.1")]);
        let forwarded = headers(&[("x-forwarded-for", "1.1.1.1")]);

        let identity = resolver.resolve(&forwarded, None);
        assert_eq!(identity.value, UNKNOWN_CLIENT);
        assert_eq!(identity.source, IdentitySource::Fallback);
    }
}
