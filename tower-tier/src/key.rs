use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;

use http::HeaderMap;
use http::Request;
use tier_limit::Key;
use tier_limit::ipv4_to_uint;

/// Derives the rate limit key for a request.
///
/// Any `Fn(&Req) -> Option<K>` closure is an extractor. Returning `None`
/// rejects the request with [`TierError::MissingKey`](crate::TierError::MissingKey).
pub trait KeyExtractor<Req> {
    type Key;

    fn extract(&self, req: &Req) -> Option<Self::Key>;
}

impl<Req, K, F> KeyExtractor<Req> for F
where
    F: Fn(&Req) -> Option<K>,
{
    type Key = K;

    fn extract(&self, req: &Req) -> Option<K> {
        self(req)
    }
}

/// Keys `http` requests by client IPv4 address.
///
/// The address is taken from the first `X-Forwarded-For` entry, then
/// `X-Real-IP`, then the peer address stored in the request extensions
/// (a bare `SocketAddr`, or axum's `ConnectInfo` with the `axum` feature).
/// IPv4-mapped IPv6 peers are keyed by their IPv4 address. Requests whose
/// address is missing, malformed or IPv6 all share the `0.0.0.0` key.
///
/// The forwarding headers are trusted as sent. Only use this extractor
/// behind a proxy that overwrites them; otherwise a client can pick a fresh
/// key per request. [`PeerIp`] ignores the headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientIp;

impl ClientIp {
    /// The client address as the request presents it, if any.
    pub fn client_ip<B>(req: &Request<B>) -> Option<String> {
        forwarded_for(req.headers())
            .or_else(|| header_str(req.headers(), "x-real-ip"))
            .or_else(|| peer_ip(req))
    }
}

impl<B> KeyExtractor<Request<B>> for ClientIp {
    type Key = Key;

    fn extract(&self, req: &Request<B>) -> Option<Key> {
        Some(ip_key(Self::client_ip(req)))
    }
}

/// Keys `http` requests by the IPv4 address of the connected peer only.
///
/// For servers that accept clients directly. Forwarding headers are ignored,
/// otherwise keys are formed as with [`ClientIp`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerIp;

impl<B> KeyExtractor<Request<B>> for PeerIp {
    type Key = Key;

    fn extract(&self, req: &Request<B>) -> Option<Key> {
        Some(ip_key(peer_ip(req)))
    }
}

fn ip_key(ip: Option<String>) -> Key {
    let ip = ip.unwrap_or_default();
    Key::Ip(Ipv4Addr::from(ipv4_to_uint(&ip)))
}

fn peer_ip<B>(req: &Request<B>) -> Option<String> {
    peer_addr(req).map(|addr| addr.ip().to_canonical().to_string())
}

/// Keys requests the inner extractor cannot key on a fixed fallback key.
///
/// Built by [`RuleLayer::with_fallback_key`](crate::RuleLayer::with_fallback_key).
#[derive(Debug, Clone)]
pub struct Fallback<E, K> {
    extractor: E,
    key: K,
}

impl<E, K> Fallback<E, K> {
    pub fn new(extractor: E, key: K) -> Self {
        Self { extractor, key }
    }
}

impl<Req, E, K> KeyExtractor<Req> for Fallback<E, K>
where
    E: KeyExtractor<Req, Key = K>,
    K: Clone,
{
    type Key = K;

    fn extract(&self, req: &Req) -> Option<K> {
        self.extractor
            .extract(req)
            .or_else(|| Some(self.key.clone()))
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "x-forwarded-for").and_then(|value| {
        value
            .split(',')
            .next()
            .map(str::trim)
            .filter(|first| !first.is_empty())
            .map(str::to_string)
    })
}

fn peer_addr<B>(req: &Request<B>) -> Option<SocketAddr> {
    connect_info(req)
        .or_else(|| req.extensions().get::<SocketAddr>().copied())
        .or_else(|| {
            req.extensions()
                .get::<IpAddr>()
                .map(|ip| SocketAddr::new(*ip, 0))
        })
}

#[cfg(feature = "axum")]
fn connect_info<B>(req: &Request<B>) -> Option<SocketAddr> {
    req.extensions()
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
        .map(|info| info.0)
}

#[cfg(not(feature = "axum"))]
fn connect_info<B>(_req: &Request<B>) -> Option<SocketAddr> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> http::request::Builder {
        Request::builder().uri("/")
    }

    fn key_of(req: &Request<()>) -> Key {
        ClientIp.extract(req).unwrap()
    }

    #[test]
    fn it_prefers_forwarded_for() {
        let req = request()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("x-real-ip", "198.51.100.1")
            .body(())
            .unwrap();
        assert_eq!(key_of(&req), Key::Ip(Ipv4Addr::new(203, 0, 113, 7)));
    }

    #[test]
    fn it_falls_back_to_real_ip_then_peer() {
        let req = request()
            .header("x-real-ip", "198.51.100.1")
            .body(())
            .unwrap();
        assert_eq!(key_of(&req), Key::Ip(Ipv4Addr::new(198, 51, 100, 1)));

        let mut req = request().body(()).unwrap();
        req.extensions_mut()
            .insert(SocketAddr::from(([127, 0, 0, 1], 4000)));
        assert_eq!(key_of(&req), Key::Ip(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_mapped_peers_keep_their_ipv4_address() {
        let peer = |addr: &str| {
            let mut req = request().body(()).unwrap();
            req.extensions_mut()
                .insert(addr.parse::<SocketAddr>().unwrap());
            req
        };
        let a = peer("[::ffff:203.0.113.7]:4000");
        let b = peer("[::ffff:198.51.100.1]:4000");

        assert_eq!(key_of(&a), Key::Ip(Ipv4Addr::new(203, 0, 113, 7)));
        assert_eq!(key_of(&b), Key::Ip(Ipv4Addr::new(198, 51, 100, 1)));
        assert_eq!(
            PeerIp.extract(&a),
            Some(Key::Ip(Ipv4Addr::new(203, 0, 113, 7)))
        );

        // Genuine IPv6 peers still fold together
        let v6 = peer("[2001:db8::1]:4000");
        assert_eq!(key_of(&v6), Key::Ip(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn test_peer_ip_ignores_forwarding_headers() {
        let mut req = request()
            .header("x-forwarded-for", "203.0.113.7")
            .header("x-real-ip", "198.51.100.1")
            .body(())
            .unwrap();
        assert_eq!(PeerIp.extract(&req), Some(Key::Ip(Ipv4Addr::UNSPECIFIED)));

        req.extensions_mut()
            .insert(SocketAddr::from(([192, 0, 2, 10], 5000)));
        assert_eq!(PeerIp.extract(&req), Some(Key::Ip(Ipv4Addr::new(192, 0, 2, 10))));
    }

    #[test]
    fn test_unusable_addresses_share_zero() {
        let missing = request().body(()).unwrap();
        let garbage = request()
            .header("x-forwarded-for", "not-an-ip")
            .body(())
            .unwrap();
        let v6 = request()
            .header("x-forwarded-for", "2001:db8::1")
            .body(())
            .unwrap();

        for req in [&missing, &garbage, &v6] {
            assert_eq!(key_of(req), Key::Ip(Ipv4Addr::UNSPECIFIED));
        }
    }

    #[test]
    fn test_closures_are_extractors() {
        let by_header = |req: &Request<()>| header_str(req.headers(), "x-api-key");
        let req = request().header("x-api-key", "abc").body(()).unwrap();
        assert_eq!(by_header.extract(&req), Some("abc".to_string()));
        assert_eq!(by_header.extract(&request().body(()).unwrap()), None);
    }

    #[test]
    fn test_fallback_keys_unkeyed_requests() {
        let by_header = |req: &Request<()>| header_str(req.headers(), "x-api-key");
        let extractor = Fallback::new(by_header, "anonymous".to_string());

        let keyed = request().header("x-api-key", "abc").body(()).unwrap();
        assert_eq!(extractor.extract(&keyed), Some("abc".to_string()));
        assert_eq!(
            extractor.extract(&request().body(()).unwrap()),
            Some("anonymous".to_string())
        );
    }
}
