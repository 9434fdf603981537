//! Client IP derivation from proxy-forwarded headers.
//!
//! Forwarded-for lists are attacker-controlled on the left and appended to by
//! each proxy on the right. Walking right to left and stopping at the first
//! public address yields the client as seen by the outermost trusted proxy.

use http::HeaderMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Default headers consulted, in priority order.
pub const DEFAULT_FORWARDED_HEADERS: [&str; 2] = ["X-Forwarded-For", "X-Real-IP"];

/// Derives the client IP from forwarded headers.
#[derive(Debug, Clone)]
pub struct ClientIpResolver {
    headers: Vec<String>,
}

impl Default for ClientIpResolver {
    fn default() -> Self {
        Self::new(DEFAULT_FORWARDED_HEADERS)
    }
}

impl ClientIpResolver {
    /// Creates a resolver consulting `headers` in the given order.
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the first public address found in the forwarded headers,
    /// falling back to the peer address.
    ///
    /// Repeated lines of one header form a single list in arrival order, so
    /// the scan starts from the last line.
    pub fn resolve(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
        self.headers
            .iter()
            .find_map(|name| {
                headers
                    .get_all(name.as_str())
                    .iter()
                    .rev()
                    .filter_map(|value| value.to_str().ok())
                    .find_map(rightmost_public)
            })
            .or_else(|| peer.map(|addr| addr.ip()))
    }
}

/// Scans a comma-separated address list right to left and returns the first
/// public unicast address.
pub fn rightmost_public(list: &str) -> Option<IpAddr> {
    list.rsplit(',')
        .filter_map(|candidate| candidate.trim().parse::<IpAddr>().ok())
        .find(is_public_unicast)
}

/// Returns `true` for globally routable unicast addresses.
///
/// Rejects unspecified, loopback, link-local, multicast, broadcast and
/// private-use ranges. IPv4-mapped IPv6 addresses are judged as IPv4.
pub fn is_public_unicast(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public_v4(&v4),
            None => is_public_v6(v6),
        },
    }
}

fn is_public_v4(ip: &Ipv4Addr) -> bool {
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.octets()[0] == 0)
}

fn is_public_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;
    !(ip.is_unspecified() || ip.is_loopback() || ip.is_multicast() || unique_local || link_local)
}
