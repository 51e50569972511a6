//! Value Objects for the Address Manager
//!
//! Network-topology classification of IP addresses: routability policy and
//! the coarse grouping used to cap how many cache slots one network can
//! claim.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Rewrite IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) as IPv4.
///
/// All lookups and bucket placement use the canonical form so the same host
/// cannot occupy two records by switching notation.
pub fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// 16-byte wire form of an IP (IPv4 is stored IPv4-mapped).
pub fn ip_to_bytes(ip: &IpAddr) -> [u8; 16] {
    match canonical_ip(*ip) {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

/// Inverse of [`ip_to_bytes`].
pub fn ip_from_bytes(bytes: [u8; 16]) -> IpAddr {
    canonical_ip(IpAddr::V6(Ipv6Addr::from(bytes)))
}

/// True if the address is reachable on the public internet.
///
/// Rejects unspecified, loopback, RFC1918 private, RFC2544 benchmarking,
/// RFC3927/RFC4862 link-local, RFC4193 unique-local, RFC4843 ORCHID,
/// documentation ranges, broadcast and multicast.
pub fn is_routable(ip: &IpAddr) -> bool {
    match canonical_ip(*ip) {
        IpAddr::V4(v4) => is_routable_v4(&v4),
        IpAddr::V6(v6) => is_routable_v6(&v6),
    }
}

fn is_routable_v4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    let benchmarking = octets[0] == 198 && (octets[1] & 0xfe) == 18;
    let this_network = octets[0] == 0;

    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || benchmarking
        || this_network)
}

fn is_routable_v6(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();
    let unique_local = (segments[0] & 0xfe00) == 0xfc00;
    let link_local = (segments[0] & 0xffc0) == 0xfe80;
    let documentation = segments[0] == 0x2001 && segments[1] == 0x0db8;
    let orchid = segments[0] == 0x2001 && (segments[1] & 0xfff0) == 0x0010;

    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        || unique_local
        || link_local
        || documentation
        || orchid)
}

/// Network class tag prefixed to every group key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NetClass {
    Unroutable = 0,
    Ipv4 = 1,
    Ipv6 = 2,
    Local = 255,
}

/// Anti-Sybil grouping key of an IP.
///
/// # Security (Anti-Eclipse)
///
/// IPv4 collapses to its /16 (roughly one ISP allocation), IPv6 to its /32.
/// Every loopback address shares one group and every other non-routable
/// address shares another, so private ranges admitted by policy cannot fan
/// out across buckets.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetGroup {
    bytes: [u8; 5],
    len: u8,
}

impl NetGroup {
    /// Compute the group of an IP.
    pub fn from_ip(ip: &IpAddr) -> Self {
        let ip = canonical_ip(*ip);
        if ip.is_loopback() {
            return Self::tag_only(NetClass::Local);
        }
        if !is_routable(&ip) {
            return Self::tag_only(NetClass::Unroutable);
        }
        match ip {
            IpAddr::V4(v4) => {
                let o = v4.octets();
                Self {
                    bytes: [NetClass::Ipv4 as u8, o[0], o[1], 0, 0],
                    len: 3,
                }
            }
            IpAddr::V6(v6) => {
                let o = v6.octets();
                Self {
                    bytes: [NetClass::Ipv6 as u8, o[0], o[1], o[2], o[3]],
                    len: 5,
                }
            }
        }
    }

    fn tag_only(class: NetClass) -> Self {
        Self {
            bytes: [class as u8, 0, 0, 0, 0],
            len: 1,
        }
    }

    /// Key bytes fed to the bucket placement hash.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl fmt::Debug for NetGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetGroup({:02x?})", self.as_bytes())
    }
}
