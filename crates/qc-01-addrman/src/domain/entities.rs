//! Core Domain Entities for the Address Manager
//!
//! Endpoints are plain `std::net` addresses; this module adds the gossip
//! metadata carried alongside them.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::ops::{BitOr, BitOrAssign};

use super::value_objects::canonical_ip;

/// Unix timestamp in seconds
///
/// # Security (Timestamp Bounds)
///
/// Timestamps are clamped to a reasonable maximum to prevent overflow
/// attacks in comparison and age arithmetic. `Timestamp::ZERO` means
/// "unknown" / "never".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Maximum reasonable timestamp (year 9999).
    ///
    /// Prevents peers from using u64::MAX to corrupt age calculations.
    pub const MAX_REASONABLE: u64 = 253_402_300_799;

    /// The "unknown" timestamp.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Create a new timestamp, clamping to MAX_REASONABLE.
    pub fn new(secs: u64) -> Self {
        Self(secs.min(Self::MAX_REASONABLE))
    }

    /// Get the underlying seconds value.
    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// True for the "unknown" timestamp.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Add seconds to timestamp (saturating at MAX_REASONABLE).
    pub fn add_secs(&self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs).min(Self::MAX_REASONABLE))
    }

    /// Subtract seconds from timestamp (saturating at 0).
    pub fn sub_secs(&self, secs: u64) -> Self {
        Self(self.0.saturating_sub(secs))
    }

    /// Seconds elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn secs_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Advertised service bits of a peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ServiceFlags(pub u64);

impl ServiceFlags {
    /// No services advertised.
    pub const NONE: ServiceFlags = ServiceFlags(0);
    /// Full node serving the complete chain.
    pub const NETWORK: ServiceFlags = ServiceFlags(1 << 0);
    /// Serves compact block filters.
    pub const COMPACT_FILTERS: ServiceFlags = ServiceFlags(1 << 6);

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn contains(&self, other: ServiceFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ServiceFlags {
    type Output = ServiceFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        ServiceFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ServiceFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A gossiped peer endpoint.
///
/// `time` is the last-seen time claimed by whoever relayed the address
/// (or observed by us when we talked to the peer directly).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetAddress {
    /// Dialable endpoint.
    pub addr: SocketAddr,
    /// Advertised services.
    pub services: ServiceFlags,
    /// Last-seen time (`Timestamp::ZERO` when unknown).
    pub time: Timestamp,
    /// Protocol version tag advertised by the peer.
    pub version: u32,
}

impl NetAddress {
    /// Create an address with no services and protocol version 0.
    pub fn new(addr: SocketAddr, time: Timestamp) -> Self {
        Self {
            addr,
            services: ServiceFlags::NONE,
            time,
            version: 0,
        }
    }

    /// Builder-style setter for services.
    #[must_use]
    pub fn with_services(mut self, services: ServiceFlags) -> Self {
        self.services = services;
        self
    }

    /// Builder-style setter for the protocol version tag.
    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// IP of the endpoint.
    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    /// Same address with IPv4-mapped IPv6 endpoints rewritten as IPv4.
    pub fn canonical(mut self) -> Self {
        self.addr = SocketAddr::new(canonical_ip(self.addr.ip()), self.addr.port());
        self
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}
