//! # Driven Ports (Outbound SPI)
//!
//! These are the interfaces this subsystem **requires** the host application to implement.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::domain::{AddrManConfig, Timestamp};

/// Wall clock used for last-seen, last-try and terrible-address decisions.
///
/// `adapters::SystemTimeSource` reads the system clock; tests drive
/// `ManualTimeSource` or `FixedTimeSource` instead.
pub trait TimeSource: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now(&self) -> Timestamp;
}

/// Abstract interface for randomness.
///
/// Every random decision the cache makes (key generation, reference
/// damping, selection, sampling, scan offsets) goes through this port so
/// tests can substitute a reproducible sequence.
///
/// # Thread Safety
///
/// Methods take `&self`; implementations synchronize internally.
pub trait RandomSource: Send + Sync {
    /// Uniform 64-bit value.
    fn next_u64(&self) -> u64;

    /// Uniform value in `[0, max)`; returns 0 when `max == 0`.
    fn random_range(&self, max: u64) -> u64;

    /// Fill `dest` with random bytes.
    fn fill_bytes(&self, dest: &mut [u8]);

    /// Fair coin flip.
    fn random_bool(&self) -> bool {
        self.next_u64() & 1 == 1
    }
}

/// Abstract interface for configuration loading.
pub trait ConfigProvider: Send + Sync {
    /// Address manager policy.
    fn addrman_config(&self) -> AddrManConfig;

    /// Hard-coded bootstrap endpoints.
    fn bootstrap_seeds(&self) -> Vec<SocketAddr>;

    /// Source IP credited for bootstrap endpoints.
    fn bootstrap_source(&self) -> Option<IpAddr>;

    /// Location of the persisted peers file, if persistence is enabled.
    fn peers_file(&self) -> Option<PathBuf>;
}

/// Result of dialing a candidate peer.
#[cfg(feature = "discovery")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialOutcome {
    /// Handshake completed; the peer is live.
    Connected,
    /// Connection refused, timed out or handshake rejected.
    Failed,
}

/// Connection-layer collaborator used by the discovery workflow.
///
/// Implementations own sockets and handshakes; the cache only learns the
/// outcome.
#[cfg(feature = "discovery")]
#[async_trait::async_trait]
pub trait PeerDialer: Send + Sync {
    /// Dial `addr` and report whether a session was established.
    async fn dial(&self, addr: SocketAddr) -> DialOutcome;
}
