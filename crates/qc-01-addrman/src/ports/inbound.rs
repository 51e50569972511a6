//! # Driving Ports (Inbound API)
//!
//! The surface the connection-management layer uses.

use std::net::{IpAddr, SocketAddr};

use crate::domain::{AddrManError, LoadReport, NetAddress};

/// Primary API of the address cache.
///
/// Every method runs under the cache's single lock; none performs network
/// I/O and none blocks on disk.
pub trait AddressBookApi: Send + Sync {
    /// Register a candidate learned from `source`, trusting its claimed
    /// last-seen time `time_penalty` seconds less.
    ///
    /// Returns `true` if a previously unknown address was stored.
    fn add(&self, address: NetAddress, source: IpAddr, time_penalty: u64) -> bool;

    /// Report a successful connection (promotes to the Tried table).
    fn good(&self, addr: &SocketAddr);

    /// Report a connection attempt.
    fn attempt(&self, addr: &SocketAddr);

    /// Report that an established connection is still alive.
    fn connected(&self, addr: &SocketAddr);

    /// Pick a candidate to dial.
    fn select(&self) -> Option<NetAddress>;

    /// Sample addresses to relay to a peer.
    fn get_addr(&self) -> Vec<NetAddress>;

    /// Number of known addresses.
    fn size(&self) -> usize;

    /// Encode the whole cache.
    fn serialize(&self) -> Result<Vec<u8>, AddrManError>;

    /// Replace the cache with a decoded one.
    ///
    /// On failure the cache is left empty, never partially loaded.
    fn deserialize(&self, data: &[u8]) -> Result<LoadReport, AddrManError>;
}
