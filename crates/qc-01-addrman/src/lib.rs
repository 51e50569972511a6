//! # Peer Address Cache (addrman)
//!
//! **Subsystem ID:** 1
//!
//! This crate keeps the candidate-peer pool for Quantum-Chain peer discovery:
//! every endpoint learned from gossip, bootstrap seeds or live connections,
//! partitioned into a **New** table (heard about) and a **Tried** table
//! (connected to at least once).
//!
//! ## Sybil / Eclipse Resistance
//!
//! - Placement is hashed with a per-instance secret key
//! - New buckets are keyed by the groups of both the address and its informant
//! - Only a successful connection promotes an address to Tried
//! - Selection and relaying favour reliable records and skip terrible ones
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture with:
//! - **Domain Layer:** `AddrMan` engine, bucket hashing, binary codec
//! - **Ports Layer:** `AddressBookApi`, `TimeSource`, `RandomSource`,
//!   `ConfigProvider`, `PeerDialer`
//! - **Service Layer:** `AddressBook`, the engine behind one lock
//! - **Adapters Layer:** clocks, randomness, TOML config, peers file
//! - **Discovery:** bounded-parallelism bootstrap worker pool (`discovery` feature)
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use qc_01_addrman::adapters::{OsRandomSource, SystemTimeSource};
//! use qc_01_addrman::{AddrManConfig, AddressBook, AddressBookApi, NetAddress, TimeSource};
//!
//! let clock = Arc::new(SystemTimeSource::new());
//! let book = AddressBook::new(
//!     AddrManConfig::default(),
//!     clock.clone(),
//!     Arc::new(OsRandomSource::new()),
//! );
//!
//! let peer = "203.0.114.7:8333".parse().unwrap();
//! book.add(NetAddress::new(peer, clock.now()), "198.51.101.3".parse().unwrap(), 0);
//!
//! // After the handshake completes:
//! book.good(&peer);
//! assert_eq!(book.stats().tried_count, 1);
//! ```

// =============================================================================
// CORE MODULES
// =============================================================================

pub mod adapters;
pub mod domain;
pub mod metrics;
pub mod ports;
pub mod service;

/// Bootstrap discovery worker pool.
/// Requires feature: `discovery`
#[cfg(feature = "discovery")]
pub mod discovery;

// =============================================================================
// CORE RE-EXPORTS
// =============================================================================

// Domain entities
pub use domain::{
    is_routable, AddrMan, AddrManConfig, AddrManError, AddrManStats, AddressRecord, GoodOutcome,
    InvariantViolation, LoadReport, NetAddress, NetGroup, NetworkMagic, RecordId, ServiceFlags,
    Timestamp,
};

// Port traits
pub use ports::{AddressBookApi, ConfigProvider, RandomSource, TimeSource};

// Service
pub use metrics::{Metrics, MetricsSnapshot};
pub use service::AddressBook;

// =============================================================================
// DISCOVERY RE-EXPORTS (Requires `discovery` feature)
// =============================================================================

#[cfg(feature = "discovery")]
pub use discovery::{DiscoveryConfig, DiscoveryError, DiscoveryReport, PeerDiscovery};

#[cfg(feature = "discovery")]
pub use ports::{DialOutcome, PeerDialer};
