//! # Ports Layer - Hexagonal Architecture Boundaries
//!
//! - **Driving Ports (Inbound):** APIs this subsystem exposes to consumers
//! - **Driven Ports (Outbound):** SPIs this subsystem requires from adapters

pub mod inbound;
pub mod outbound;

pub use inbound::AddressBookApi;
pub use outbound::{ConfigProvider, RandomSource, TimeSource};

#[cfg(feature = "discovery")]
pub use outbound::{DialOutcome, PeerDialer};
