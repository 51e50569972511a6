//! # Address Manager - New/Tried Bucket System
//!
//! Implements Bitcoin's `addrman` pattern for Eclipse Attack resistance.
//!
//! ## Design (Bitcoin-Inspired)
//!
//! - **New Table** (1024 × 64): addresses heard about but never connected to
//! - **Tried Table** (256 × 64): addresses we've successfully connected to
//!
//! ## Anti-Eclipse Properties
//!
//! 1. Keyed, group-based bucketing caps the slots one network can claim
//! 2. Segregation prevents poisoning Tried with unverified addresses
//! 3. Source-based bucketing caps the New buckets one informant can reach
//!
//! Reference: Bitcoin Core's `addrman.h`

// Semantic submodules
mod codec;
mod config;
mod grid;
mod manager;
mod security;
mod types;

// Re-export public API
pub use codec::FORMAT_VERSION;
pub use config::*;
pub use grid::Grid;
pub use manager::{AddrMan, GoodOutcome};
pub use security::{bucket_position, double_sha256, new_bucket, tried_bucket, SecretKey, KEY_SIZE};
pub use types::{AddrManStats, AddressRecord, LoadReport, RecordId};

#[cfg(test)]
mod tests;
