//! # Address Book Service
//!
//! High-level service implementing the `AddressBookApi` port.
//!
//! This service wraps the domain `AddrMan` behind a single lock and provides
//! a clean API for the connection layer, hiding time management, metrics
//! and corruption recovery.

// Semantic submodules
mod api;
mod core;

// Re-export public API
pub use core::AddressBook;
