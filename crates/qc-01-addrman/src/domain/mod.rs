//! Domain Layer - Pure business logic with no I/O
//!
//! This module contains the address cache logic:
//! - Gossiped endpoints, timestamps and service flags
//! - Routability policy and network grouping
//! - Address Manager (New/Tried bucket system - Bitcoin addrman)
//! - Binary form of the cache

pub mod address_manager;
pub mod entities;
pub mod errors;
pub mod value_objects;

pub use address_manager::*;
pub use entities::*;
pub use errors::*;
pub use value_objects::*;
