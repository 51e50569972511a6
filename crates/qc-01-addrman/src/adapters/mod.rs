//! # Adapters Layer
//!
//! Concrete providers for the outbound ports:
//! - Clocks (system, fixed, manual)
//! - Randomness (OS-seeded, deterministic)
//! - Configuration (static builder, TOML file)
//! - Peers file persistence (magic + checksum envelope)

pub mod config;
pub mod random;
pub mod storage;
pub mod time;

pub use config::{ConfigError, StaticConfigProvider, TomlConfigProvider};
pub use random::{OsRandomSource, SeededRandomSource};
pub use storage::{decode_envelope, encode_envelope, PeersFile};
pub use time::{FixedTimeSource, ManualTimeSource, SystemTimeSource};
