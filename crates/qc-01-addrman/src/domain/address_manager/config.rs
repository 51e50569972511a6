//! Address Manager configuration.
//!
//! The table geometry constants are part of the persisted format: changing
//! any of them makes previously saved placements unusable (they are then
//! recomputed and pruned on load).

/// Number of buckets in the Tried table.
pub const TRIED_BUCKET_COUNT: usize = 256;
/// Number of buckets in the New table.
pub const NEW_BUCKET_COUNT: usize = 1024;
/// Slots per bucket (both tables).
pub const BUCKET_SIZE: usize = 64;
/// Tried buckets a single address group can spread over.
pub const TRIED_BUCKETS_PER_GROUP: u64 = 8;
/// New buckets a single source group can spread over.
pub const NEW_BUCKETS_PER_SOURCE_GROUP: u64 = 64;
/// Maximum New-table references held by one address.
pub const NEW_BUCKETS_PER_ADDRESS: u32 = 8;

const DAY_SECS: u64 = 24 * 60 * 60;

/// Addresses not seen for this long are terrible.
pub const HORIZON_SECS: u64 = 30 * DAY_SECS;
/// Attempts without any success before an address is terrible.
pub const RETRIES: u32 = 3;
/// Consecutive failures (with no recent success) before an address is terrible.
pub const MAX_FAILURES: u32 = 10;
/// Success window that shields an address from `MAX_FAILURES`.
pub const MIN_FAIL_SECS: u64 = 7 * DAY_SECS;
/// A try this recent protects an address from being judged terrible.
pub const RECENT_TRY_GRACE_SECS: u64 = 60;
/// Claimed last-seen times further in the future than this are terrible.
pub const MAX_FUTURE_DRIFT_SECS: u64 = 10 * 60;

/// Percentage of the pool returned by `get_addr`.
pub const GETADDR_MAX_PCT: usize = 23;
/// Absolute cap on `get_addr` results.
pub const GETADDR_MAX: usize = 2500;

/// Minimum spacing between `connected` last-seen updates.
pub const CONNECTED_UPDATE_INTERVAL_SECS: u64 = 20 * 60;
/// A relayed address seen within this window counts as currently online.
pub const ONLINE_WINDOW_SECS: u64 = DAY_SECS;
/// Last-seen refresh granularity for online addresses.
pub const ONLINE_UPDATE_INTERVAL_SECS: u64 = 60 * 60;
/// Last-seen refresh granularity for stale addresses.
pub const STALE_UPDATE_INTERVAL_SECS: u64 = DAY_SECS;

/// Attempts within this window are heavily deprioritized by `select`.
pub const RECENT_ATTEMPT_SECS: u64 = 10 * 60;

/// Acceptance rounds before `select` gives up.
pub const SELECT_MAX_ROUNDS: usize = 256;
/// Random slot probes per round before `select` falls back to counting
/// occupied slots.
pub const SELECT_MAX_PROBES: usize = 1 << 10;

/// Network-identifying magic prefixed to the persisted peers file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkMagic(pub u32);

impl NetworkMagic {
    pub const MAINNET: NetworkMagic = NetworkMagic(0xd9b4_bef9);
    pub const TESTNET: NetworkMagic = NetworkMagic(0x0709_110b);
    pub const REGTEST: NetworkMagic = NetworkMagic(0xdab5_bffa);

    /// Resolve a network name (`mainnet`, `testnet`, `regtest`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Some(Self::MAINNET),
            "testnet" | "test" => Some(Self::TESTNET),
            "regtest" => Some(Self::REGTEST),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl Default for NetworkMagic {
    fn default() -> Self {
        Self::MAINNET
    }
}

/// Runtime policy for the address manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrManConfig {
    /// Accept loopback/private/link-local addresses (local test networks).
    pub allow_non_routable: bool,
    /// Run the full consistency check after every mutating operation.
    pub consistency_checks: bool,
    /// Magic written to and expected in the peers file.
    pub network_magic: NetworkMagic,
}

impl Default for AddrManConfig {
    fn default() -> Self {
        Self {
            allow_non_routable: false,
            consistency_checks: cfg!(debug_assertions),
            network_magic: NetworkMagic::MAINNET,
        }
    }
}

impl AddrManConfig {
    /// Testing config: private ranges allowed, every mutation checked.
    pub fn for_testing() -> Self {
        Self {
            allow_non_routable: true,
            consistency_checks: true,
            network_magic: NetworkMagic::REGTEST,
        }
    }
}
