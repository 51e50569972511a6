//! Address manager type definitions.

use std::fmt;
use std::net::IpAddr;

use super::config::{
    HORIZON_SECS, MAX_FAILURES, MAX_FUTURE_DRIFT_SECS, MIN_FAIL_SECS, RECENT_ATTEMPT_SECS,
    RECENT_TRY_GRACE_SECS, RETRIES,
};
use crate::domain::{NetAddress, Timestamp};

/// Identifier of a record inside one cache instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One candidate peer and its reliability bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRecord {
    /// The gossiped endpoint and its metadata
    pub address: NetAddress,
    /// IP of the peer that told us about this address
    pub source: IpAddr,
    /// When we last successfully connected
    pub last_success: Option<Timestamp>,
    /// When we last attempted a connection
    pub last_try: Option<Timestamp>,
    /// Connection attempts since the last success
    pub attempts: u32,
    /// Whether the record occupies a Tried slot
    pub in_tried: bool,
    /// Number of New-table slots referencing the record
    pub ref_count: u32,
    /// Position in the random-sampling order
    pub random_index: usize,
}

impl AddressRecord {
    /// Create an unplaced record.
    pub fn new(address: NetAddress, source: IpAddr, random_index: usize) -> Self {
        Self {
            address,
            source,
            last_success: None,
            last_try: None,
            attempts: 0,
            in_tried: false,
            ref_count: 0,
            random_index,
        }
    }

    /// Whether the record is unreliable enough to stop advertising it.
    pub fn is_terrible(&self, now: Timestamp) -> bool {
        // Never prune something we are in the middle of trying.
        if let Some(last_try) = self.last_try {
            if last_try >= now.sub_secs(RECENT_TRY_GRACE_SECS) {
                return false;
            }
        }

        let seen = self.address.time;
        if seen > now.add_secs(MAX_FUTURE_DRIFT_SECS) {
            return true;
        }

        if seen.is_zero() || now.secs_since(seen) > HORIZON_SECS {
            return true;
        }

        if self.last_success.is_none() && self.attempts >= RETRIES {
            return true;
        }

        let since_success = now.secs_since(self.last_success.unwrap_or(Timestamp::ZERO));
        since_success > MIN_FAIL_SECS && self.attempts >= MAX_FAILURES
    }

    /// Relative likelihood of `select` accepting this record.
    ///
    /// Decays by 0.66 per failed attempt (at most eight) and drops to 1% for
    /// a record tried in the last ten minutes.
    pub fn chance(&self, now: Timestamp) -> f64 {
        let mut chance = 1.0;

        if let Some(last_try) = self.last_try {
            if now.secs_since(last_try) < RECENT_ATTEMPT_SECS {
                chance *= 0.01;
            }
        }

        chance * 0.66f64.powi(self.attempts.min(8) as i32)
    }
}

/// Statistics about the address manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddrManStats {
    /// Number of records in the New table.
    pub new_count: usize,
    /// Number of records in the Tried table.
    pub tried_count: usize,
    /// Occupied New-table slots (sum of reference counts).
    pub new_slots_used: usize,
    /// Occupied Tried-table slots.
    pub tried_slots_used: usize,
}

/// Outcome of loading a serialized cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// New records loaded.
    pub new_count: usize,
    /// Tried records loaded.
    pub tried_count: usize,
    /// New records pruned because no placement survived.
    pub lost_new: usize,
    /// Tried records dropped because of slot collisions.
    pub lost_tried: usize,
}
