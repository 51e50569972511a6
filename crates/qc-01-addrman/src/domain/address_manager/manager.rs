//! Main AddrMan engine.
//!
//! Not thread-safe by itself; `AddressBook` wraps it in a single lock.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tracing::{debug, error};

use super::config::{
    AddrManConfig, BUCKET_SIZE, CONNECTED_UPDATE_INTERVAL_SECS, GETADDR_MAX, GETADDR_MAX_PCT,
    NEW_BUCKETS_PER_ADDRESS, NEW_BUCKET_COUNT, ONLINE_UPDATE_INTERVAL_SECS, ONLINE_WINDOW_SECS,
    SELECT_MAX_PROBES, SELECT_MAX_ROUNDS, STALE_UPDATE_INTERVAL_SECS, TRIED_BUCKET_COUNT,
};
use super::grid::Grid;
use super::security::{bucket_position, new_bucket, tried_bucket, SecretKey, KEY_SIZE};
use super::types::{AddrManStats, AddressRecord, RecordId};
use crate::domain::{canonical_ip, is_routable, InvariantViolation, NetAddress, Timestamp};
use crate::ports::RandomSource;

/// What `good` did with the reported address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GoodOutcome {
    /// No record matches the endpoint (unknown IP or different port).
    Unknown,
    /// Counters were reset; the record was already in Tried (or not
    /// found in any New bucket).
    Refreshed,
    /// The record moved to Tried, possibly pushing `evicted` back to New.
    Promoted { evicted: Option<SocketAddr> },
}

/// Address manager with New/Tried segregation
///
/// # Anti-Eclipse Defense
///
/// 1. Unverified addresses live in the New table, bucketed by the groups of
///    both the address and its informant
/// 2. Only a successful connection moves an address to the Tried table
/// 3. Placement is keyed by a per-instance secret, so flooding a chosen
///    bucket requires knowing the key
pub struct AddrMan {
    pub(super) key: SecretKey,
    pub(super) records: HashMap<RecordId, AddressRecord>,
    pub(super) by_address: HashMap<IpAddr, RecordId>,
    pub(super) random_order: Vec<RecordId>,
    pub(super) next_id: u64,
    pub(super) new_count: usize,
    pub(super) tried_count: usize,
    pub(super) new_grid: Grid,
    pub(super) tried_grid: Grid,
    config: AddrManConfig,
    rng: Arc<dyn RandomSource>,
    corruption: Option<InvariantViolation>,
}

impl AddrMan {
    /// Create an empty cache with a fresh random key.
    pub fn new(config: AddrManConfig, rng: Arc<dyn RandomSource>) -> Self {
        let key = Self::generate_key(rng.as_ref());
        Self::with_key(config, rng, key)
    }

    /// Create an empty cache with a caller-chosen key.
    pub fn with_key(config: AddrManConfig, rng: Arc<dyn RandomSource>, key: SecretKey) -> Self {
        Self {
            key,
            records: HashMap::new(),
            by_address: HashMap::new(),
            random_order: Vec::new(),
            next_id: 0,
            new_count: 0,
            tried_count: 0,
            new_grid: Grid::new(NEW_BUCKET_COUNT, BUCKET_SIZE),
            tried_grid: Grid::new(TRIED_BUCKET_COUNT, BUCKET_SIZE),
            config,
            rng,
            corruption: None,
        }
    }

    fn generate_key(rng: &dyn RandomSource) -> SecretKey {
        let mut bytes = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        SecretKey::new(bytes)
    }

    /// Drop every record and rotate the key.
    pub fn clear(&mut self) {
        self.key = Self::generate_key(self.rng.as_ref());
        self.records.clear();
        self.by_address.clear();
        self.random_order.clear();
        self.next_id = 0;
        self.new_count = 0;
        self.tried_count = 0;
        self.new_grid.clear();
        self.tried_grid.clear();
        self.corruption = None;
    }

    pub fn config(&self) -> &AddrManConfig {
        &self.config
    }

    pub(crate) fn rng(&self) -> Arc<dyn RandomSource> {
        Arc::clone(&self.rng)
    }

    /// Total number of records.
    pub fn size(&self) -> usize {
        self.random_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.random_order.is_empty()
    }

    pub fn new_count(&self) -> usize {
        self.new_count
    }

    pub fn tried_count(&self) -> usize {
        self.tried_count
    }

    pub fn stats(&self) -> AddrManStats {
        AddrManStats {
            new_count: self.new_count,
            tried_count: self.tried_count,
            new_slots_used: self.new_grid.len(),
            tried_slots_used: self.tried_grid.len(),
        }
    }

    /// True if a record matches `addr` exactly (IP and port).
    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.matching_id(addr).is_some()
    }

    /// Copy of the record stored for `addr`, if any.
    pub fn find(&self, addr: &SocketAddr) -> Option<AddressRecord> {
        self.matching_id(addr)
            .and_then(|id| self.records.get(&id))
            .cloned()
    }

    /// Invariant violation recorded by a release-build consistency check.
    pub fn take_corruption(&mut self) -> Option<InvariantViolation> {
        self.corruption.take()
    }

    #[cfg(test)]
    pub(crate) fn inject_corruption(&mut self, violation: InvariantViolation) {
        self.corruption = Some(violation);
    }

    fn matching_id(&self, addr: &SocketAddr) -> Option<RecordId> {
        let addr = SocketAddr::new(canonical_ip(addr.ip()), addr.port());
        let id = *self.by_address.get(&addr.ip())?;
        let record = self.records.get(&id)?;
        (record.address.addr == addr).then_some(id)
    }

    // =========================================================================
    // ADD
    // =========================================================================

    /// Register `address` as reported by `source`.
    ///
    /// The claimed last-seen time is lowered by `time_penalty` seconds.
    /// Returns `true` if a previously unknown address is now stored.
    pub fn add(
        &mut self,
        address: NetAddress,
        source: IpAddr,
        time_penalty: u64,
        now: Timestamp,
    ) -> bool {
        let created = self.add_inner(address, source, time_penalty, now);
        self.verify();
        created
    }

    fn add_inner(
        &mut self,
        address: NetAddress,
        source: IpAddr,
        time_penalty: u64,
        now: Timestamp,
    ) -> bool {
        let address = address.canonical();
        let source = canonical_ip(source);
        let ip = address.ip();

        if !self.config.allow_non_routable && !is_routable(&ip) {
            debug!("[qc-01] Ignoring non-routable address {}", address);
            return false;
        }

        let (id, created) = match self.by_address.get(&ip).copied() {
            Some(id) => {
                if !self.refresh(id, &address, time_penalty, now) {
                    return false;
                }
                (id, false)
            }
            None => (self.create(address, source, time_penalty), true),
        };

        let Some(record) = self.records.get(&id) else {
            return false;
        };
        let addr = record.address.addr;
        let our_refs = record.ref_count;
        let bucket = new_bucket(&self.key, &addr, &source);
        let position = bucket_position(&self.key, true, bucket, &addr);

        match self.new_grid.get(bucket, position) {
            Some(occupant) if occupant == id => return created,
            Some(occupant) => {
                let replace = self.records.get(&occupant).map_or(true, |existing| {
                    existing.is_terrible(now) || (existing.ref_count > 1 && our_refs == 0)
                });
                if !replace {
                    debug!(
                        "[qc-01] New slot ({}, {}) kept for {:?}, dropping reference to {}",
                        bucket, position, occupant, addr
                    );
                    if our_refs == 0 {
                        self.delete(id);
                    }
                    return false;
                }
                self.clear_new(bucket, position);
            }
            None => {}
        }

        self.new_grid.set(bucket, position, id);
        if let Some(record) = self.records.get_mut(&id) {
            record.ref_count += 1;
        }
        created
    }

    /// Merge a re-announcement into an existing record.
    ///
    /// Returns `true` if the caller should try to give the record one more
    /// New-table reference.
    fn refresh(
        &mut self,
        id: RecordId,
        address: &NetAddress,
        time_penalty: u64,
        now: Timestamp,
    ) -> bool {
        let Some(record) = self.records.get_mut(&id) else {
            return false;
        };

        // Coarse last-seen updates so relayed timestamps do not reveal
        // exact session timing.
        let currently_online = now.secs_since(address.time) < ONLINE_WINDOW_SECS;
        let update_interval = if currently_online {
            ONLINE_UPDATE_INTERVAL_SECS
        } else {
            STALE_UPDATE_INTERVAL_SECS
        };
        if !address.time.is_zero()
            && (record.address.time.is_zero()
                || record.address.time
                    < address.time.sub_secs(update_interval.saturating_add(time_penalty)))
        {
            record.address.time = address.time.sub_secs(time_penalty);
        }

        record.address.services |= address.services;
        if address.version != 0 {
            record.address.version = address.version;
        }

        // No new information.
        if address.time.is_zero()
            || (!record.address.time.is_zero() && address.time <= record.address.time)
        {
            return false;
        }

        if record.in_tried || record.ref_count >= NEW_BUCKETS_PER_ADDRESS {
            return false;
        }

        // Each extra reference is half as likely as the previous one.
        let factor = 1u64 << record.ref_count;
        factor == 1 || self.rng.random_range(factor) == 0
    }

    fn create(&mut self, mut address: NetAddress, source: IpAddr, time_penalty: u64) -> RecordId {
        let id = RecordId(self.next_id);
        self.next_id += 1;

        address.time = address.time.sub_secs(time_penalty);
        self.by_address.insert(address.ip(), id);
        self.records
            .insert(id, AddressRecord::new(address, source, self.random_order.len()));
        self.random_order.push(id);
        self.new_count += 1;
        id
    }

    // =========================================================================
    // BOOKKEEPING
    // =========================================================================

    /// Remove an unreferenced New record.
    pub(super) fn delete(&mut self, id: RecordId) {
        let Some(record) = self.records.get(&id) else {
            return;
        };
        debug_assert!(!record.in_tried && record.ref_count == 0);

        let index = record.random_index;
        let ip = record.address.ip();
        let last = self.random_order.len() - 1;
        self.swap_random(index, last);
        self.random_order.pop();

        self.by_address.remove(&ip);
        self.records.remove(&id);
        self.new_count -= 1;
    }

    fn swap_random(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let (id_a, id_b) = (self.random_order[a], self.random_order[b]);
        if let Some(record) = self.records.get_mut(&id_a) {
            record.random_index = b;
        }
        if let Some(record) = self.records.get_mut(&id_b) {
            record.random_index = a;
        }
        self.random_order.swap(a, b);
    }

    /// Empty a New slot, deleting its occupant if that was its last reference.
    fn clear_new(&mut self, bucket: usize, position: usize) {
        let Some(id) = self.new_grid.take(bucket, position) else {
            return;
        };
        let orphaned = match self.records.get_mut(&id) {
            Some(record) => {
                record.ref_count = record.ref_count.saturating_sub(1);
                record.ref_count == 0 && !record.in_tried
            }
            None => false,
        };
        if orphaned {
            self.delete(id);
        }
    }

    // =========================================================================
    // GOOD / ATTEMPT / CONNECTED
    // =========================================================================

    /// Record a successful connection to `addr` and promote it to Tried.
    pub fn good(&mut self, addr: &SocketAddr, now: Timestamp) -> GoodOutcome {
        let outcome = self.good_inner(addr, now);
        self.verify();
        outcome
    }

    fn good_inner(&mut self, addr: &SocketAddr, now: Timestamp) -> GoodOutcome {
        let Some(id) = self.matching_id(addr) else {
            return GoodOutcome::Unknown;
        };
        let Some(record) = self.records.get_mut(&id) else {
            return GoodOutcome::Unknown;
        };

        record.last_success = Some(now);
        record.last_try = Some(now);
        record.attempts = 0;
        // The last-seen time is deliberately left alone here.

        if record.in_tried {
            return GoodOutcome::Refreshed;
        }
        let addr = record.address.addr;

        // Start at a random bucket so the scan order carries no bias.
        let offset = self.rng.random_range(NEW_BUCKET_COUNT as u64) as usize;
        let in_new = (0..NEW_BUCKET_COUNT)
            .map(|n| (n + offset) % NEW_BUCKET_COUNT)
            .any(|bucket| {
                let position = bucket_position(&self.key, true, bucket, &addr);
                self.new_grid.get(bucket, position) == Some(id)
            });
        if !in_new {
            return GoodOutcome::Refreshed;
        }

        let evicted = self.make_tried(id);
        GoodOutcome::Promoted { evicted }
    }

    /// Move a New record into its Tried slot, demoting any occupant.
    fn make_tried(&mut self, id: RecordId) -> Option<SocketAddr> {
        let addr = self.records.get(&id)?.address.addr;

        let mut removed = 0;
        for bucket in 0..NEW_BUCKET_COUNT {
            let position = bucket_position(&self.key, true, bucket, &addr);
            if self.new_grid.get(bucket, position) == Some(id) {
                self.new_grid.take(bucket, position);
                removed += 1;
            }
        }
        self.new_count -= 1;
        if let Some(record) = self.records.get_mut(&id) {
            record.ref_count = record.ref_count.saturating_sub(removed);
            debug_assert_eq!(record.ref_count, 0);
        }

        let bucket = tried_bucket(&self.key, &addr);
        let position = bucket_position(&self.key, false, bucket, &addr);
        let evicted = match self.tried_grid.take(bucket, position) {
            Some(occupant) => {
                self.tried_count -= 1;
                self.demote(occupant)
            }
            None => None,
        };

        self.tried_grid.set(bucket, position, id);
        self.tried_count += 1;
        if let Some(record) = self.records.get_mut(&id) {
            record.in_tried = true;
        }

        debug!("[qc-01] Promoted {} to tried bucket {}", addr, bucket);
        evicted
    }

    /// Put an evicted Tried record back into its primary New slot.
    fn demote(&mut self, id: RecordId) -> Option<SocketAddr> {
        let record = self.records.get_mut(&id)?;
        record.in_tried = false;
        let (addr, source) = (record.address.addr, record.source);

        let bucket = new_bucket(&self.key, &addr, &source);
        let position = bucket_position(&self.key, true, bucket, &addr);
        self.clear_new(bucket, position);
        self.new_grid.set(bucket, position, id);
        if let Some(record) = self.records.get_mut(&id) {
            record.ref_count = 1;
        }
        self.new_count += 1;

        debug!(
            "[qc-01] Evicted {} from tried back to new bucket {}",
            addr, bucket
        );
        Some(addr)
    }

    /// Record a connection attempt to `addr`.
    pub fn attempt(&mut self, addr: &SocketAddr, now: Timestamp) {
        if let Some(id) = self.matching_id(addr) {
            if let Some(record) = self.records.get_mut(&id) {
                record.last_try = Some(now);
                record.attempts = record.attempts.saturating_add(1);
            }
        }
        self.verify();
    }

    /// Note that a connection to `addr` is alive.
    ///
    /// Last-seen moves at most once per 20 minutes.
    pub fn connected(&mut self, addr: &SocketAddr, now: Timestamp) {
        if let Some(id) = self.matching_id(addr) {
            if let Some(record) = self.records.get_mut(&id) {
                if now.secs_since(record.address.time) > CONNECTED_UPDATE_INTERVAL_SECS {
                    record.address.time = now;
                }
            }
        }
        self.verify();
    }

    // =========================================================================
    // SELECT / GET_ADDR
    // =========================================================================

    /// Choose an address to dial.
    ///
    /// Tried and New are picked 50/50 when both are populated. Within the
    /// table, occupants are accepted with probability proportional to their
    /// chance; each rejection raises the acceptance factor by 20%.
    /// Terrible records are never returned.
    pub fn select(&self, now: Timestamp) -> Option<NetAddress> {
        if self.is_empty() {
            return None;
        }

        let use_tried = self.tried_count > 0 && (self.new_count == 0 || self.rng.random_bool());
        let grid = if use_tried {
            &self.tried_grid
        } else {
            &self.new_grid
        };

        let scale = (1u64 << 30) as f64;
        let mut chance_factor = 1.0f64;
        for _ in 0..SELECT_MAX_ROUNDS {
            let id = self.random_occupied(grid)?;
            let record = self.records.get(&id)?;

            if !record.is_terrible(now) {
                let draw = self.rng.random_range(1 << 30) as f64;
                if draw < chance_factor * record.chance(now) * scale {
                    return Some(record.address.clone());
                }
            }
            chance_factor *= 1.2;
        }

        debug!(
            "[qc-01] select gave up after {} rounds (tried table: {})",
            SELECT_MAX_ROUNDS, use_tried
        );
        None
    }

    /// Uniformly random occupied slot.
    ///
    /// Draws `(bucket, position)` pairs until one is occupied. After
    /// `SELECT_MAX_PROBES` misses (a nearly empty table) it picks the n-th
    /// occupied slot directly, which is equally uniform.
    fn random_occupied(&self, grid: &Grid) -> Option<RecordId> {
        for _ in 0..SELECT_MAX_PROBES {
            let bucket = self.rng.random_range(grid.rows() as u64) as usize;
            let position = self.rng.random_range(grid.cols() as u64) as usize;
            if let Some(id) = grid.get(bucket, position) {
                return Some(id);
            }
        }

        let occupied = grid.len();
        if occupied == 0 {
            return None;
        }
        let nth = self.rng.random_range(occupied as u64) as usize;
        grid.occupied().nth(nth).map(|(_, _, id)| id)
    }

    /// Sample addresses for relaying.
    ///
    /// Up to 23% of the pool (max 2500), drawn without replacement by a
    /// partial Fisher-Yates shuffle of the random order; terrible records
    /// are skipped.
    pub fn get_addr(&mut self, now: Timestamp) -> Vec<NetAddress> {
        let total = self.random_order.len();
        let wanted = (GETADDR_MAX_PCT * total / 100).min(GETADDR_MAX);
        let mut sampled = Vec::with_capacity(wanted);

        for n in 0..total {
            if sampled.len() >= wanted {
                break;
            }
            let pick = n + self.rng.random_range((total - n) as u64) as usize;
            self.swap_random(n, pick);

            let id = self.random_order[n];
            if let Some(record) = self.records.get(&id) {
                if !record.is_terrible(now) {
                    sampled.push(record.address.clone());
                }
            }
        }

        self.verify();
        sampled
    }

    // =========================================================================
    // CONSISTENCY
    // =========================================================================

    /// Verify every structural invariant.
    pub fn check(&self) -> Result<(), InvariantViolation> {
        if self.random_order.len() != self.new_count + self.tried_count {
            return Err(InvariantViolation::RandomOrderLength {
                len: self.random_order.len(),
                new: self.new_count,
                tried: self.tried_count,
            });
        }

        let (mut found_new, mut found_tried) = (0, 0);
        for (&id, record) in &self.records {
            if record.in_tried {
                if record.ref_count != 0 {
                    return Err(InvariantViolation::TriedWithReferences(id));
                }
                found_tried += 1;
            } else {
                if record.ref_count == 0 {
                    return Err(InvariantViolation::Orphan(id));
                }
                if record.ref_count > NEW_BUCKETS_PER_ADDRESS {
                    return Err(InvariantViolation::TooManyReferences {
                        id,
                        refs: record.ref_count,
                        max: NEW_BUCKETS_PER_ADDRESS,
                    });
                }
                found_new += 1;
            }
            if self.by_address.get(&record.address.ip()) != Some(&id) {
                return Err(InvariantViolation::AddressIndex(id));
            }
            if self.random_order.get(record.random_index) != Some(&id) {
                return Err(InvariantViolation::RandomIndex(id));
            }
        }

        let counts_mismatch = InvariantViolation::TableCounts {
            new: self.new_count,
            tried: self.tried_count,
            found_new,
            found_tried,
        };
        if found_new != self.new_count
            || found_tried != self.tried_count
            || self.by_address.len() != self.records.len()
        {
            return Err(counts_mismatch);
        }

        let mut tried_slots = 0;
        for (bucket, position, id) in self.tried_grid.occupied() {
            let record = self.records.get(&id).ok_or(InvariantViolation::DanglingSlot {
                id,
                bucket,
                position,
            })?;
            let addr = &record.address.addr;
            if !record.in_tried
                || bucket != tried_bucket(&self.key, addr)
                || position != bucket_position(&self.key, false, bucket, addr)
            {
                return Err(InvariantViolation::Misplaced {
                    id,
                    table: "tried",
                    bucket,
                    position,
                });
            }
            tried_slots += 1;
        }
        if tried_slots != self.tried_count {
            return Err(counts_mismatch);
        }

        let mut references: HashMap<RecordId, u32> = HashMap::new();
        for (bucket, position, id) in self.new_grid.occupied() {
            let record = self.records.get(&id).ok_or(InvariantViolation::DanglingSlot {
                id,
                bucket,
                position,
            })?;
            if record.in_tried
                || position != bucket_position(&self.key, true, bucket, &record.address.addr)
            {
                return Err(InvariantViolation::Misplaced {
                    id,
                    table: "new",
                    bucket,
                    position,
                });
            }
            *references.entry(id).or_default() += 1;
        }
        for (&id, record) in self.records.iter().filter(|(_, r)| !r.in_tried) {
            let found = references.get(&id).copied().unwrap_or(0);
            if found != record.ref_count {
                return Err(InvariantViolation::ReferenceCount {
                    id,
                    expected: record.ref_count,
                    found,
                });
            }
        }

        Ok(())
    }

    /// Post-mutation consistency check (when enabled).
    ///
    /// Debug builds panic; release builds log and flag the structure as
    /// corrupted for the owner to discard.
    pub(super) fn verify(&mut self) {
        if !self.config.consistency_checks {
            return;
        }
        if let Err(violation) = self.check() {
            error!("[qc-01] Address cache invariant violated: {}", violation);
            if cfg!(debug_assertions) {
                panic!("address cache invariant violated: {violation}");
            }
            self.corruption = Some(violation);
        }
    }

    /// Record ids in ascending order.
    pub(super) fn sorted_ids(&self) -> Vec<RecordId> {
        let mut ids: Vec<RecordId> = self.records.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn slot_ip(&self, slot: Option<RecordId>) -> Option<IpAddr> {
        slot.and_then(|id| self.records.get(&id))
            .map(|record| record.address.ip())
    }
}

impl fmt::Debug for AddrMan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddrMan")
            .field("new_count", &self.new_count)
            .field("tried_count", &self.tried_count)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Structural equality: same key, same records (by address) and the same
/// addresses in the same grid slots. Record ids and sampling order are
/// instance-local and ignored.
impl PartialEq for AddrMan {
    fn eq(&self, other: &Self) -> bool {
        if self.key != other.key
            || self.new_count != other.new_count
            || self.tried_count != other.tried_count
            || self.records.len() != other.records.len()
        {
            return false;
        }

        let same_records = self.by_address.iter().all(|(ip, id)| {
            let theirs = other.by_address.get(ip).and_then(|id| other.records.get(id));
            match (self.records.get(id), theirs) {
                (Some(a), Some(b)) => {
                    a.address == b.address
                        && a.source == b.source
                        && a.last_success == b.last_success
                        && a.last_try == b.last_try
                        && a.attempts == b.attempts
                        && a.in_tried == b.in_tried
                        && a.ref_count == b.ref_count
                }
                _ => false,
            }
        });
        if !same_records {
            return false;
        }

        let same_grid = |mine: &Grid, theirs: &Grid| {
            (0..mine.rows()).all(|bucket| {
                (0..mine.cols()).all(|position| {
                    self.slot_ip(mine.get(bucket, position))
                        == other.slot_ip(theirs.get(bucket, position))
                })
            })
        };
        same_grid(&self.new_grid, &other.new_grid) && same_grid(&self.tried_grid, &other.tried_grid)
    }
}
