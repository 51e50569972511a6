use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::adapters::PeersFile;
use crate::domain::{
    AddrMan, AddrManConfig, AddrManError, AddrManStats, AddressRecord, GoodOutcome,
    InvariantViolation, LoadReport, NetAddress, Timestamp,
};
use crate::metrics::Metrics;
use crate::ports::{RandomSource, TimeSource};

/// Thread-safe address cache implementing the driving port.
///
/// Wraps the `AddrMan` engine in a single lock together with a `TimeSource`
/// and metrics. Every operation holds the lock for its whole duration;
/// file I/O in `save_to`/`load_from` happens outside it.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use qc_01_addrman::adapters::{FixedTimeSource, SeededRandomSource};
/// use qc_01_addrman::{AddrManConfig, AddressBook, AddressBookApi, NetAddress, Timestamp};
///
/// let book = AddressBook::new(
///     AddrManConfig::for_testing(),
///     Arc::new(FixedTimeSource::new(1_700_000_000)),
///     Arc::new(SeededRandomSource::new(1)),
/// );
/// let addr = "1.2.3.4:8333".parse().unwrap();
/// assert!(book.add(NetAddress::new(addr, Timestamp::new(1_700_000_000)), "5.6.7.8".parse().unwrap(), 0));
/// book.good(&addr);
/// assert_eq!(book.stats().tried_count, 1);
/// ```
pub struct AddressBook {
    pub(crate) engine: Mutex<AddrMan>,
    pub(crate) time_source: Arc<dyn TimeSource>,
    pub(crate) metrics: Metrics,
}

impl AddressBook {
    /// Create an empty cache with a fresh random key.
    pub fn new(
        config: AddrManConfig,
        time_source: Arc<dyn TimeSource>,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        Self::from_engine(AddrMan::new(config, rng), time_source)
    }

    /// Wrap an existing engine.
    pub fn from_engine(engine: AddrMan, time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            engine: Mutex::new(engine),
            time_source,
            metrics: Metrics::new(),
        }
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.time_source.now()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn config(&self) -> AddrManConfig {
        self.engine.lock().config().clone()
    }

    /// Run `f` under the lock, discarding the cache if it reported corruption.
    fn with_engine<R>(&self, f: impl FnOnce(&mut AddrMan) -> R) -> R {
        let mut engine = self.engine.lock();
        let result = f(&mut *engine);
        if let Some(violation) = engine.take_corruption() {
            error!(
                "[qc-01] Discarding corrupted address cache ({} records): {}",
                engine.size(),
                violation
            );
            engine.clear();
            self.metrics.record_invariant_failure();
        }
        result
    }

    // =========================================================================
    // Time-explicit operations
    // =========================================================================

    pub fn add_at(
        &self,
        address: NetAddress,
        source: IpAddr,
        time_penalty: u64,
        now: Timestamp,
    ) -> bool {
        let created = self.with_engine(|engine| engine.add(address, source, time_penalty, now));
        self.metrics.record_add(created);
        created
    }

    /// Add a batch under one lock acquisition; returns how many were new.
    pub fn add_many<I>(&self, batch: I, time_penalty: u64) -> usize
    where
        I: IntoIterator<Item = (NetAddress, IpAddr)>,
    {
        let now = self.now();
        let outcomes: Vec<bool> = self.with_engine(|engine| {
            batch
                .into_iter()
                .map(|(address, source)| engine.add(address, source, time_penalty, now))
                .collect()
        });
        for created in &outcomes {
            self.metrics.record_add(*created);
        }
        outcomes.into_iter().filter(|created| *created).count()
    }

    pub fn good_at(&self, addr: &SocketAddr, now: Timestamp) -> GoodOutcome {
        let outcome = self.with_engine(|engine| engine.good(addr, now));
        if let GoodOutcome::Promoted { evicted } = &outcome {
            self.metrics.record_promotion(evicted.is_some());
        }
        outcome
    }

    pub fn attempt_at(&self, addr: &SocketAddr, now: Timestamp) {
        self.with_engine(|engine| engine.attempt(addr, now));
    }

    pub fn connected_at(&self, addr: &SocketAddr, now: Timestamp) {
        self.with_engine(|engine| engine.connected(addr, now));
    }

    pub fn select_at(&self, now: Timestamp) -> Option<NetAddress> {
        let picked = self.engine.lock().select(now);
        self.metrics.record_select(picked.is_some());
        picked
    }

    pub fn get_addr_at(&self, now: Timestamp) -> Vec<NetAddress> {
        self.with_engine(|engine| engine.get_addr(now))
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn stats(&self) -> AddrManStats {
        self.engine.lock().stats()
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.engine.lock().contains(addr)
    }

    /// Copy of the record stored for `addr`.
    pub fn find(&self, addr: &SocketAddr) -> Option<AddressRecord> {
        self.engine.lock().find(addr)
    }

    /// Run the full consistency check now.
    pub fn check(&self) -> Result<(), InvariantViolation> {
        self.engine.lock().check()
    }

    /// Drop every record and rotate the key.
    pub fn clear(&self) {
        self.engine.lock().clear();
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    pub(crate) fn load_blob(&self, data: &[u8]) -> Result<LoadReport, AddrManError> {
        let report = self.engine.lock().deserialize(data)?;
        self.metrics.record_load(&report);
        Ok(report)
    }

    /// Serialize under the lock, then write the file without it.
    pub fn save_to(&self, file: &PeersFile) -> Result<(), AddrManError> {
        let blob = self.engine.lock().serialize()?;
        file.write(&blob)
    }

    /// Read the file without the lock, then swap in the decoded cache.
    ///
    /// On any error the cache is left empty.
    pub fn load_from(&self, file: &PeersFile) -> Result<LoadReport, AddrManError> {
        let blob = match file.read() {
            Ok(blob) => blob,
            Err(err) => {
                warn!(
                    "[qc-01] Starting with an empty address cache, {} unreadable: {}",
                    file.path().display(),
                    err
                );
                self.clear();
                return Err(err);
            }
        };
        let report = self.load_blob(&blob)?;
        info!(
            "[qc-01] Loaded {} new and {} tried addresses from {}",
            report.new_count,
            report.tried_count,
            file.path().display()
        );
        Ok(report)
    }
}

impl std::fmt::Debug for AddressBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressBook")
            .field("engine", &*self.engine.lock())
            .finish_non_exhaustive()
    }
}
