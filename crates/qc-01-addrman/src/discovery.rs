//! # Bootstrap Discovery
//!
//! Drives the cache during bootstrap: seed it with known endpoints, then
//! dial candidates from `select` with bounded parallelism and feed the
//! outcomes back (`attempt` before dialing, `good` + `connected` on success).
//!
//! Dials run as tokio tasks; a `Semaphore` caps how many are in flight.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::domain::NetAddress;
use crate::ports::{AddressBookApi, ConfigProvider, DialOutcome, PeerDialer};
use crate::service::AddressBook;

/// Worker pool limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Maximum concurrent dials.
    pub max_in_flight: usize,
    /// Maximum dials per round.
    pub max_attempts: usize,
    /// Time penalty applied to seeded endpoints.
    pub seed_time_penalty: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            max_attempts: 64,
            seed_time_penalty: 0,
        }
    }
}

/// Summary of one discovery round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub attempted: usize,
    pub connected: usize,
    pub failed: usize,
    /// `select` came back empty at some point.
    pub exhausted: bool,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("max_in_flight must be at least 1")]
    InvalidConfig,

    #[error("dial task failed: {0}")]
    Task(String),
}

/// Bootstrap workflow over a shared [`AddressBook`].
pub struct PeerDiscovery {
    book: Arc<AddressBook>,
    dialer: Arc<dyn PeerDialer>,
    config: DiscoveryConfig,
}

impl PeerDiscovery {
    pub fn new(
        book: Arc<AddressBook>,
        dialer: Arc<dyn PeerDialer>,
        config: DiscoveryConfig,
    ) -> Result<Self, DiscoveryError> {
        if config.max_in_flight == 0 {
            return Err(DiscoveryError::InvalidConfig);
        }
        Ok(Self {
            book,
            dialer,
            config,
        })
    }

    pub fn book(&self) -> &Arc<AddressBook> {
        &self.book
    }

    /// Feed `(endpoint, source)` pairs into the cache as freshly seen.
    ///
    /// Returns the number of previously unknown endpoints.
    pub fn seed<I>(&self, pairs: I) -> usize
    where
        I: IntoIterator<Item = (SocketAddr, IpAddr)>,
    {
        let now = self.book.now();
        let batch = pairs
            .into_iter()
            .map(|(addr, source)| (NetAddress::new(addr, now), source));
        let created = self.book.add_many(batch, self.config.seed_time_penalty);
        debug!("[qc-01] Seeded {} new bootstrap addresses", created);
        created
    }

    /// Seed from a provider's bootstrap list.
    ///
    /// Without a configured source each seed is credited to itself.
    pub fn seed_from(&self, provider: &dyn ConfigProvider) -> usize {
        let source = provider.bootstrap_source();
        self.seed(
            provider
                .bootstrap_seeds()
                .into_iter()
                .map(|addr| (addr, source.unwrap_or_else(|| addr.ip()))),
        )
    }

    /// Dial candidates until `target` connections succeed, the cache runs
    /// dry, or the attempt budget is spent.
    pub async fn run_round(&self, target: usize) -> Result<DiscoveryReport, DiscoveryError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight));
        let mut tasks: JoinSet<(SocketAddr, DialOutcome)> = JoinSet::new();
        let mut in_flight: HashSet<SocketAddr> = HashSet::new();
        let mut report = DiscoveryReport::default();

        loop {
            while report.connected + tasks.len() < target
                && report.attempted < self.config.max_attempts
            {
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    break;
                };
                let Some(candidate) = self.book.select() else {
                    report.exhausted = true;
                    break;
                };
                // Already being dialed: wait for a completion first.
                if !in_flight.insert(candidate.addr) {
                    break;
                }

                self.book.attempt(&candidate.addr);
                report.attempted += 1;

                let dialer = Arc::clone(&self.dialer);
                let addr = candidate.addr;
                tasks.spawn(async move {
                    let _permit = permit;
                    (addr, dialer.dial(addr).await)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (addr, outcome) = joined.map_err(|e| DiscoveryError::Task(e.to_string()))?;
            in_flight.remove(&addr);

            match outcome {
                DialOutcome::Connected => {
                    self.book.good(&addr);
                    self.book.connected(&addr);
                    report.connected += 1;
                }
                DialOutcome::Failed => report.failed += 1,
            }

            if report.connected >= target {
                break;
            }
        }

        // Target reached with dials still outstanding.
        tasks.shutdown().await;

        info!(
            "[qc-01] Discovery round: {} attempted, {} connected, {} failed",
            report.attempted, report.connected, report.failed
        );
        Ok(report)
    }
}
