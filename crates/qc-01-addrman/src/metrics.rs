//! Metrics hooks for address cache operations
//!
//! ## Usage
//!
//! ```ignore
//! let book = AddressBook::new(config, time, rng);
//! book.add(address, source, 0);
//! let snapshot = book.metrics().snapshot();
//! assert_eq!(snapshot.adds_accepted, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::LoadReport;

/// Metrics collector for the address cache
///
/// Thread-safe counters; updated after the cache lock is released where
/// possible.
#[derive(Debug, Default)]
pub struct Metrics {
    /// `add` calls that stored a previously unknown address
    pub adds_accepted: AtomicU64,
    /// `add` calls that created nothing
    pub adds_rejected: AtomicU64,
    /// Records moved from New to Tried
    pub promotions: AtomicU64,
    /// Tried occupants pushed back to New by a promotion
    pub evictions: AtomicU64,
    /// `select` calls that returned an address
    pub selections_hit: AtomicU64,
    /// `select` calls that returned nothing
    pub selections_miss: AtomicU64,
    /// Successful loads
    pub loads: AtomicU64,
    /// New records dropped while loading
    pub load_pruned_new: AtomicU64,
    /// Tried records dropped while loading
    pub load_pruned_tried: AtomicU64,
    /// Consistency-check failures that forced a fresh cache
    pub invariant_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_add(&self, created: bool) {
        let counter = if created {
            &self.adds_accepted
        } else {
            &self.adds_rejected
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self, evicted: bool) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
        if evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_select(&self, hit: bool) {
        let counter = if hit {
            &self.selections_hit
        } else {
            &self.selections_miss
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self, report: &LoadReport) {
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.load_pruned_new
            .fetch_add(report.lost_new as u64, Ordering::Relaxed);
        self.load_pruned_tried
            .fetch_add(report.lost_tried as u64, Ordering::Relaxed);
    }

    pub fn record_invariant_failure(&self) {
        self.invariant_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            adds_accepted: self.adds_accepted.load(Ordering::Relaxed),
            adds_rejected: self.adds_rejected.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            selections_hit: self.selections_hit.load(Ordering::Relaxed),
            selections_miss: self.selections_miss.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_pruned_new: self.load_pruned_new.load(Ordering::Relaxed),
            load_pruned_tried: self.load_pruned_tried.load(Ordering::Relaxed),
            invariant_failures: self.invariant_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub adds_accepted: u64,
    pub adds_rejected: u64,
    pub promotions: u64,
    pub evictions: u64,
    pub selections_hit: u64,
    pub selections_miss: u64,
    pub loads: u64,
    pub load_pruned_new: u64,
    pub load_pruned_tried: u64,
    pub invariant_failures: u64,
}
