//! Binary form of the address cache.
//!
//! Layout (bincode, fixed-width little-endian integers):
//!
//! ```text
//! u8        format version
//! u8        key size (32)
//! [u8; 32]  placement key
//! u32       new record count
//! u32       tried record count
//! u32       new bucket count ^ (1 << 30)
//! record*   new records
//! record*   tried records
//! per new bucket: u32 length, then u32 indices into the new records
//! ```
//!
//! Bucket lists are only honoured when the version and bucket count match;
//! otherwise every New record falls back to its primary bucket.

use std::net::SocketAddr;
use std::sync::Arc;

use bincode::Options;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::config::{
    AddrManConfig, BUCKET_SIZE, NEW_BUCKETS_PER_ADDRESS, NEW_BUCKET_COUNT, TRIED_BUCKET_COUNT,
};
use super::manager::AddrMan;
use super::security::{bucket_position, new_bucket, tried_bucket, SecretKey, KEY_SIZE};
use super::types::{AddressRecord, LoadReport, RecordId};
use crate::domain::{
    ip_from_bytes, ip_to_bytes, AddrManError, NetAddress, ServiceFlags, Timestamp,
};
use crate::ports::RandomSource;

/// Current format version.
pub const FORMAT_VERSION: u8 = 1;

const BUCKET_COUNT_MARKER: u32 = 1 << 30;

fn codec() -> impl Options + Copy {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

/// One record as stored on disk.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedRecord {
    ip: [u8; 16],
    port: u16,
    services: u64,
    time: u64,
    version: u32,
    source: [u8; 16],
    last_success: u64,
    last_try: u64,
    attempts: u32,
}

impl PersistedRecord {
    fn from_record(record: &AddressRecord) -> Self {
        let address = &record.address;
        Self {
            ip: ip_to_bytes(&address.ip()),
            port: address.addr.port(),
            services: address.services.bits(),
            time: address.time.as_secs(),
            version: address.version,
            source: ip_to_bytes(&record.source),
            last_success: record.last_success.map_or(0, |t| t.as_secs()),
            last_try: record.last_try.map_or(0, |t| t.as_secs()),
            attempts: record.attempts,
        }
    }

    fn into_record(self, random_index: usize) -> AddressRecord {
        let optional = |secs: u64| (secs != 0).then(|| Timestamp::new(secs));
        let address = NetAddress {
            addr: SocketAddr::new(ip_from_bytes(self.ip), self.port),
            services: ServiceFlags(self.services),
            time: Timestamp::new(self.time),
            version: self.version,
        };
        let mut record = AddressRecord::new(address, ip_from_bytes(self.source), random_index);
        record.last_success = optional(self.last_success);
        record.last_try = optional(self.last_try);
        record.attempts = self.attempts;
        record
    }
}

impl AddrMan {
    /// Encode the cache.
    pub fn serialize(&self) -> Result<Vec<u8>, AddrManError> {
        let opts = codec();
        let ids = self.sorted_ids();
        let (tried, new): (Vec<RecordId>, Vec<RecordId>) = ids
            .into_iter()
            .partition(|id| self.records.get(id).is_some_and(|r| r.in_tried));

        let mut out = Vec::new();
        opts.serialize_into(&mut out, &FORMAT_VERSION)?;
        opts.serialize_into(&mut out, &(KEY_SIZE as u8))?;
        opts.serialize_into(&mut out, self.key.as_bytes())?;
        opts.serialize_into(&mut out, &(new.len() as u32))?;
        opts.serialize_into(&mut out, &(tried.len() as u32))?;
        opts.serialize_into(&mut out, &(NEW_BUCKET_COUNT as u32 ^ BUCKET_COUNT_MARKER))?;

        // Bucket lists refer to New records by their index in this sequence.
        let mut index_of = std::collections::HashMap::with_capacity(new.len());
        for (index, id) in new.iter().enumerate() {
            if let Some(record) = self.records.get(id) {
                opts.serialize_into(&mut out, &PersistedRecord::from_record(record))?;
                index_of.insert(*id, index as u32);
            }
        }
        for id in &tried {
            if let Some(record) = self.records.get(id) {
                opts.serialize_into(&mut out, &PersistedRecord::from_record(record))?;
            }
        }

        for bucket in 0..NEW_BUCKET_COUNT {
            let entries: Vec<u32> = self
                .new_grid
                .bucket(bucket)
                .filter_map(|(_, id)| index_of.get(&id).copied())
                .collect();
            opts.serialize_into(&mut out, &(entries.len() as u32))?;
            for index in entries {
                opts.serialize_into(&mut out, &index)?;
            }
        }

        debug!(
            "[qc-01] Serialized address cache: {} new, {} tried, {} bytes",
            new.len(),
            tried.len(),
            out.len()
        );
        Ok(out)
    }

    /// Replace the cache with the one encoded in `data`.
    ///
    /// Never loads partially: on any error the cache is left empty under a
    /// fresh key.
    pub fn deserialize(&mut self, data: &[u8]) -> Result<LoadReport, AddrManError> {
        match Self::decode(self.config().clone(), self.rng(), data) {
            Ok((loaded, report)) => {
                *self = loaded;
                Ok(report)
            }
            Err(err) => {
                warn!(
                    "[qc-01] Discarding address cache after failed load ({} records): {}",
                    self.size(),
                    err
                );
                self.clear();
                Err(err)
            }
        }
    }

    fn decode(
        config: AddrManConfig,
        rng: Arc<dyn RandomSource>,
        data: &[u8],
    ) -> Result<(Self, LoadReport), AddrManError> {
        let opts = codec();
        let mut reader = data;

        let version: u8 = opts.deserialize_from(&mut reader)?;
        let key_size: u8 = opts.deserialize_from(&mut reader)?;
        if key_size as usize != KEY_SIZE {
            return Err(AddrManError::UnsupportedKeySize(key_size));
        }
        let key: [u8; KEY_SIZE] = opts.deserialize_from(&mut reader)?;
        let new_count: u32 = opts.deserialize_from(&mut reader)?;
        let tried_count: u32 = opts.deserialize_from(&mut reader)?;
        let bucket_count = opts.deserialize_from::<_, u32>(&mut reader)? ^ BUCKET_COUNT_MARKER;

        if new_count as usize > NEW_BUCKET_COUNT * BUCKET_SIZE
            || tried_count as usize > TRIED_BUCKET_COUNT * BUCKET_SIZE
        {
            return Err(AddrManError::TableTooLarge {
                new: new_count,
                tried: tried_count,
            });
        }

        let compatible = version == FORMAT_VERSION && bucket_count as usize == NEW_BUCKET_COUNT;
        let key = SecretKey::new(key);
        let mut man = AddrMan::with_key(config, rng, key.clone());
        let mut report = LoadReport::default();

        for _ in 0..new_count {
            let persisted: PersistedRecord = opts.deserialize_from(&mut reader)?;
            let id = man.insert_loaded(persisted)?;
            man.new_count += 1;

            if !compatible {
                let Some(record) = man.records.get(&id) else {
                    continue;
                };
                let addr = record.address.addr;
                let bucket = new_bucket(&key, &addr, &record.source);
                let position = bucket_position(&key, true, bucket, &addr);
                if man.new_grid.get(bucket, position).is_none() {
                    man.new_grid.set(bucket, position, id);
                    if let Some(record) = man.records.get_mut(&id) {
                        record.ref_count = 1;
                    }
                }
            }
        }

        for _ in 0..tried_count {
            let persisted: PersistedRecord = opts.deserialize_from(&mut reader)?;
            let addr = SocketAddr::new(ip_from_bytes(persisted.ip), persisted.port);
            if man.by_address.contains_key(&addr.ip()) {
                return Err(AddrManError::DuplicateAddress(addr.ip()));
            }

            let bucket = tried_bucket(&key, &addr);
            let position = bucket_position(&key, false, bucket, &addr);
            if man.tried_grid.get(bucket, position).is_some() {
                report.lost_tried += 1;
                continue;
            }

            let id = man.insert_loaded(persisted)?;
            if let Some(record) = man.records.get_mut(&id) {
                record.in_tried = true;
            }
            man.tried_grid.set(bucket, position, id);
            man.tried_count += 1;
        }

        for bucket in 0..bucket_count as usize {
            let len: u32 = opts.deserialize_from(&mut reader)?;
            for _ in 0..len {
                let index: u32 = opts.deserialize_from(&mut reader)?;
                if !compatible || index >= new_count {
                    continue;
                }
                let id = RecordId(u64::from(index));
                let Some(record) = man.records.get(&id) else {
                    continue;
                };
                let (addr, refs) = (record.address.addr, record.ref_count);
                let position = bucket_position(&key, true, bucket, &addr);
                if man.new_grid.get(bucket, position).is_none() && refs < NEW_BUCKETS_PER_ADDRESS {
                    man.new_grid.set(bucket, position, id);
                    if let Some(record) = man.records.get_mut(&id) {
                        record.ref_count += 1;
                    }
                }
            }
        }

        // New records left without any slot are dropped.
        let unplaced: Vec<RecordId> = man
            .records
            .iter()
            .filter(|(_, r)| !r.in_tried && r.ref_count == 0)
            .map(|(id, _)| *id)
            .collect();
        report.lost_new = unplaced.len();
        for id in unplaced {
            man.delete(id);
        }

        man.check()?;

        report.new_count = man.new_count;
        report.tried_count = man.tried_count;
        if report.lost_new > 0 || report.lost_tried > 0 {
            warn!(
                "[qc-01] Loaded address cache with losses: {} new and {} tried records dropped",
                report.lost_new, report.lost_tried
            );
        }
        debug!(
            "[qc-01] Loaded address cache: {} new, {} tried (compatible layout: {})",
            report.new_count, report.tried_count, compatible
        );
        Ok((man, report))
    }

    /// Add a decoded record under the next id, without placing it.
    fn insert_loaded(&mut self, persisted: PersistedRecord) -> Result<RecordId, AddrManError> {
        let record = persisted.into_record(self.random_order.len());
        let ip = record.address.ip();
        if self.by_address.contains_key(&ip) {
            return Err(AddrManError::DuplicateAddress(ip));
        }

        let id = RecordId(self.next_id);
        self.next_id += 1;
        self.by_address.insert(ip, id);
        self.records.insert(id, record);
        self.random_order.push(id);
        Ok(id)
    }
}
