//! Address manager security primitives.
//!
//! SECURITY-CRITICAL: keyed bucket placement for anti-eclipse defense.
//! Isolate for security audits.
//!
//! Placement is a pure function of the per-cache secret key and the
//! address (plus its source for the New table). Without the key an
//! attacker cannot predict which bucket an address lands in; with it the
//! placement is fully reproducible, which the consistency check and the
//! persisted format both rely on.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use sha2::{Digest, Sha256};

use super::config::{
    BUCKET_SIZE, NEW_BUCKETS_PER_SOURCE_GROUP, NEW_BUCKET_COUNT, TRIED_BUCKETS_PER_GROUP,
    TRIED_BUCKET_COUNT,
};
use crate::domain::{ip_to_bytes, NetGroup};

/// Length of the bucket placement key in bytes.
pub const KEY_SIZE: usize = 32;

/// 256-bit secret seeding all bucket placement.
///
/// `Debug` is redacted so the key never ends up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Double SHA-256.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// Incremental writer for the placement hash.
///
/// Variable-length fields are length-prefixed so distinct field splits can
/// never produce the same preimage.
struct PlacementHasher(Sha256);

impl PlacementHasher {
    fn new(key: &SecretKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        Self(hasher)
    }

    fn bytes(mut self, data: &[u8]) -> Self {
        self.0.update([data.len() as u8]);
        self.0.update(data);
        self
    }

    fn tag(mut self, tag: u8) -> Self {
        self.0.update([tag]);
        self
    }

    fn u32(mut self, value: u32) -> Self {
        self.0.update(value.to_le_bytes());
        self
    }

    fn u64(mut self, value: u64) -> Self {
        self.0.update(value.to_le_bytes());
        self
    }

    /// Second SHA-256 round, folded to the first eight bytes (little endian).
    fn finish(self) -> u64 {
        let second = Sha256::digest(self.0.finalize());
        let mut folded = [0u8; 8];
        folded.copy_from_slice(&second[..8]);
        u64::from_le_bytes(folded)
    }
}

/// Address key: 16-byte IP followed by the big-endian port.
fn address_key(addr: &SocketAddr) -> [u8; 18] {
    let mut key = [0u8; 18];
    key[..16].copy_from_slice(&ip_to_bytes(&addr.ip()));
    key[16..].copy_from_slice(&addr.port().to_be_bytes());
    key
}

/// New-table bucket for `addr` as reported by `source`.
///
/// The intermediate hash is reduced modulo `NEW_BUCKETS_PER_SOURCE_GROUP`, so
/// one informant's group can reach at most 64 New buckets no matter how many
/// addresses it relays.
pub fn new_bucket(key: &SecretKey, addr: &SocketAddr, source: &IpAddr) -> usize {
    let addr_group = NetGroup::from_ip(&addr.ip());
    let source_group = NetGroup::from_ip(source);

    let h1 = PlacementHasher::new(key)
        .bytes(addr_group.as_bytes())
        .bytes(source_group.as_bytes())
        .finish();
    let h2 = PlacementHasher::new(key)
        .bytes(source_group.as_bytes())
        .u64(h1 % NEW_BUCKETS_PER_SOURCE_GROUP)
        .finish();

    (h2 % NEW_BUCKET_COUNT as u64) as usize
}

/// Tried-table bucket for `addr`.
///
/// Each address group reaches at most `TRIED_BUCKETS_PER_GROUP` buckets.
pub fn tried_bucket(key: &SecretKey, addr: &SocketAddr) -> usize {
    let addr_group = NetGroup::from_ip(&addr.ip());

    let h1 = PlacementHasher::new(key).bytes(&address_key(addr)).finish();
    let h2 = PlacementHasher::new(key)
        .bytes(addr_group.as_bytes())
        .u64(h1 % TRIED_BUCKETS_PER_GROUP)
        .finish();

    (h2 % TRIED_BUCKET_COUNT as u64) as usize
}

/// Slot of `addr` inside `bucket` of the New (`is_new`) or Tried table.
pub fn bucket_position(key: &SecretKey, is_new: bool, bucket: usize, addr: &SocketAddr) -> usize {
    let h = PlacementHasher::new(key)
        .tag(if is_new { b'N' } else { b'K' })
        .u32(bucket as u32)
        .bytes(&address_key(addr))
        .finish();

    (h % BUCKET_SIZE as u64) as usize
}
