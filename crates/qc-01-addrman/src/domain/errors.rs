//! Domain Errors for the Address Manager

use std::io;
use std::net::IpAddr;

use thiserror::Error;

use super::address_manager::RecordId;

/// Errors surfaced to callers of the address manager.
///
/// Everything here is a *format* problem with persisted state (or the I/O
/// around it). None of them is recovered internally: a caller that fails to
/// load keeps an empty cache.
#[derive(Debug, Error)]
pub enum AddrManError {
    #[error("network magic mismatch: expected {expected:#010x}, found {found:#010x}")]
    BadMagic { expected: u32, found: u32 },

    #[error("peers file checksum mismatch")]
    ChecksumMismatch,

    #[error("unsupported key size {0} (expected 32)")]
    UnsupportedKeySize(u8),

    #[error("table counts exceed capacity: new={new} tried={tried}")]
    TableTooLarge { new: u32, tried: u32 },

    #[error("duplicate address {0} in serialized cache")]
    DuplicateAddress(IpAddr),

    #[error("serialized data truncated")]
    Truncated,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("address cache corrupted: {0}")]
    Corrupted(#[from] InvariantViolation),
}

impl From<bincode::Error> for AddrManError {
    fn from(err: bincode::Error) -> Self {
        match *err {
            bincode::ErrorKind::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                AddrManError::Truncated
            }
            other => AddrManError::Codec(other.to_string()),
        }
    }
}

/// A structural inconsistency found by the internal consistency check.
///
/// Never expected in production; indicates a defect in the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("random order holds {len} ids but new={new} tried={tried}")]
    RandomOrderLength { len: usize, new: usize, tried: usize },

    #[error("table counters new={new} tried={tried} disagree with records ({found_new}/{found_tried})")]
    TableCounts {
        new: usize,
        tried: usize,
        found_new: usize,
        found_tried: usize,
    },

    #[error("record {0} is in tried but still has new-table references")]
    TriedWithReferences(RecordId),

    #[error("record {0} is in neither table")]
    Orphan(RecordId),

    #[error("record {id} has {refs} references (max {max})")]
    TooManyReferences { id: RecordId, refs: u32, max: u32 },

    #[error("address index does not point at record {0}")]
    AddressIndex(RecordId),

    #[error("random order does not point at record {0}")]
    RandomIndex(RecordId),

    #[error("grid slot ({bucket}, {position}) references missing record {id}")]
    DanglingSlot {
        id: RecordId,
        bucket: usize,
        position: usize,
    },

    #[error("record {id} sits in the wrong {table} slot ({bucket}, {position})")]
    Misplaced {
        id: RecordId,
        table: &'static str,
        bucket: usize,
        position: usize,
    },

    #[error("record {id} counts {expected} references but the new grid holds {found}")]
    ReferenceCount {
        id: RecordId,
        expected: u32,
        found: u32,
    },
}
