//! Peers file: the cache blob wrapped in a network magic and a checksum.
//!
//! ```text
//! [u32 magic, little endian][blob][sha256d(blob), 32 bytes]
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::domain::{double_sha256, AddrManError, NetworkMagic};

const MAGIC_LEN: usize = 4;
const CHECKSUM_LEN: usize = 32;

/// Wrap `blob` for storage.
pub fn encode_envelope(magic: NetworkMagic, blob: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAGIC_LEN + blob.len() + CHECKSUM_LEN);
    out.extend_from_slice(&magic.as_u32().to_le_bytes());
    out.extend_from_slice(blob);
    out.extend_from_slice(&double_sha256(blob));
    out
}

/// Verify and unwrap stored bytes, returning the inner blob.
pub fn decode_envelope(magic: NetworkMagic, data: &[u8]) -> Result<&[u8], AddrManError> {
    if data.len() < MAGIC_LEN + CHECKSUM_LEN {
        return Err(AddrManError::Truncated);
    }

    let (head, rest) = data.split_at(MAGIC_LEN);
    let mut found = [0u8; MAGIC_LEN];
    found.copy_from_slice(head);
    let found = u32::from_le_bytes(found);
    if found != magic.as_u32() {
        return Err(AddrManError::BadMagic {
            expected: magic.as_u32(),
            found,
        });
    }

    let (blob, checksum) = rest.split_at(rest.len() - CHECKSUM_LEN);
    if double_sha256(blob) != checksum {
        return Err(AddrManError::ChecksumMismatch);
    }
    Ok(blob)
}

/// On-disk location of the persisted cache.
#[derive(Debug, Clone)]
pub struct PeersFile {
    path: PathBuf,
    magic: NetworkMagic,
}

impl PeersFile {
    pub fn new(path: impl Into<PathBuf>, magic: NetworkMagic) -> Self {
        Self {
            path: path.into(),
            magic,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read and verify the file, returning the inner blob.
    pub fn read(&self) -> Result<Vec<u8>, AddrManError> {
        let data = fs::read(&self.path)?;
        let blob = decode_envelope(self.magic, &data)?.to_vec();
        debug!(
            "[qc-01] Read peers file {} ({} bytes)",
            self.path.display(),
            data.len()
        );
        Ok(blob)
    }

    /// Write `blob` atomically: temp file in the same directory, then rename.
    pub fn write(&self, blob: &[u8]) -> Result<(), AddrManError> {
        let data = encode_envelope(self.magic, blob);
        let tmp = self.temp_path();
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        if let Err(err) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        info!(
            "[qc-01] Wrote peers file {} ({} bytes)",
            self.path.display(),
            data.len()
        );
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "peers".into());
        name.push(".new");
        self.path.with_file_name(name)
    }
}
