//! Chunk fingerprints and the ring key derived from them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The ring cardinality S.
pub const RING_SECTORS: u32 = 360;

/// The global per-chunk byte ceiling C (100 KiB).
pub const MAX_CHUNK_SIZE: usize = 100 * 1024;

/// Identifies one chunk: the file it belongs to, and the content hash of
/// its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub file_id: String,
    pub chunk_id: String,
}

impl Fingerprint {
    pub fn new(file_id: impl Into<String>, chunk_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            chunk_id: chunk_id.into(),
        }
    }

    /// Canonical string form used as the ring key input: `{file-id}_{chunk-id}`.
    pub fn canonical(&self) -> String {
        format!("{}_{}", self.file_id, self.chunk_id)
    }

    /// 32-bit IEEE CRC of the canonical string.
    pub fn ring_key(&self) -> u32 {
        crc32fast::hash(self.canonical().as_bytes())
    }

    /// The sector this fingerprint resolves to: `ring_key mod S`.
    pub fn sector(&self) -> u32 {
        self.ring_key() % RING_SECTORS
    }
}

/// Content hash used to derive a chunk's `chunk_id`: SHA-256, hex-encoded.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
