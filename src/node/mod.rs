//! The data-keeper capability contract (§4.2) and its concrete local
//! on-disk implementation (§6.2).

mod local;

pub use local::LocalNode;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::fingerprint::Fingerprint;

/// Result of exporting a sector. Modeled as a proper enum rather than a
/// sentinel checksum value (redesign flag RF-1, SPEC_FULL.md §9).
#[derive(Debug, Clone)]
pub enum ExportedArc {
    Empty,
    Bundle(Bytes, u32),
}

/// A storage node: owns a local byte store, serves `get`/`put` for a
/// chunk, and can export/import/drop a contiguous arc of its sectors.
#[async_trait]
pub trait Node: Send + Sync {
    /// Stable identity of this node within the cluster.
    fn id(&self) -> &str;

    /// Fraction of configured capacity currently in use, in `[0, 1]`.
    async fn get_usage(&self) -> Result<f64>;

    async fn get(&self, chunk: &Fingerprint) -> Result<Vec<u8>>;

    async fn put(&self, chunk: &Fingerprint, data: Bytes) -> Result<()>;

    /// Every chunk this node currently holds whose sector equals `sector`,
    /// bundled with a checksum that `import` must be able to verify.
    async fn export(&self, sector: u32) -> Result<ExportedArc>;

    /// Materialize a bundle produced by `export` into the local store.
    /// Fails with `Checksum` (leaving the store unchanged) if the blob
    /// does not match `expected_checksum`.
    async fn import(&self, sector: u32, blob: Bytes, expected_checksum: u32) -> Result<()>;

    /// Delete every chunk whose sector falls in `[arc_start, arc_end]`.
    /// Idempotent.
    async fn drop_arc(&self, arc_start: u32, arc_end: u32) -> Result<()>;

    /// Best-effort deletion of a specific set of chunks.
    async fn purge(&self, chunks: &[Fingerprint]) -> Result<()>;
}
