//! The upload/download façade: splits files into chunks, fans them out to
//! the orchestrator, and records progress in the catalog. SPEC_FULL.md §4.4.

mod chunking;
pub mod cleaner;

pub use chunking::{split_into_chunks, CHUNKS_PER_FILE};

use std::sync::Arc;

use bytes::Bytes;
use log::warn;

use crate::catalog::{Catalog, FileStatus};
use crate::error::{collect_results, Result};
use crate::fingerprint::{content_hash, Fingerprint};
use crate::orchestrator::Orchestrator;

pub struct Receiver {
    orchestrator: Arc<Orchestrator>,
    catalog: Arc<dyn Catalog>,
}

impl Receiver {
    pub fn new(orchestrator: Arc<Orchestrator>, catalog: Arc<dyn Catalog>) -> Self {
        Self { orchestrator, catalog }
    }

    /// Split `data` into the ring's chunking unit, register the file as
    /// NEW, then fan the chunks out to the orchestrator. Marks the record
    /// COMPLETE on success, or PURGE (for the cleaner to sweep) on failure.
    pub async fn save_file(&self, file_id: &str, data: Bytes) -> Result<()> {
        let segments = split_into_chunks(&data, CHUNKS_PER_FILE);
        let chunk_list: Vec<Fingerprint> = segments
            .iter()
            .map(|seg| Fingerprint::new(file_id, content_hash(seg)))
            .collect();

        self.catalog.insert(file_id, chunk_list.clone()).await?;

        let puts = chunk_list.iter().zip(segments.iter()).map(|(fp, seg)| {
            let bytes = Bytes::copy_from_slice(seg);
            async move { self.orchestrator.put_chunk(fp, bytes).await }
        });

        if let Err(e) = collect_results(futures::future::join_all(puts).await) {
            warn!("receiver: save_file({}) failed mid-upload: {}", file_id, e);
            if let Err(set_err) = self.catalog.set_status(file_id, FileStatus::Purge).await {
                warn!(
                    "receiver: failed to mark {} for purge after a failed upload: {}",
                    file_id, set_err
                );
            }
            return Err(e);
        }

        self.catalog.set_status(file_id, FileStatus::Complete).await
    }

    /// Fetch every chunk of `file_id` in order and concatenate them.
    pub async fn get_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let chunk_list = self.catalog.chunks_of(file_id).await?;

        let gets = chunk_list
            .iter()
            .map(|fp| async move { self.orchestrator.get_chunk(fp).await });

        let parts = collect_results(futures::future::join_all(gets).await)?;
        Ok(parts.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemCatalog;
    use crate::node::LocalNode;

    async fn receiver_with_one_node(capacity: u64) -> (Receiver, tempfile::TempDir) {
        let orchestrator = Arc::new(Orchestrator::new());
        let dir = tempfile::tempdir().unwrap();
        let node = Arc::new(LocalNode::new("a", dir.path(), capacity).await.unwrap());
        orchestrator.add_data_keeper("a".into(), node).await.unwrap();
        let catalog: Arc<dyn Catalog> = Arc::new(MemCatalog::new());
        (Receiver::new(orchestrator, catalog), dir)
    }

    #[tokio::test]
    async fn save_then_get_round_trips_the_original_bytes() {
        let (receiver, _dir) = receiver_with_one_node(10 * 1024 * 1024).await;
        let data = Bytes::from((0..509u32).map(|b| b as u8).collect::<Vec<u8>>());

        receiver.save_file("report.pdf", data.clone()).await.unwrap();
        let got = receiver.get_file("report.pdf").await.unwrap();

        assert_eq!(got, data.to_vec());
    }

    #[tokio::test]
    async fn save_file_marks_the_record_complete() {
        let (receiver, _dir) = receiver_with_one_node(10 * 1024 * 1024).await;
        receiver.save_file("f1", Bytes::from_static(b"hello world")).await.unwrap();

        let complete = receiver.catalog.by_status(FileStatus::Complete).await.unwrap();
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].file_id, "f1");
    }

    #[tokio::test]
    async fn save_file_over_capacity_marks_the_record_for_purge() {
        // A node with effectively no room: every put fails with Capacity.
        let (receiver, _dir) = receiver_with_one_node(1).await;
        let err = receiver
            .save_file("f1", Bytes::from_static(b"this upload will not fit anywhere"))
            .await
            .unwrap_err();

        assert!(matches!(err, crate::error::StorageError::Composite(_, _, _)));
        let pending_purge = receiver.catalog.by_status(FileStatus::Purge).await.unwrap();
        assert_eq!(pending_purge.len(), 1);
        assert_eq!(pending_purge[0].file_id, "f1");
    }

    #[tokio::test]
    async fn get_file_on_unknown_id_fails_not_found() {
        let (receiver, _dir) = receiver_with_one_node(10 * 1024 * 1024).await;
        let err = receiver.get_file("nope").await.unwrap_err();
        assert!(matches!(err, crate::error::StorageError::NotFound));
    }
}
