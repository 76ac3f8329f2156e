//! Background cleaner: sweeps abandoned uploads. SPEC_FULL.md §4.5.
//!
//! Grounded in the reference `cleanupBadChunks` goroutine: a ticker loop
//! selecting between its interval and a shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use log::warn;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::catalog::{Catalog, FileRecord, FileStatus};
use crate::orchestrator::Orchestrator;

pub fn spawn(
    orchestrator: Arc<Orchestrator>,
    catalog: Arc<dyn Catalog>,
    tick_interval: Duration,
    stale_after: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep(&orchestrator, catalog.as_ref(), stale_after).await;
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    })
}

async fn sweep(orchestrator: &Orchestrator, catalog: &dyn Catalog, stale_after: Duration) {
    match catalog.by_status(FileStatus::Purge).await {
        Ok(purge_candidates) => cleanup_files(orchestrator, catalog, purge_candidates).await,
        Err(e) => warn!("cleaner: error listing PURGE records: {}", e),
    }

    let threshold = crate::catalog::now_millis().saturating_sub(stale_after.as_millis() as u64);
    match catalog.stale_new_before(threshold).await {
        Ok(stale) => cleanup_files(orchestrator, catalog, stale).await,
        Err(e) => warn!("cleaner: error listing stale NEW records: {}", e),
    }
}

async fn cleanup_files(orchestrator: &Orchestrator, catalog: &dyn Catalog, files: Vec<FileRecord>) {
    for file in files {
        if let Err(e) = orchestrator.purge_chunks(&file.chunks).await {
            warn!("cleaner: error purging chunks for {}: {}", file.file_id, e);
            continue;
        }
        if let Err(e) = catalog.delete(&file.file_id).await {
            warn!("cleaner: error deleting record for {}: {}", file.file_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemCatalog;
    use crate::fingerprint::Fingerprint;
    use crate::node::LocalNode;
    use bytes::Bytes;

    #[tokio::test]
    async fn sweep_purges_a_tombstoned_file_and_deletes_its_row() {
        let orchestrator = Orchestrator::new();
        let dir = tempfile::tempdir().unwrap();
        let node = Arc::new(LocalNode::new("a", dir.path(), 10 * 1024 * 1024).await.unwrap());
        orchestrator.add_data_keeper("a".into(), node).await.unwrap();

        let catalog: Arc<dyn Catalog> = Arc::new(MemCatalog::new());
        let fp = Fingerprint::new("f1", "c1");
        orchestrator.put_chunk(&fp, Bytes::from_static(b"x")).await.unwrap();
        catalog.insert("f1", vec![fp.clone()]).await.unwrap();
        catalog.set_status("f1", FileStatus::Purge).await.unwrap();

        sweep(&orchestrator, catalog.as_ref(), Duration::from_secs(3600)).await;

        assert!(catalog.chunks_of("f1").await.is_err());
        assert!(matches!(
            orchestrator.get_chunk(&fp).await,
            Err(crate::error::StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn sweep_purges_a_stale_new_record() {
        let orchestrator = Orchestrator::new();
        let dir = tempfile::tempdir().unwrap();
        let node = Arc::new(LocalNode::new("a", dir.path(), 10 * 1024 * 1024).await.unwrap());
        orchestrator.add_data_keeper("a".into(), node).await.unwrap();

        let catalog = MemCatalog::new();
        catalog.insert("f1", vec![]).await.unwrap();
        let catalog: Arc<dyn Catalog> = Arc::new(catalog);

        // A record created just now is not older than a generous window.
        sweep(&orchestrator, catalog.as_ref(), Duration::from_secs(3600)).await;
        assert!(catalog.chunks_of("f1").await.is_ok());

        // Once its age exceeds a near-zero window, the next tick sweeps it.
        tokio::time::sleep(Duration::from_millis(5)).await;
        sweep(&orchestrator, catalog.as_ref(), Duration::from_millis(0)).await;
        assert!(catalog.chunks_of("f1").await.is_err());
    }
}
