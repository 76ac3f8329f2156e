//! Owns the Ring, coordinates node joins, and routes per-chunk
//! get/put/purge to the right node. See SPEC_FULL.md §4.3.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use log::{info, warn};
use tokio::sync::{Mutex, RwLock};

use crate::error::{collect_results, Result};
use crate::fingerprint::Fingerprint;
use crate::node::{ExportedArc, Node};
use crate::ring::Ring;

pub struct Orchestrator {
    ring: Arc<Ring>,
    nodes: RwLock<HashMap<String, Arc<dyn Node>>>,
    /// Serializes `add_data_keeper` calls. The ring's usage-probe releases
    /// its lock across the parallel `get_usage` round trip (§5); this
    /// mutex is what makes that safe by ensuring no second join can
    /// mutate the ring in between.
    join_lock: Mutex<()>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self {
            ring: Arc::new(Ring::new()),
            nodes: RwLock::new(HashMap::new()),
            join_lock: Mutex::new(()),
        }
    }

    /// Add a new data keeper to the cluster and orchestrate rebalance:
    /// split -> transfer -> verify -> activate -> drop source.
    pub async fn add_data_keeper(&self, node_id: String, handle: Arc<dyn Node>) -> Result<()> {
        let _join_guard = self.join_lock.lock().await;

        self.nodes
            .write()
            .await
            .insert(node_id.clone(), handle.clone());

        let weak = Arc::downgrade(&handle);
        let arc = self.ring.insert(node_id.clone(), weak).await?;

        if arc.arc_end_new == arc.arc_end_old {
            self.ring.mark_ready(&node_id).await;
            info!("orchestrator: {} joined without needing a transfer", node_id);
            return Ok(());
        }

        let (source, source_id) = self.ring.resolve(arc.arc_end_old).await?;

        let pulls = (arc.arc_start..=arc.arc_end_new).map(|sector| {
            let handle = handle.clone();
            let source = source.clone();
            async move {
                match source.export(sector).await? {
                    ExportedArc::Empty => Ok(()),
                    ExportedArc::Bundle(blob, checksum) => handle.import(sector, blob, checksum).await,
                }
            }
        });

        if let Err(e) = collect_results(futures::future::join_all(pulls).await) {
            warn!(
                "orchestrator: join for {} aborted pulling from {}: {} (node stays PREPARING)",
                node_id, source_id, e
            );
            return Err(e);
        }

        self.ring.mark_ready(&node_id).await;
        info!(
            "orchestrator: {} activated, took sectors [{}, {}] from {}",
            node_id, arc.arc_start, arc.arc_end_new, source_id
        );

        if let Err(e) = source.drop_arc(arc.arc_start, arc.arc_end_new).await {
            warn!(
                "orchestrator: drop_arc on {} failed after activating {}: {} (data already safe on newcomer)",
                source_id, node_id, e
            );
        }

        Ok(())
    }

    pub async fn get_chunk(&self, chunk: &Fingerprint) -> Result<Vec<u8>> {
        let (node, _id) = self.ring.resolve_chunk(chunk).await?;
        node.get(chunk).await
    }

    pub async fn put_chunk(&self, chunk: &Fingerprint, data: Bytes) -> Result<()> {
        let (node, _id) = self.ring.resolve_chunk(chunk).await?;
        node.put(chunk, data).await
    }

    /// Group chunks by resolved node and fan out one `purge` call per
    /// distinct node.
    pub async fn purge_chunks(&self, chunks: &[Fingerprint]) -> Result<()> {
        let mut grouped: HashMap<String, (Arc<dyn Node>, Vec<Fingerprint>)> = HashMap::new();
        for chunk in chunks {
            if let Ok((node, node_id)) = self.ring.resolve_chunk(chunk).await {
                grouped
                    .entry(node_id)
                    .or_insert_with(|| (node, Vec::new()))
                    .1
                    .push(chunk.clone());
            }
        }

        let purges = grouped
            .into_values()
            .map(|(node, chunks)| async move { node.purge(&chunks).await });

        collect_results(futures::future::join_all(purges).await).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::LocalNode;

    async fn add_node(orch: &Orchestrator, id: &str, capacity: u64) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let node = Arc::new(LocalNode::new(id, dir.path(), capacity).await.unwrap());
        orch.add_data_keeper(id.to_string(), node).await.unwrap();
        dir
    }

    #[tokio::test]
    async fn single_node_round_trip() {
        let orch = Orchestrator::new();
        let _dir = add_node(&orch, "a", 10 * 1024 * 1024).await;

        let fp = Fingerprint::new("f1", "c1");
        orch.put_chunk(&fp, Bytes::from_static(b"payload")).await.unwrap();
        let got = orch.get_chunk(&fp).await.unwrap();
        assert_eq!(got, b"payload");
    }

    #[tokio::test]
    async fn join_rebalances_and_old_data_still_resolves() {
        let orch = Orchestrator::new();
        let _dir_a = add_node(&orch, "a", 10 * 1024 * 1024).await;

        // Write a spread of chunks before any other node joins.
        let mut chunks = Vec::new();
        for i in 0..40 {
            let fp = Fingerprint::new(format!("f{}", i), format!("c{}", i));
            orch.put_chunk(&fp, Bytes::from(format!("payload-{}", i))).await.unwrap();
            chunks.push(fp);
        }

        let _dir_b = add_node(&orch, "b", 10 * 1024 * 1024).await;

        for (i, fp) in chunks.iter().enumerate() {
            let got = orch.get_chunk(fp).await.unwrap();
            assert_eq!(got, format!("payload-{}", i).into_bytes());
        }
    }

    #[tokio::test]
    async fn purge_chunks_removes_them_from_their_node() {
        let orch = Orchestrator::new();
        let _dir = add_node(&orch, "a", 10 * 1024 * 1024).await;

        let fp = Fingerprint::new("f1", "c1");
        orch.put_chunk(&fp, Bytes::from_static(b"payload")).await.unwrap();
        orch.purge_chunks(&[fp.clone()]).await.unwrap();

        let err = orch.get_chunk(&fp).await.unwrap_err();
        assert!(matches!(err, crate::error::StorageError::NotFound));
    }
}
