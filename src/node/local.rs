use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::warn;
use tokio::sync::Mutex;

use crate::error::{Result, StorageError};
use crate::fingerprint::{Fingerprint, MAX_CHUNK_SIZE};
use crate::node::{ExportedArc, Node};

/// A data keeper backed by a plain directory tree: one file per chunk,
/// grouped under a per-sector subdirectory so `export`/`drop_arc` only
/// need to touch the sectors named in an arc. Mirrors the teacher's
/// on-disk chunk layout (directory-per-shard, file-per-chunk), minus
/// compression and encryption, which this core has no use for.
pub struct LocalNode {
    id: String,
    root: PathBuf,
    capacity: u64,
    current_usage: Mutex<u64>,
}

impl LocalNode {
    pub async fn new(id: impl Into<String>, root: impl Into<PathBuf>, capacity: u64) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let mut usage = 0u64;
        let mut entries = tokio::fs::read_dir(&root).await?;
        while let Some(sector_dir) = entries.next_entry().await? {
            if !sector_dir.file_type().await?.is_dir() {
                continue;
            }
            let mut chunk_files = tokio::fs::read_dir(sector_dir.path()).await?;
            while let Some(chunk_file) = chunk_files.next_entry().await? {
                if chunk_file.file_type().await?.is_file() {
                    usage += chunk_file.metadata().await?.len();
                }
            }
        }
        Ok(Self {
            id: id.into(),
            root,
            capacity,
            current_usage: Mutex::new(usage),
        })
    }

    fn sector_dir(&self, sector: u32) -> PathBuf {
        self.root.join(sector.to_string())
    }

    fn chunk_path(&self, chunk: &Fingerprint) -> PathBuf {
        self.sector_dir(chunk.sector())
            .join(format!("{}_{}", chunk.file_id, chunk.chunk_id))
    }
}

#[async_trait]
impl Node for LocalNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get_usage(&self) -> Result<f64> {
        let usage = *self.current_usage.lock().await;
        Ok(usage as f64 / self.capacity as f64)
    }

    async fn get(&self, chunk: &Fingerprint) -> Result<Vec<u8>> {
        match tokio::fs::read(self.chunk_path(chunk)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn put(&self, chunk: &Fingerprint, data: Bytes) -> Result<()> {
        if data.len() > MAX_CHUNK_SIZE {
            return Err(StorageError::TooLarge(MAX_CHUNK_SIZE));
        }

        // Held across the write so a concurrent `put` can't slip past the
        // capacity check before this one commits its usage delta.
        let mut usage = self.current_usage.lock().await;
        if *usage + data.len() as u64 > self.capacity {
            return Err(StorageError::Capacity);
        }

        let dir = self.sector_dir(chunk.sector());
        tokio::fs::create_dir_all(&dir).await?;
        let path = self.chunk_path(chunk);
        write_atomic(&path, &data).await?;

        *usage += data.len() as u64;
        Ok(())
    }

    async fn export(&self, sector: u32) -> Result<ExportedArc> {
        let dir = self.sector_dir(sector);
        let mut records = Vec::new();

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ExportedArc::Empty),
            Err(e) => return Err(StorageError::Io(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().into_string().unwrap_or_default();
            let (file_id, chunk_id) = match name.split_once('_') {
                Some(parts) => parts,
                None => continue,
            };
            let data = tokio::fs::read(entry.path()).await?;
            records.push((Fingerprint::new(file_id, chunk_id), data));
        }

        if records.is_empty() {
            return Ok(ExportedArc::Empty);
        }

        let blob = bundle::encode(&records);
        let checksum = crc32fast::hash(&blob);
        Ok(ExportedArc::Bundle(blob, checksum))
    }

    async fn import(&self, sector: u32, blob: Bytes, expected_checksum: u32) -> Result<()> {
        let actual = crc32fast::hash(&blob);
        if actual != expected_checksum {
            return Err(StorageError::Checksum);
        }

        let records = bundle::decode(&blob)?;
        let dir = self.sector_dir(sector);
        tokio::fs::create_dir_all(&dir).await?;

        let mut imported_bytes = 0u64;
        for (fingerprint, data) in &records {
            let path = dir.join(format!("{}_{}", fingerprint.file_id, fingerprint.chunk_id));
            write_atomic(&path, data).await?;
            imported_bytes += data.len() as u64;
        }

        let mut usage = self.current_usage.lock().await;
        *usage += imported_bytes;
        Ok(())
    }

    async fn drop_arc(&self, arc_start: u32, arc_end: u32) -> Result<()> {
        let mut freed = 0u64;
        for sector in arc_start..=arc_end {
            let dir = self.sector_dir(sector);
            match tokio::fs::metadata(&dir).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::Io(e)),
            }

            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_file() {
                    freed += entry.metadata().await?.len();
                }
            }
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(StorageError::Io(e));
                }
            }
        }

        let mut usage = self.current_usage.lock().await;
        *usage = usage.saturating_sub(freed);
        Ok(())
    }

    async fn purge(&self, chunks: &[Fingerprint]) -> Result<()> {
        for chunk in chunks {
            let path = self.chunk_path(chunk);
            let len = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!("node {}: error statting {:?} during purge: {}", self.id, path, e);
                    continue;
                }
            };
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("node {}: error purging {:?}: {}", self.id, path, e);
                continue;
            }
            let mut usage = self.current_usage.lock().await;
            *usage = usage.saturating_sub(len);
        }
        Ok(())
    }
}

/// Write `data` to `path` via a temp file plus rename, so a crash or
/// cancellation never leaves a half-written chunk visible under `path`.
/// The temp file is cleaned up on every exit path via its drop guard.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    tokio::fs::write(tmp.path(), data).await?;
    tmp.persist(path)
        .map_err(|e| StorageError::Io(e.error))?;
    Ok(())
}

/// Self-describing bundle encoding for a sector's chunks: a sequence of
/// length-prefixed `(fingerprint, data)` records. The checksum returned
/// alongside the blob by `export` (and re-verified by `import`) covers
/// exactly these bytes.
mod bundle {
    use super::*;

    pub fn encode(records: &[(Fingerprint, Vec<u8>)]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32_le(records.len() as u32);
        for (fp, data) in records {
            put_lenprefixed(&mut buf, fp.file_id.as_bytes());
            put_lenprefixed(&mut buf, fp.chunk_id.as_bytes());
            put_lenprefixed(&mut buf, data);
        }
        buf.freeze()
    }

    pub fn decode(blob: &Bytes) -> Result<Vec<(Fingerprint, Vec<u8>)>> {
        let mut cursor = blob.clone();
        if cursor.remaining() < 4 {
            return Err(StorageError::Checksum);
        }
        let count = cursor.get_u32_le();
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let file_id = get_lenprefixed_string(&mut cursor)?;
            let chunk_id = get_lenprefixed_string(&mut cursor)?;
            let data = get_lenprefixed_bytes(&mut cursor)?;
            records.push((Fingerprint::new(file_id, chunk_id), data));
        }
        Ok(records)
    }

    fn put_lenprefixed(buf: &mut BytesMut, data: &[u8]) {
        buf.put_u32_le(data.len() as u32);
        buf.put_slice(data);
    }

    fn get_lenprefixed_bytes(cursor: &mut Bytes) -> Result<Vec<u8>> {
        if cursor.remaining() < 4 {
            return Err(StorageError::Checksum);
        }
        let len = cursor.get_u32_le() as usize;
        if cursor.remaining() < len {
            return Err(StorageError::Checksum);
        }
        Ok(cursor.split_to(len).to_vec())
    }

    fn get_lenprefixed_string(cursor: &mut Bytes) -> Result<String> {
        let bytes = get_lenprefixed_bytes(cursor)?;
        String::from_utf8(bytes).map_err(|_| StorageError::Checksum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let node = LocalNode::new("a", dir.path(), 1024 * 1024).await.unwrap();
        let fp = Fingerprint::new("f1", "c1");
        node.put(&fp, Bytes::from_static(b"hello")).await.unwrap();
        let got = node.get(&fp).await.unwrap();
        assert_eq!(got, b"hello");
        assert!(node.get_usage().await.unwrap() > 0.0);
    }

    #[tokio::test]
    async fn put_rejects_oversized_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let node = LocalNode::new("a", dir.path(), 1024 * 1024 * 1024).await.unwrap();
        let fp = Fingerprint::new("f1", "c1");
        let oversized = vec![0u8; MAX_CHUNK_SIZE + 1];
        let err = node.put(&fp, Bytes::from(oversized)).await.unwrap_err();
        assert!(matches!(err, StorageError::TooLarge(_)));
    }

    #[tokio::test]
    async fn export_import_round_trips_and_drop_clears_usage() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let src = LocalNode::new("src", src_dir.path(), 1024 * 1024).await.unwrap();
        let dst = LocalNode::new("dst", dst_dir.path(), 1024 * 1024).await.unwrap();

        let fp = Fingerprint::new("f1", "c1");
        let sector = fp.sector();
        src.put(&fp, Bytes::from_static(b"payload")).await.unwrap();

        let bundle = src.export(sector).await.unwrap();
        let (blob, checksum) = match bundle {
            ExportedArc::Bundle(b, c) => (b, c),
            ExportedArc::Empty => panic!("expected a bundle"),
        };

        dst.import(sector, blob, checksum).await.unwrap();
        assert_eq!(dst.get(&fp).await.unwrap(), b"payload");

        let usage_before = src.get_usage().await.unwrap();
        src.drop_arc(sector, sector).await.unwrap();
        let usage_after = src.get_usage().await.unwrap();
        assert!(usage_after < usage_before);
        assert!(matches!(src.get(&fp).await, Err(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn import_rejects_bad_checksum_and_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let node = LocalNode::new("a", dir.path(), 1024 * 1024).await.unwrap();
        let blob = bundle::encode(&[(Fingerprint::new("f1", "c1"), b"x".to_vec())]);
        let err = node.import(0, blob, 0xdead_beef).await.unwrap_err();
        assert!(matches!(err, StorageError::Checksum));
        assert_eq!(node.get_usage().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn export_of_empty_sector_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let node = LocalNode::new("a", dir.path(), 1024 * 1024).await.unwrap();
        assert!(matches!(node.export(7).await.unwrap(), ExportedArc::Empty));
    }
}
