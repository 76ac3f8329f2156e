//! Splits an upload into the ring's chunking unit. Ported straight from
//! the reference `chunkData` helper: K near-equal segments, last one
//! absorbing the remainder.

/// Chunks per file (current policy, SPEC_FULL.md §6).
pub const CHUNKS_PER_FILE: usize = 6;

pub fn split_into_chunks(data: &[u8], k: usize) -> Vec<&[u8]> {
    let chunk_size = data.len() / k;
    let mut chunks = Vec::with_capacity(k);
    for i in 0..k {
        let start = i * chunk_size;
        let end = if i == k - 1 { data.len() } else { (i + 1) * chunk_size };
        chunks.push(&data[start..end]);
    }
    chunks
}
