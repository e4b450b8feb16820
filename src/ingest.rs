//! Development ingestion: split a local file into content-addressed blocks,
//! pack them into shards, and write the per-shard indexes, catalog markers,
//! and object manifest the gateway expects.
//!
//! Production ingestion happens upstream of this gateway; this exists so an
//! operator can seed a store and exercise the rollup and retrieval paths
//! end to end.

use std::path::Path;

use bytes::Bytes;
use tracing::info;

use crate::digest::{Digest, ShardId};
use crate::error::{GatewayError, Result};
use crate::format;
use crate::store::{keys, GatewayStore};

#[derive(Debug)]
pub struct IngestReport {
    pub root: String,
    pub bytes: u64,
    pub blocks: usize,
    pub shards: usize,
}

/// Ingest `path` into the store. Returns the root identifier under which
/// the object can be retrieved once a rollup artifact is built.
pub async fn ingest_file(
    store: &GatewayStore,
    path: &Path,
    block_size: u64,
    shard_capacity: u64,
) -> Result<IngestReport> {
    if block_size == 0 || shard_capacity < block_size {
        return Err(GatewayError::Config(
            "block size must be > 0 and no larger than shard capacity".into(),
        ));
    }
    let content = tokio::fs::read(path).await?;
    if content.is_empty() {
        return Err(GatewayError::Config(format!("{path:?} is empty")));
    }
    let root = Digest::sha2_256(&content).to_hex();

    let mut manifest: Vec<Digest> = Vec::new();
    let mut shard_bytes: Vec<u8> = Vec::new();
    let mut shard_entries: Vec<(Digest, u64)> = Vec::new();
    let mut shard_count = 0usize;

    for block in content.chunks(block_size as usize) {
        let digest = Digest::sha2_256(block);
        manifest.push(digest.clone());

        // Duplicate blocks within a shard are indexed once.
        if shard_entries.iter().any(|(d, _)| *d == digest) {
            continue;
        }
        if shard_bytes.len() as u64 + block.len() as u64 > shard_capacity
            && !shard_bytes.is_empty()
        {
            flush_shard(store, &root, &mut shard_bytes, &mut shard_entries).await?;
            shard_count += 1;
        }
        shard_entries.push((digest, shard_bytes.len() as u64));
        shard_bytes.extend_from_slice(block);
    }
    if !shard_bytes.is_empty() {
        flush_shard(store, &root, &mut shard_bytes, &mut shard_entries).await?;
        shard_count += 1;
    }

    let block_count = manifest.len();
    store
        .put(&keys::manifest(&root), Bytes::from(format::encode_manifest(&manifest)))
        .await?;

    info!(
        root,
        bytes = content.len(),
        blocks = block_count,
        shards = shard_count,
        "Ingest complete"
    );
    Ok(IngestReport {
        root,
        bytes: content.len() as u64,
        blocks: block_count,
        shards: shard_count,
    })
}

async fn flush_shard(
    store: &GatewayStore,
    root: &str,
    shard_bytes: &mut Vec<u8>,
    entries: &mut Vec<(Digest, u64)>,
) -> Result<()> {
    let data = std::mem::take(shard_bytes);
    let entries = std::mem::take(entries);
    let shard = ShardId::of(&data);

    store.put(&keys::shard(&shard), Bytes::from(data)).await?;
    store
        .put(
            &keys::shard_index(&shard),
            Bytes::from(format::encode_shard_index(&entries)),
        )
        .await?;
    store
        .put(&keys::catalog_marker(root, &shard), Bytes::new())
        .await?;

    info!(shard = %shard, entries = entries.len(), "Shard written");
    Ok(())
}
