//! Rollup construction: stream every per-shard index for a root into one
//! consolidated artifact.
//!
//! The builder never re-sorts or transforms index bytes — each section is
//! the shard's identifying hash followed by its index object verbatim, in
//! catalog enumeration order. Fetching the next shard's index overlaps the
//! upload of the previous one, so peak memory stays near one index object
//! regardless of shard count.
//!
//! Failure is total: a missing shard, a failed index read, or a failed
//! write aborts the multipart upload and leaves no partial artifact behind.

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::ShardCatalog;
use crate::digest::ShardId;
use crate::error::{GatewayError, Result};
use crate::format;
use crate::store::{keys, GatewayStore};

/// Outcome of a successful build.
#[derive(Debug)]
pub struct RollupInfo {
    /// Store key the artifact was written under.
    pub key: String,
    /// Number of shard sections written.
    pub shards: usize,
}

/// Build the rollup artifact for `root` and persist it at a key derived
/// from the root. Entry and unique-block counts are obtained by running the
/// verifier over the finished artifact.
pub async fn build(
    root: &str,
    catalog: &dyn ShardCatalog,
    store: &GatewayStore,
) -> Result<RollupInfo> {
    let shards = catalog.shards_for_root(root).await?;
    if shards.is_empty() {
        return Err(GatewayError::NotFound(format!(
            "no shards cataloged for root '{root}'"
        )));
    }

    // Existence pre-pass: every shard's raw bytes must be present before a
    // single byte of the artifact is written.
    for shard in &shards {
        if !store.exists(&keys::shard(shard)).await? {
            return Err(GatewayError::ShardNotFound {
                shard: shard.to_hex(),
            });
        }
    }

    let key = keys::rollup(root);
    let mut upload = store.put_multipart(&key).await?;

    match write_sections(store, &shards, upload.as_mut()).await {
        Ok(()) => {
            upload.complete().await?;
        }
        Err(e) => {
            if let Err(abort_err) = upload.abort().await {
                warn!(error = %abort_err, key, "Failed to abort rollup upload");
            }
            return Err(e);
        }
    }

    info!(root, shards = shards.len(), key, "Rollup artifact written");
    Ok(RollupInfo {
        key,
        shards: shards.len(),
    })
}

async fn write_sections(
    store: &GatewayStore,
    shards: &[ShardId],
    upload: &mut dyn object_store::MultipartUpload,
) -> Result<()> {
    // One-ahead prefetch: the fetch of shard i+1 runs while section i is
    // being uploaded.
    let mut pending: Option<JoinHandle<Result<Bytes>>> = Some(spawn_index_fetch(store, shards[0]));

    for (i, shard) in shards.iter().enumerate() {
        // Always Some while shards remain: refilled below for every shard
        // except the last.
        let Some(handle) = pending.take() else { break };
        let index_bytes = handle
            .await
            .map_err(|e| GatewayError::Io(std::io::Error::other(e)))??;
        if let Some(next) = shards.get(i + 1) {
            pending = Some(spawn_index_fetch(store, *next));
        }

        let mut section = if i == 0 {
            format::encode_rollup_header(shards.len())
        } else {
            Vec::new()
        };
        section.reserve(format::SHARD_HASH_LEN + index_bytes.len());
        section.extend_from_slice(shard.as_bytes());
        section.extend_from_slice(&index_bytes);

        debug!(shard = %shard, bytes = section.len(), "Rollup section staged");
        upload.put_part(Bytes::from(section).into()).await?;
    }
    Ok(())
}

fn spawn_index_fetch(store: &GatewayStore, shard: ShardId) -> JoinHandle<Result<Bytes>> {
    let store = store.clone();
    tokio::spawn(async move {
        store
            .get(&keys::shard_index(&shard))
            .await
            .map_err(|e| match e {
                // A shard without its index object counts as missing.
                GatewayError::NotFound(_) => GatewayError::ShardNotFound {
                    shard: shard.to_hex(),
                },
                other => other,
            })
    })
}
