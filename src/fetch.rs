//! Block retrieval path: rollup-backed location resolution, ranged shard
//! reads, and the admission-control decorator around them.
//!
//! Retrieval never touches the live shard catalog — the [`BlockMap`] built
//! from the rollup artifact is the only lookup structure, so requests keep
//! working when the catalog listing is unavailable.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::try_join_all;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};

use crate::admission::{BudgetPermit, MemoryAdmission};
use crate::digest::{Digest, ShardId};
use crate::error::{GatewayError, Result};
use crate::format;
use crate::store::{keys, GatewayStore};

/// Physical location of one block's bytes.
#[derive(Debug, Clone)]
pub struct BlockLocation {
    pub shard: ShardId,
    pub offset: u64,
    pub length: u64,
}

/// Digest → location lookup built from a root's rollup artifact.
///
/// Index entries carry `(digest, offset)`; a block's extent runs to the next
/// offset in the same shard (or the shard's end), so lengths are derived
/// from the sorted offsets plus one size lookup per shard.
pub struct BlockMap {
    locations: HashMap<Digest, BlockLocation>,
    shard_count: usize,
}

impl BlockMap {
    pub async fn load(store: &GatewayStore, root: &str) -> Result<Self> {
        let artifact = store.get(&keys::rollup(root)).await.map_err(|e| match e {
            GatewayError::NotFound(_) => {
                GatewayError::NotFound(format!("rollup artifact for root '{root}'"))
            }
            other => other,
        })?;
        let sections = format::decode_artifact(&artifact)?;

        let sizes = try_join_all(sections.iter().map(|(shard, _)| {
            let key = keys::shard(shard);
            async move { store.size(&key).await }
        }))
        .await?;

        let shard_count = sections.len();
        let mut locations = HashMap::new();
        for ((shard, entries), shard_size) in sections.into_iter().zip(sizes) {
            let mut offsets: Vec<u64> = entries.iter().map(|(_, off)| *off).collect();
            offsets.sort_unstable();
            if offsets.last().is_some_and(|&max| max >= shard_size) {
                return Err(GatewayError::format(
                    "rollup artifact",
                    format!("index offset past end of shard {shard}"),
                ));
            }
            offsets.push(shard_size);

            for (digest, offset) in entries {
                // All offsets are < shard_size, so the partition point always
                // lands on a real element (at worst the shard_size sentinel).
                let next = offsets[offsets.partition_point(|&o| o <= offset)];
                // First shard wins when a digest repeats across shards.
                locations.entry(digest).or_insert(BlockLocation {
                    shard,
                    offset,
                    length: next - offset,
                });
            }
        }

        Ok(BlockMap {
            locations,
            shard_count,
        })
    }

    /// `locate(digest) -> (shard, offset, length)`.
    pub fn locate(&self, digest: &Digest) -> Option<&BlockLocation> {
        self.locations.get(digest)
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    pub fn block_count(&self) -> usize {
        self.locations.len()
    }
}

/// Ordered block digests making up one object's bytes.
pub struct ObjectManifest {
    blocks: Vec<Digest>,
}

impl ObjectManifest {
    pub async fn load(store: &GatewayStore, root: &str) -> Result<Self> {
        let raw = store.get(&keys::manifest(root)).await.map_err(|e| match e {
            GatewayError::NotFound(_) => {
                GatewayError::NotFound(format!("manifest for root '{root}'"))
            }
            other => other,
        })?;
        Ok(ObjectManifest {
            blocks: format::decode_manifest(&raw)?,
        })
    }

    pub fn blocks(&self) -> &[Digest] {
        &self.blocks
    }
}

/// One retrieved block. When the read went through admission control the
/// block carries its budget permit; dropping the block releases the memory
/// commitment.
pub struct Block {
    bytes: Bytes,
    _permit: Option<BudgetPermit>,
}

impl Block {
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Byte stream of one block. Admitted streams track each chunk as it
/// arrives and release the running total when the stream is dropped, so
/// early termination cannot leak budget.
pub struct BlockStream {
    inner: BoxStream<'static, Result<Bytes>>,
    budget: Option<(Arc<MemoryAdmission>, String)>,
    tracked: u64,
}

impl BlockStream {
    fn plain(inner: BoxStream<'static, Result<Bytes>>) -> Self {
        BlockStream {
            inner,
            budget: None,
            tracked: 0,
        }
    }
}

impl Stream for BlockStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if let Some((admission, id)) = &this.budget {
                    if !chunk.is_empty() {
                        if let Err(e) = admission.track(id, chunk.len() as u64) {
                            return Poll::Ready(Some(Err(e)));
                        }
                        this.tracked += chunk.len() as u64;
                    }
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

impl Drop for BlockStream {
    fn drop(&mut self) {
        if let Some((admission, id)) = &self.budget {
            if self.tracked > 0 {
                admission.release(id, self.tracked);
            }
        }
    }
}

/// The block-read capability the gateway composes over: whole-block get,
/// chunked stream, and a size probe used to budget reads up front.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn size_of(&self, digest: &Digest) -> Result<u64>;
    async fn get(&self, digest: &Digest) -> Result<Block>;
    async fn stream(&self, digest: &Digest) -> Result<BlockStream>;
}

/// Reads blocks out of shards via ranged store requests, resolved through
/// the rollup-derived [`BlockMap`].
pub struct ShardBlockSource {
    store: GatewayStore,
    map: Arc<BlockMap>,
}

impl ShardBlockSource {
    pub fn new(store: GatewayStore, map: Arc<BlockMap>) -> Self {
        ShardBlockSource { store, map }
    }

    fn location(&self, digest: &Digest) -> Result<&BlockLocation> {
        self.map.locate(digest).ok_or_else(|| {
            GatewayError::NotFound(format!("block {digest} not present in rollup index"))
        })
    }
}

#[async_trait]
impl BlockSource for ShardBlockSource {
    async fn size_of(&self, digest: &Digest) -> Result<u64> {
        Ok(self.location(digest)?.length)
    }

    async fn get(&self, digest: &Digest) -> Result<Block> {
        let loc = self.location(digest)?.clone();
        let bytes = self
            .store
            .get_range(&keys::shard(&loc.shard), loc.offset, loc.length)
            .await?;
        Ok(Block {
            bytes,
            _permit: None,
        })
    }

    async fn stream(&self, digest: &Digest) -> Result<BlockStream> {
        let loc = self.location(digest)?.clone();
        let inner = self
            .store
            .get_range_stream(&keys::shard(&loc.shard), loc.offset, loc.length)
            .await?;
        Ok(BlockStream::plain(inner))
    }
}

/// Decorator adding budget enforcement to any [`BlockSource`]. Callers use
/// the same read interface as the wrapped source; composition happens once,
/// at request setup.
pub struct AdmittedBlockSource<S> {
    inner: S,
    admission: Arc<MemoryAdmission>,
}

impl<S: BlockSource> AdmittedBlockSource<S> {
    pub fn new(inner: S, admission: Arc<MemoryAdmission>) -> Self {
        AdmittedBlockSource { inner, admission }
    }
}

#[async_trait]
impl<S: BlockSource> BlockSource for AdmittedBlockSource<S> {
    async fn size_of(&self, digest: &Digest) -> Result<u64> {
        self.inner.size_of(digest).await
    }

    async fn get(&self, digest: &Digest) -> Result<Block> {
        let size = self.inner.size_of(digest).await?;
        let permit = self.admission.admit(&digest.to_hex(), size)?;
        let block = self.inner.get(digest).await?;
        Ok(Block {
            bytes: block.bytes,
            _permit: Some(permit),
        })
    }

    async fn stream(&self, digest: &Digest) -> Result<BlockStream> {
        let inner = self.inner.stream(digest).await?;
        Ok(BlockStream {
            inner: inner.boxed(),
            budget: Some((Arc::clone(&self.admission), digest.to_hex())),
            tracked: 0,
        })
    }
}

/// Manifest-ordered object assembly over a block source.
#[derive(Clone)]
pub struct ObjectFetcher {
    manifest: Arc<ObjectManifest>,
    map: Arc<BlockMap>,
    source: Arc<dyn BlockSource>,
    fetch_width: usize,
}

impl ObjectFetcher {
    pub fn new(
        manifest: Arc<ObjectManifest>,
        map: Arc<BlockMap>,
        source: Arc<dyn BlockSource>,
        fetch_width: usize,
    ) -> Self {
        ObjectFetcher {
            manifest,
            map,
            source,
            fetch_width: fetch_width.max(1),
        }
    }

    /// Total object size, from block locations alone (no data reads).
    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0u64;
        for digest in self.manifest.blocks() {
            let loc = self.map.locate(digest).ok_or_else(|| {
                GatewayError::NotFound(format!("block {digest} not present in rollup index"))
            })?;
            total += loc.length;
        }
        Ok(total)
    }

    /// Fetch the whole object, preserving manifest order, reading up to
    /// `fetch_width` blocks concurrently. Each block's budget is released as
    /// soon as its bytes are appended to the output.
    pub async fn fetch_full(&self) -> Result<Bytes> {
        let source = Arc::clone(&self.source);
        let blocks: Vec<Digest> = self.manifest.blocks().to_vec();

        let mut out = Vec::with_capacity(self.total_size()? as usize);
        let mut fetched = futures::stream::iter(blocks.into_iter().map(|digest| {
            let source = Arc::clone(&source);
            async move { source.get(&digest).await }
        }))
        .buffered(self.fetch_width)
        .boxed();

        while let Some(block) = fetched.try_next().await? {
            out.extend_from_slice(block.bytes());
        }
        Ok(Bytes::from(out))
    }

    /// Stream the whole object block by block, for full (non-range)
    /// responses. Budget for each block is released as its stream completes.
    pub fn fetch_stream(&self) -> BoxStream<'static, Result<Bytes>> {
        let source = Arc::clone(&self.source);
        let blocks: Vec<Digest> = self.manifest.blocks().to_vec();

        Box::pin(async_stream::try_stream! {
            for digest in blocks {
                let mut block = source.stream(&digest).await?;
                while let Some(chunk) = block.try_next().await? {
                    yield chunk;
                }
            }
        })
    }

    pub fn block_count(&self) -> usize {
        self.manifest.blocks().len()
    }

    pub fn shard_count(&self) -> usize {
        self.map.shard_count()
    }
}
