//! Range-chunk cache: byte-range responses assembled from fixed-size
//! chunks cached in the blob store.
//!
//! Chunk entry layout (key `cache/{resource}/{index:08}`):
//!
//! ```text
//! expires_at : i64 (unix seconds, LE)
//! data       : chunk bytes
//! ```
//!
//! Chunks are content-addressed — a key's data never changes — so the only
//! freshness concern is the TTL stamp, and concurrent populators can race
//! without coordination. There is no eviction: expiry alone bounds growth,
//! and the per-resource chunk ceiling is advisory.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::{GatewayError, Result};
use crate::store::{keys, GatewayStore};

/// One parsed `Range: bytes=` sub-range, before clamping against the
/// resource size. `start == None` encodes a suffix range (`bytes=-N`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl ByteRange {
    /// Clamp against the resource size, yielding inclusive `[start, end]`.
    /// A start at or past the end of the resource is unsatisfiable.
    pub fn resolve(&self, total: u64) -> Result<(u64, u64)> {
        let (start, end) = match (self.start, self.end) {
            (Some(start), end) => (start, end.unwrap_or(total.saturating_sub(1)).min(total.saturating_sub(1))),
            // Suffix range: the last `n` bytes.
            (None, Some(n)) => {
                if n == 0 {
                    return Err(GatewayError::Range("zero-length suffix range".into()));
                }
                (total.saturating_sub(n), total.saturating_sub(1))
            }
            (None, None) => return Err(GatewayError::Range("empty range".into())),
        };
        if total == 0 || start >= total {
            return Err(GatewayError::Range(format!(
                "start {start} is past resource size {total}"
            )));
        }
        if start > end {
            return Err(GatewayError::Range(format!("start {start} > end {end}")));
        }
        Ok((start, end))
    }
}

/// Parse a `Range` header value.
///
/// Returns `Ok(None)` for non-byte units — those requests bypass the cache
/// entirely. A `bytes=` spec that cannot be parsed is a [`GatewayError::Range`]
/// (surfaced as 416). Only the first sub-range of a multi-range header is
/// honored; multipart bodies are not supported here.
pub fn parse_range_header(value: &str) -> Result<Option<ByteRange>> {
    let value = value.trim();
    let Some(spec) = value.strip_prefix("bytes=") else {
        return Ok(None);
    };
    let first = spec.split(',').next().unwrap_or("").trim();
    if first.is_empty() {
        return Err(GatewayError::Range(format!("empty range spec in '{value}'")));
    }

    let (start_str, end_str) = first.split_once('-').ok_or_else(|| {
        GatewayError::Range(format!("missing '-' in range spec '{first}'"))
    })?;
    let parse = |s: &str| -> Result<u64> {
        s.parse()
            .map_err(|_| GatewayError::Range(format!("invalid bound '{s}' in '{value}'")))
    };

    let range = match (start_str.is_empty(), end_str.is_empty()) {
        (true, true) => return Err(GatewayError::Range(format!("empty bounds in '{value}'"))),
        // "-n": suffix range.
        (true, false) => ByteRange {
            start: None,
            end: Some(parse(end_str)?),
        },
        // "a-": to end of resource.
        (false, true) => ByteRange {
            start: Some(parse(start_str)?),
            end: None,
        },
        (false, false) => {
            let (start, end) = (parse(start_str)?, parse(end_str)?);
            if start > end {
                return Err(GatewayError::Range(format!("start > end in '{first}'")));
            }
            ByteRange {
                start: Some(start),
                end: Some(end),
            }
        }
    };
    Ok(Some(range))
}

/// A served sub-range, with everything needed for a `Content-Range` header.
#[derive(Debug)]
pub struct RangeSlice {
    pub bytes: Bytes,
    pub start: u64,
    pub end: u64,
    pub total: u64,
    /// Whether every required chunk came from the cache.
    pub cache_hit: bool,
}

/// Serves byte ranges from TTL-bounded fixed-size chunks, falling back to a
/// full fetch and populating the missing chunks behind the response.
#[derive(Clone)]
pub struct RangeChunkCache {
    store: GatewayStore,
    chunk_size: u64,
    ttl_secs: i64,
    max_chunks_per_resource: u64,
}

impl RangeChunkCache {
    pub fn new(store: GatewayStore, config: &CacheConfig) -> Self {
        RangeChunkCache {
            store,
            chunk_size: config.chunk_size,
            ttl_secs: config.ttl_secs,
            max_chunks_per_resource: config.max_chunks_per_resource,
        }
    }

    /// Serve `range` for `resource`, whose full size is `total`.
    ///
    /// On a full cache hit the sub-range is assembled from chunks and
    /// `fetch_full` is never invoked. Otherwise the full payload is fetched,
    /// the response slice returned immediately, and exactly the missing
    /// chunks are populated by detached best-effort tasks.
    pub async fn serve<F, Fut>(
        &self,
        resource: &str,
        range: &ByteRange,
        total: u64,
        fetch_full: F,
    ) -> Result<RangeSlice>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Bytes>>,
    {
        let (start, end) = range.resolve(total)?;
        let first_chunk = start / self.chunk_size;
        let last_chunk = end / self.chunk_size;

        if last_chunk + 1 > self.max_chunks_per_resource {
            warn!(
                resource,
                chunks = last_chunk + 1,
                advisory_max = self.max_chunks_per_resource,
                "Resource exceeds advisory chunk ceiling"
            );
        }

        let lookups = (first_chunk..=last_chunk).map(|i| self.read_chunk(resource, i));
        let found: Vec<Option<Bytes>> = join_all(lookups).await;

        if found.iter().all(Option::is_some) {
            debug!(resource, start, end, chunks = found.len(), "Range served from cache");
            let chunks: Vec<&Bytes> = found.iter().flatten().collect();
            let bytes = self.assemble(&chunks, first_chunk, start, end)?;
            return Ok(RangeSlice {
                bytes,
                start,
                end,
                total,
                cache_hit: true,
            });
        }

        let payload = fetch_full().await?;
        if (payload.len() as u64) < end + 1 {
            return Err(GatewayError::format(
                "resource payload",
                format!("fetched {} bytes, range ends at {end}", payload.len()),
            ));
        }
        let slice = payload.slice(start as usize..(end + 1) as usize);

        // Populate exactly the chunks that were missing, concurrently and
        // detached: the response does not wait, and the tasks are abandoned
        // if the runtime goes away first. Cache warming is best-effort.
        for (i, entry) in found.iter().enumerate() {
            if entry.is_some() {
                continue;
            }
            let index = first_chunk + i as u64;
            let chunk_start = index * self.chunk_size;
            let chunk_end = (chunk_start + self.chunk_size).min(payload.len() as u64);
            if chunk_start >= chunk_end {
                continue;
            }
            let data = payload.slice(chunk_start as usize..chunk_end as usize);
            let store = self.store.clone();
            let key = keys::chunk(resource, index);
            let expires_at = Utc::now().timestamp() + self.ttl_secs;
            tokio::spawn(async move {
                let mut entry = Vec::with_capacity(8 + data.len());
                // Envelope write into a Vec cannot fail.
                entry.write_i64::<LittleEndian>(expires_at).ok();
                entry.extend_from_slice(&data);
                match store.put(&key, Bytes::from(entry)).await {
                    Ok(()) => debug!(key, bytes = data.len(), "Chunk populated"),
                    Err(e) => warn!(key, error = %e, "Chunk population failed"),
                }
            });
        }

        Ok(RangeSlice {
            bytes: slice,
            start,
            end,
            total,
            cache_hit: false,
        })
    }

    /// Read one chunk, treating absence, expiry, and any read/decode
    /// problem as a miss — the cache is an optimization, never a
    /// correctness dependency.
    async fn read_chunk(&self, resource: &str, index: u64) -> Option<Bytes> {
        let key = keys::chunk(resource, index);
        let raw = match self.store.get(&key).await {
            Ok(raw) => raw,
            Err(GatewayError::NotFound(_)) => return None,
            Err(e) => {
                warn!(key, error = %e, "Chunk read failed, treating as miss");
                return None;
            }
        };
        if raw.len() < 8 {
            warn!(key, "Chunk entry too short, treating as miss");
            return None;
        }
        let expires_at = Cursor::new(&raw[..8]).read_i64::<LittleEndian>().ok()?;
        if Utc::now().timestamp() >= expires_at {
            debug!(key, "Chunk expired");
            return None;
        }
        Some(raw.slice(8..))
    }

    /// Concatenate the overlap of each chunk with `[start, end]`.
    fn assemble(&self, chunks: &[&Bytes], first_chunk: u64, start: u64, end: u64) -> Result<Bytes> {
        let mut out = Vec::with_capacity((end - start + 1) as usize);
        for (i, chunk) in chunks.iter().enumerate() {
            let chunk_start = (first_chunk + i as u64) * self.chunk_size;
            let lo = start.max(chunk_start) - chunk_start;
            let hi = (end + 1 - chunk_start).min(chunk.len() as u64);
            if lo >= hi {
                return Err(GatewayError::format(
                    "chunk cache",
                    format!("cached chunk {} shorter than requested range", first_chunk + i as u64),
                ));
            }
            out.extend_from_slice(&chunk[lo as usize..hi as usize]);
        }
        if out.len() as u64 != end - start + 1 {
            return Err(GatewayError::format(
                "chunk cache",
                format!(
                    "assembled {} bytes for a {}-byte range",
                    out.len(),
                    end - start + 1
                ),
            ));
        }
        Ok(Bytes::from(out))
    }
}
