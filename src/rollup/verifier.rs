//! Rollup verification: stream an artifact back out of the store and check
//! format, completeness, and coverage without materializing it.
//!
//! The decoder works over a growing byte window fed by the store stream;
//! shard sections are consumed as soon as enough bytes arrive, so memory
//! stays bounded by one store chunk plus one partially decoded record.

use std::collections::HashSet;

use bytes::{Buf, BytesMut};
use futures::TryStreamExt;
use tracing::{debug, info};

use crate::digest::{Digest, ShardId};
use crate::error::{GatewayError, Result};
use crate::format;
use crate::store::{keys, GatewayStore};

/// Counts accumulated over a fully decoded artifact.
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub shards_seen: usize,
    pub total_entries: u64,
    pub unique_blocks: usize,
}

/// Stream the artifact for `root` and verify it covers every shard in
/// `expected`. Fails naming the first expected shard absent from the
/// artifact (truncation, corruption, or a stale artifact built before the
/// shard was added).
pub async fn verify(
    root: &str,
    expected: &[ShardId],
    store: &GatewayStore,
) -> Result<VerifyReport> {
    let key = keys::rollup(root);
    let mut stream = store.get_stream(&key).await.map_err(|e| match e {
        GatewayError::NotFound(_) => {
            GatewayError::NotFound(format!("rollup artifact for root '{root}'"))
        }
        other => other,
    })?;

    let mut decoder = Decoder::new();
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.try_next().await? {
        buf.extend_from_slice(&chunk);
        decoder.drain(&mut buf)?;
    }
    decoder.drain(&mut buf)?;
    let report = decoder.finish(&buf)?;

    for shard in expected {
        if !decoder.seen.contains(shard) {
            return Err(GatewayError::ShardNotFound {
                shard: shard.to_hex(),
            });
        }
    }

    info!(
        root,
        shards = report.shards_seen,
        entries = report.total_entries,
        unique = report.unique_blocks,
        "Rollup artifact verified"
    );
    Ok(report)
}

enum State {
    Header,
    /// Next element is a shard hash; `remaining` sections still expected.
    ShardHash { remaining: u64 },
    /// Next element is the entry count of the current section.
    EntryCount { remaining: u64 },
    /// Inside a section: `entries_left` entries, then `remaining` more sections.
    Entry { entries_left: u64, remaining: u64 },
    Done,
}

struct Decoder {
    state: State,
    seen: HashSet<ShardId>,
    digests: HashSet<Digest>,
    total_entries: u64,
}

impl Decoder {
    fn new() -> Self {
        Decoder {
            state: State::Header,
            seen: HashSet::new(),
            digests: HashSet::new(),
            total_entries: 0,
        }
    }

    /// Consume as many complete elements from `buf` as possible.
    fn drain(&mut self, buf: &mut BytesMut) -> Result<()> {
        loop {
            match self.state {
                State::Header => {
                    let Some((tag, n1)) = format::read_varint(&buf[..])? else {
                        return Ok(());
                    };
                    if tag != format::FORMAT_TAG {
                        return Err(GatewayError::format(
                            "rollup artifact",
                            format!("unknown format tag {tag:#x}"),
                        ));
                    }
                    let Some((count, n2)) = format::read_varint(&buf[n1..])? else {
                        return Ok(());
                    };
                    buf.advance(n1 + n2);
                    debug!(shards = count, "Rollup header decoded");
                    self.state = if count == 0 {
                        State::Done
                    } else {
                        State::ShardHash { remaining: count }
                    };
                }
                State::ShardHash { remaining } => {
                    if buf.len() < format::SHARD_HASH_LEN {
                        return Ok(());
                    }
                    let mut hash = [0u8; format::SHARD_HASH_LEN];
                    hash.copy_from_slice(&buf[..format::SHARD_HASH_LEN]);
                    buf.advance(format::SHARD_HASH_LEN);
                    self.seen.insert(ShardId::from_bytes(hash));
                    self.state = State::EntryCount { remaining };
                }
                State::EntryCount { remaining } => {
                    let Some((entries, n)) = format::read_varint(&buf[..])? else {
                        return Ok(());
                    };
                    buf.advance(n);
                    self.state = next_section_state(entries, remaining);
                }
                State::Entry {
                    entries_left,
                    remaining,
                } => {
                    let Some((digest, n1)) = Digest::read_from(&buf[..])? else {
                        return Ok(());
                    };
                    let Some((_offset, n2)) = format::read_varint(&buf[n1..])? else {
                        return Ok(());
                    };
                    buf.advance(n1 + n2);
                    self.digests.insert(digest);
                    self.total_entries += 1;
                    self.state = next_section_state(entries_left - 1, remaining);
                }
                State::Done => return Ok(()),
            }
        }
    }

    /// The stream has ended; the decoder must be in a terminal state with
    /// nothing left over.
    fn finish(&self, buf: &BytesMut) -> Result<VerifyReport> {
        if !matches!(self.state, State::Done) {
            return Err(GatewayError::format("rollup artifact", "truncated stream"));
        }
        if !buf.is_empty() {
            return Err(GatewayError::format(
                "rollup artifact",
                format!("{} trailing bytes after final section", buf.len()),
            ));
        }
        Ok(VerifyReport {
            shards_seen: self.seen.len(),
            total_entries: self.total_entries,
            unique_blocks: self.digests.len(),
        })
    }
}

fn next_section_state(entries_left: u64, remaining_sections: u64) -> State {
    if entries_left > 0 {
        State::Entry {
            entries_left,
            remaining: remaining_sections,
        }
    } else if remaining_sections > 1 {
        State::ShardHash {
            remaining: remaining_sections - 1,
        }
    } else {
        State::Done
    }
}
