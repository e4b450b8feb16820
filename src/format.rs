//! Wire formats shared by the rollup pipeline and the retrieval path.
//!
//! All variable-width integers are unsigned LEB128. Layouts:
//!
//! ```text
//! per-shard index   : varint(entry_count)
//!                     entry_count × [ multihash digest | varint(offset) ]
//!                     (entries sorted by digest bytes)
//!
//! rollup artifact   : varint(FORMAT_TAG) | varint(shard_count)
//!                     shard_count × [ shard hash (32 bytes) | raw index bytes ]
//!                     (shard sections in catalog enumeration order)
//!
//! object manifest   : varint(block_count)
//!                     block_count × [ multihash digest ]
//!                     (blocks in object byte order)
//! ```

use crate::digest::{Digest, ShardId};
use crate::error::{GatewayError, Result};

/// Format tag opening every rollup artifact.
pub const FORMAT_TAG: u64 = 0x0ca7;

/// Sanity cap on declared entry/block counts while decoding.
const MAX_DECLARED_COUNT: u64 = 1 << 32;

// ─────────────────────────────── varints ─────────────────────────────────────

/// Append `v` as unsigned LEB128.
pub fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Decode one varint from the front of `buf`.
///
/// `Ok(None)` means the buffer ends mid-varint (feed more bytes);
/// a varint longer than 10 bytes is malformed input.
pub fn read_varint(buf: &[u8]) -> Result<Option<(u64, usize)>> {
    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= 10 {
            return Err(GatewayError::format("varint", "exceeds 10 bytes"));
        }
        if i == 9 && byte > 0x01 {
            return Err(GatewayError::format("varint", "overflows u64"));
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Ok(None)
}

// ─────────────────────────────── per-shard index ─────────────────────────────

/// Encode a per-shard index. Entries are sorted by digest bytes, matching
/// the externally defined format produced by ingestion.
pub fn encode_shard_index(entries: &[(Digest, u64)]) -> Vec<u8> {
    let mut sorted: Vec<&(Digest, u64)> = entries.iter().collect();
    sorted.sort_by(|a, b| a.0.hash_bytes().cmp(b.0.hash_bytes()));

    let mut out = Vec::new();
    write_varint(&mut out, entries.len() as u64);
    for (digest, offset) in sorted {
        digest.write_to(&mut out);
        write_varint(&mut out, *offset);
    }
    out
}

/// Decode a complete per-shard index object into `(digest, offset)` entries.
pub fn decode_shard_index(buf: &[u8]) -> Result<Vec<(Digest, u64)>> {
    let (count, mut pos) = read_varint(buf)?
        .ok_or_else(|| GatewayError::format("shard index", "truncated entry count"))?;
    if count > MAX_DECLARED_COUNT {
        return Err(GatewayError::format(
            "shard index",
            format!("implausible entry count {count}"),
        ));
    }

    let mut entries = Vec::with_capacity(count as usize);
    for i in 0..count {
        let (digest, n) = Digest::read_from(&buf[pos..])?.ok_or_else(|| {
            GatewayError::format("shard index", format!("truncated digest at entry {i}"))
        })?;
        pos += n;
        let (offset, n) = read_varint(&buf[pos..])?.ok_or_else(|| {
            GatewayError::format("shard index", format!("truncated offset at entry {i}"))
        })?;
        pos += n;
        entries.push((digest, offset));
    }
    if pos != buf.len() {
        return Err(GatewayError::format(
            "shard index",
            format!("{} trailing bytes after {count} entries", buf.len() - pos),
        ));
    }
    Ok(entries)
}

// ─────────────────────────────── rollup header ───────────────────────────────

/// Encode the artifact header: format tag + shard count.
pub fn encode_rollup_header(shard_count: usize) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint(&mut out, FORMAT_TAG);
    write_varint(&mut out, shard_count as u64);
    out
}

/// Decode a complete rollup artifact into per-shard entry lists, in the
/// order sections were written. The request path uses this to build its
/// block map; [`crate::rollup::verifier`] decodes the same layout
/// incrementally instead.
pub fn decode_artifact(buf: &[u8]) -> Result<Vec<(ShardId, Vec<(Digest, u64)>)>> {
    let (tag, mut pos) = read_varint(buf)?
        .ok_or_else(|| GatewayError::format("rollup artifact", "truncated format tag"))?;
    if tag != FORMAT_TAG {
        return Err(GatewayError::format(
            "rollup artifact",
            format!("unknown format tag {tag:#x}"),
        ));
    }
    let (shard_count, n) = read_varint(&buf[pos..])?
        .ok_or_else(|| GatewayError::format("rollup artifact", "truncated shard count"))?;
    pos += n;
    if shard_count > MAX_DECLARED_COUNT {
        return Err(GatewayError::format(
            "rollup artifact",
            format!("implausible shard count {shard_count}"),
        ));
    }

    let mut sections = Vec::with_capacity(shard_count as usize);
    for s in 0..shard_count {
        if buf.len() < pos + SHARD_HASH_LEN {
            return Err(GatewayError::format(
                "rollup artifact",
                format!("truncated shard hash in section {s}"),
            ));
        }
        let mut hash = [0u8; SHARD_HASH_LEN];
        hash.copy_from_slice(&buf[pos..pos + SHARD_HASH_LEN]);
        pos += SHARD_HASH_LEN;

        let (count, n) = read_varint(&buf[pos..])?.ok_or_else(|| {
            GatewayError::format("rollup artifact", format!("truncated entry count in section {s}"))
        })?;
        pos += n;
        let mut entries = Vec::with_capacity(count as usize);
        for i in 0..count {
            let (digest, n) = Digest::read_from(&buf[pos..])?.ok_or_else(|| {
                GatewayError::format(
                    "rollup artifact",
                    format!("truncated digest at entry {i} of section {s}"),
                )
            })?;
            pos += n;
            let (offset, n) = read_varint(&buf[pos..])?.ok_or_else(|| {
                GatewayError::format(
                    "rollup artifact",
                    format!("truncated offset at entry {i} of section {s}"),
                )
            })?;
            pos += n;
            entries.push((digest, offset));
        }
        sections.push((ShardId::from_bytes(hash), entries));
    }
    if pos != buf.len() {
        return Err(GatewayError::format(
            "rollup artifact",
            format!("{} trailing bytes after {shard_count} sections", buf.len() - pos),
        ));
    }
    Ok(sections)
}

// ─────────────────────────────── object manifest ─────────────────────────────

/// Encode an object manifest: ordered block digests.
pub fn encode_manifest(blocks: &[Digest]) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint(&mut out, blocks.len() as u64);
    for digest in blocks {
        digest.write_to(&mut out);
    }
    out
}

/// Decode an object manifest.
pub fn decode_manifest(buf: &[u8]) -> Result<Vec<Digest>> {
    let (count, mut pos) = read_varint(buf)?
        .ok_or_else(|| GatewayError::format("manifest", "truncated block count"))?;
    if count > MAX_DECLARED_COUNT {
        return Err(GatewayError::format(
            "manifest",
            format!("implausible block count {count}"),
        ));
    }

    let mut blocks = Vec::with_capacity(count as usize);
    for i in 0..count {
        let (digest, n) = Digest::read_from(&buf[pos..])?.ok_or_else(|| {
            GatewayError::format("manifest", format!("truncated digest at block {i}"))
        })?;
        pos += n;
        blocks.push(digest);
    }
    if pos != buf.len() {
        return Err(GatewayError::format(
            "manifest",
            format!("{} trailing bytes after {count} blocks", buf.len() - pos),
        ));
    }
    Ok(blocks)
}

// `ShardId` is written raw (fixed width); re-exported here so format users
// do not need to reach into `digest` for the section framing width.
pub const SHARD_HASH_LEN: usize = ShardId::LEN;
