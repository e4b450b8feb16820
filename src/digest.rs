//! Content identifiers: fixed-width shard hashes and multihash block digests.
//!
//! A [`ShardId`] is the sha2-256 of a shard's raw bytes, always 32 bytes,
//! written without framing ("fixed width") in the rollup artifact. A
//! [`Digest`] is multihash-framed — `varint(code) ++ varint(size) ++ bytes` —
//! and therefore self-delimiting inside index streams.

use std::fmt;

use sha2::{Digest as _, Sha256};

use crate::error::{GatewayError, Result};
use crate::format;

/// Multicodec code for sha2-256.
pub const SHA2_256_CODE: u64 = 0x12;

/// Upper bound on an accepted multihash body. Anything larger is treated as
/// corrupt input rather than an allocation request.
const MAX_DIGEST_SIZE: u64 = 128;

/// Fixed-width (32-byte) content hash identifying one immutable shard.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardId([u8; 32]);

impl ShardId {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        ShardId(bytes)
    }

    /// Hash `data` to produce its shard identifier.
    pub fn of(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        ShardId(hash.into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let raw = hex::decode(s)
            .map_err(|e| GatewayError::format("shard id", format!("'{s}': {e}")))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| GatewayError::format("shard id", format!("'{s}': expected 32 bytes")))?;
        Ok(ShardId(bytes))
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShardId({}…)", &self.to_hex()[..8])
    }
}

/// Multihash block digest: typed, length-prefixed cryptographic hash.
///
/// Unique within one shard's index; the same digest may appear in the
/// indexes of several shards.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    code: u64,
    bytes: Vec<u8>,
}

impl Digest {
    /// sha2-256 digest of `data`, multihash-typed.
    pub fn sha2_256(data: &[u8]) -> Self {
        Digest {
            code: SHA2_256_CODE,
            bytes: Sha256::digest(data).to_vec(),
        }
    }

    pub fn code(&self) -> u64 {
        self.code
    }

    pub fn hash_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Append the multihash framing (`varint code ++ varint size ++ bytes`).
    pub fn write_to(&self, out: &mut Vec<u8>) {
        format::write_varint(out, self.code);
        format::write_varint(out, self.bytes.len() as u64);
        out.extend_from_slice(&self.bytes);
    }

    /// Decode one multihash from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete digest
    /// (streaming decoders feed more bytes and retry), or an error when the
    /// framing itself is invalid.
    pub fn read_from(buf: &[u8]) -> Result<Option<(Digest, usize)>> {
        let Some((code, n1)) = format::read_varint(buf)? else {
            return Ok(None);
        };
        let Some((size, n2)) = format::read_varint(&buf[n1..])? else {
            return Ok(None);
        };
        if size > MAX_DIGEST_SIZE {
            return Err(GatewayError::format(
                "digest",
                format!("declared hash size {size} exceeds limit {MAX_DIGEST_SIZE}"),
            ));
        }
        let start = n1 + n2;
        let end = start + size as usize;
        if buf.len() < end {
            return Ok(None);
        }
        let digest = Digest {
            code,
            bytes: buf[start..end].to_vec(),
        };
        Ok(Some((digest, end)))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}-{}", self.code, self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({:02x}-{}…)", self.code, &self.to_hex()[..8.min(self.to_hex().len())])
    }
}
