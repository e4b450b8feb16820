//! Offline rollup pipeline: consolidate per-shard indexes into one lookup
//! artifact per root, and verify the result against the live catalog.

pub mod builder;
pub mod verifier;

pub use builder::{build, RollupInfo};
pub use verifier::{verify, VerifyReport};
