//! Gateway configuration, read entirely from `CASGW_*` environment variables.
//!
//! The operator CLI and the serving process share one [`Config`]; every knob
//! has a validated default except the store location, which is required.

use std::path::PathBuf;

use serde::Serialize;

use crate::admission::MemoryLimits;
use crate::error::{GatewayError, Result};

/// Where blobs live. Selected by environment: `CASGW_S3_BUCKET` wins over
/// `CASGW_DATA_DIR`; one of the two must be set.
#[derive(Debug, Clone, Serialize)]
pub enum StoreConfig {
    Local { data_dir: PathBuf },
    S3 { bucket: String },
}

/// Range-chunk cache parameters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheConfig {
    /// Fixed chunk size in bytes (cache granularity for range requests).
    pub chunk_size: u64,
    /// Chunk time-to-live in seconds. Expiry is the only removal mechanism.
    pub ttl_secs: i64,
    /// Advisory ceiling on cached chunks per resource. Logged when exceeded,
    /// never enforced by eviction.
    pub max_chunks_per_resource: u64,
}

/// HTTP API parameters.
#[derive(Debug, Clone, Serialize)]
pub struct ApiConfig {
    pub port: u16,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub memory: MemoryLimits,
    pub api: ApiConfig,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env_var(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| GatewayError::Config(format!("{name}='{raw}' is not a valid value"))),
    }
}

impl Config {
    /// Load and validate configuration from the environment.
    ///
    /// Fails before any I/O, naming the offending variable.
    pub fn from_env() -> Result<Self> {
        let store = match (env_var("CASGW_S3_BUCKET"), env_var("CASGW_DATA_DIR")) {
            (Some(bucket), _) => StoreConfig::S3 { bucket },
            (None, Some(dir)) => StoreConfig::Local {
                data_dir: PathBuf::from(dir),
            },
            (None, None) => {
                return Err(GatewayError::Config(
                    "CASGW_DATA_DIR or CASGW_S3_BUCKET must be set".into(),
                ));
            }
        };

        let config = Config {
            store,
            cache: CacheConfig {
                chunk_size: env_parse("CASGW_CHUNK_SIZE_BYTES", 1024 * 1024)?,
                ttl_secs: env_parse("CASGW_CHUNK_TTL_SECS", 3600)?,
                max_chunks_per_resource: env_parse("CASGW_MAX_CHUNKS_PER_RESOURCE", 4096)?,
            },
            memory: MemoryLimits {
                max_block_size: env_parse("CASGW_MAX_BLOCK_SIZE", 2 * 1024 * 1024)?,
                max_batch_size: env_parse("CASGW_MAX_BATCH_SIZE", 32 * 1024 * 1024)?,
                max_concurrent_blocks: env_parse("CASGW_MAX_CONCURRENT_BLOCKS", 8)?,
                throttle_ratio: env_parse("CASGW_THROTTLE_RATIO", 0.8)?,
            },
            api: ApiConfig {
                port: env_parse("CASGW_PORT", 8080)?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.cache.chunk_size == 0 {
            return Err(GatewayError::Config("CASGW_CHUNK_SIZE_BYTES must be > 0".into()));
        }
        if self.cache.ttl_secs <= 0 {
            return Err(GatewayError::Config("CASGW_CHUNK_TTL_SECS must be > 0".into()));
        }
        if self.memory.max_block_size == 0 {
            return Err(GatewayError::Config("CASGW_MAX_BLOCK_SIZE must be > 0".into()));
        }
        if self.memory.max_block_size > self.memory.max_batch_size {
            return Err(GatewayError::Config(
                "CASGW_MAX_BLOCK_SIZE must not exceed CASGW_MAX_BATCH_SIZE".into(),
            ));
        }
        if self.memory.max_concurrent_blocks == 0 {
            return Err(GatewayError::Config(
                "CASGW_MAX_CONCURRENT_BLOCKS must be > 0".into(),
            ));
        }
        if !(self.memory.throttle_ratio > 0.0 && self.memory.throttle_ratio <= 1.0) {
            return Err(GatewayError::Config(
                "CASGW_THROTTLE_RATIO must be in (0.0, 1.0]".into(),
            ));
        }
        Ok(())
    }
}
