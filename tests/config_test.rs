//! Environment configuration tests. Env vars are process-global, so all
//! scenarios run inside one test, sequentially, with a clean slate between.

use casgw::config::{Config, StoreConfig};
use casgw::error::GatewayError;

const VARS: &[&str] = &[
    "CASGW_DATA_DIR",
    "CASGW_S3_BUCKET",
    "CASGW_CHUNK_SIZE_BYTES",
    "CASGW_CHUNK_TTL_SECS",
    "CASGW_MAX_CHUNKS_PER_RESOURCE",
    "CASGW_MAX_BLOCK_SIZE",
    "CASGW_MAX_BATCH_SIZE",
    "CASGW_MAX_CONCURRENT_BLOCKS",
    "CASGW_THROTTLE_RATIO",
    "CASGW_PORT",
];

fn reset_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

fn expect_config_error_naming(var: &str) {
    match Config::from_env() {
        Err(GatewayError::Config(msg)) => {
            assert!(msg.contains(var), "error '{msg}' does not name {var}");
        }
        other => panic!("expected config error naming {var}, got {other:?}"),
    }
}

#[test]
fn from_env_scenarios() {
    // No store location at all.
    reset_env();
    expect_config_error_naming("CASGW_DATA_DIR");

    // Defaults apply once a store is configured.
    reset_env();
    std::env::set_var("CASGW_DATA_DIR", "/tmp/casgw-test");
    let config = Config::from_env().expect("defaults must validate");
    assert!(matches!(config.store, StoreConfig::Local { .. }));
    assert_eq!(config.cache.chunk_size, 1024 * 1024);
    assert_eq!(config.cache.ttl_secs, 3600);
    assert_eq!(config.memory.max_block_size, 2 * 1024 * 1024);
    assert_eq!(config.memory.max_concurrent_blocks, 8);
    assert_eq!(config.api.port, 8080);

    // Bucket takes precedence over the local directory.
    std::env::set_var("CASGW_S3_BUCKET", "casgw-bucket");
    let config = Config::from_env().expect("bucket config must validate");
    assert!(matches!(config.store, StoreConfig::S3 { .. }));

    // Unparsable value names the variable.
    reset_env();
    std::env::set_var("CASGW_DATA_DIR", "/tmp/casgw-test");
    std::env::set_var("CASGW_CHUNK_SIZE_BYTES", "one-mebibyte");
    expect_config_error_naming("CASGW_CHUNK_SIZE_BYTES");

    // Out-of-range values name the variable too.
    reset_env();
    std::env::set_var("CASGW_DATA_DIR", "/tmp/casgw-test");
    std::env::set_var("CASGW_THROTTLE_RATIO", "0");
    expect_config_error_naming("CASGW_THROTTLE_RATIO");

    reset_env();
    std::env::set_var("CASGW_DATA_DIR", "/tmp/casgw-test");
    std::env::set_var("CASGW_MAX_BLOCK_SIZE", "64");
    std::env::set_var("CASGW_MAX_BATCH_SIZE", "32");
    expect_config_error_naming("CASGW_MAX_BLOCK_SIZE");

    reset_env();
}
