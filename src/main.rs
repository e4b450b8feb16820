//! casgw — content-addressed storage gateway.
//!
//! Usage:
//!   casgw serve                       # run the HTTP gateway
//!   casgw rollup <root>               # build + verify the rollup artifact
//!   casgw verify <root>               # verify an existing artifact
//!   casgw ingest <file>               # seed the store from a local file
//!
//! All configuration comes from CASGW_* environment variables; at minimum
//! CASGW_DATA_DIR or CASGW_S3_BUCKET must be set.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use casgw::api::{start_server, AppState};
use casgw::catalog::{ShardCatalog, StoreShardCatalog};
use casgw::config::Config;
use casgw::error::Result;
use casgw::store::GatewayStore;
use casgw::{ingest, rollup};

#[derive(Parser)]
#[command(name = "casgw", about = "Content-addressed storage gateway", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway.
    Serve,
    /// Consolidate a root's per-shard indexes into one rollup artifact,
    /// then verify it.
    Rollup {
        /// Root identifier to build the artifact for.
        root: String,
    },
    /// Verify an existing rollup artifact against the live catalog listing.
    Verify {
        /// Root identifier whose artifact to verify.
        root: String,
    },
    /// Seed the store from a local file (development stand-in for the
    /// upstream ingestion pipeline). Prints the resulting root.
    Ingest {
        /// File to ingest.
        file: PathBuf,
        /// Block size in bytes.
        #[arg(long, default_value_t = 256 * 1024)]
        block_size: u64,
        /// Approximate shard capacity in bytes.
        #[arg(long, default_value_t = 8 * 1024 * 1024)]
        shard_capacity: u64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Serve => run_serve().await,
        Command::Rollup { root } => run_rollup(&root).await,
        Command::Verify { root } => run_verify(&root).await,
        Command::Ingest {
            file,
            block_size,
            shard_capacity,
        } => run_ingest(&file, block_size, shard_capacity).await,
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn setup() -> Result<(Config, GatewayStore)> {
    let config = Config::from_env()?;
    let store = GatewayStore::from_config(&config.store)?;
    Ok((config, store))
}

async fn run_serve() -> Result<()> {
    let (config, store) = setup()?;
    let port = config.api.port;
    let state = Arc::new(AppState::new(store, config));
    start_server(state, port).await;
    Ok(())
}

async fn run_rollup(root: &str) -> Result<()> {
    let (_config, store) = setup()?;
    let catalog = StoreShardCatalog::new(store.clone());

    let info = rollup::build(root, &catalog, &store).await?;
    let expected = catalog.shards_for_root(root).await?;
    let report = rollup::verify(root, &expected, &store).await?;

    println!("=== Rollup Summary ===");
    println!("Root         : {root}");
    println!("Artifact     : {}", info.key);
    println!("Shards       : {}", report.shards_seen);
    println!("Total entries: {}", report.total_entries);
    println!("Unique blocks: {}", report.unique_blocks);
    Ok(())
}

async fn run_verify(root: &str) -> Result<()> {
    let (_config, store) = setup()?;
    let catalog = StoreShardCatalog::new(store.clone());

    let expected = catalog.shards_for_root(root).await?;
    let report = rollup::verify(root, &expected, &store).await?;

    println!("=== Verify Summary ===");
    println!("Root         : {root}");
    println!("Shards       : {}", report.shards_seen);
    println!("Total entries: {}", report.total_entries);
    println!("Unique blocks: {}", report.unique_blocks);
    Ok(())
}

async fn run_ingest(file: &PathBuf, block_size: u64, shard_capacity: u64) -> Result<()> {
    let (_config, store) = setup()?;
    let report = ingest::ingest_file(&store, file, block_size, shard_capacity).await?;

    println!("=== Ingest Summary ===");
    println!("Root   : {}", report.root);
    println!("Bytes  : {}", report.bytes);
    println!("Blocks : {}", report.blocks);
    println!("Shards : {}", report.shards);
    println!();
    println!("Next: casgw rollup {}", report.root);
    Ok(())
}
