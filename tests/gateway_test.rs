//! End-to-end tests: ingest → rollup → retrieval, including the HTTP
//! surface, budget enforcement, and retrieval with the catalog gone.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::TryStreamExt;
use tower::ServiceExt;

use casgw::admission::{MemoryAdmission, MemoryLimits};
use casgw::api::{build_router, AppState};
use casgw::catalog::{ShardCatalog, StoreShardCatalog};
use casgw::config::{ApiConfig, CacheConfig, Config, StoreConfig};
use casgw::fetch::{
    AdmittedBlockSource, BlockMap, BlockSource, ObjectFetcher, ObjectManifest, ShardBlockSource,
};
use casgw::store::{keys, GatewayStore};
use casgw::{ingest, rollup};

const BLOCK_SIZE: u64 = 8_192;
const SHARD_CAPACITY: u64 = 3 * BLOCK_SIZE;

fn test_content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn test_config() -> Config {
    Config {
        store: StoreConfig::Local {
            data_dir: PathBuf::from("unused"),
        },
        cache: CacheConfig {
            chunk_size: 4_096,
            ttl_secs: 60,
            max_chunks_per_resource: 4096,
        },
        memory: MemoryLimits::default(),
        api: ApiConfig { port: 0 },
    }
}

/// Ingest `content` and build its rollup. Returns the root.
async fn seed(store: &GatewayStore, content: &[u8]) -> String {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(content).expect("write content");

    let report = ingest::ingest_file(store, file.path(), BLOCK_SIZE, SHARD_CAPACITY)
        .await
        .expect("ingest");

    let catalog = StoreShardCatalog::new(store.clone());
    rollup::build(&report.root, &catalog, store)
        .await
        .expect("build rollup");
    report.root
}

fn retrieval(
    store: &GatewayStore,
    manifest: ObjectManifest,
    map: BlockMap,
    limits: MemoryLimits,
) -> (ObjectFetcher, Arc<MemoryAdmission>) {
    let map = Arc::new(map);
    let admission = Arc::new(MemoryAdmission::new(limits.clone()));
    let source: Arc<dyn BlockSource> = Arc::new(AdmittedBlockSource::new(
        ShardBlockSource::new(store.clone(), map.clone()),
        admission.clone(),
    ));
    let fetcher = ObjectFetcher::new(
        Arc::new(manifest),
        map,
        source,
        limits.max_concurrent_blocks,
    );
    (fetcher, admission)
}

#[tokio::test]
async fn three_shard_object_round_trips() {
    let store = GatewayStore::in_memory();
    let content = test_content(60_000);
    let root = seed(&store, &content).await;

    let catalog = StoreShardCatalog::new(store.clone());
    let expected = catalog.shards_for_root(&root).await.expect("catalog");
    assert_eq!(expected.len(), 3);

    let report = rollup::verify(&root, &expected, &store).await.expect("verify");
    assert_eq!(report.shards_seen, 3);
    assert_eq!(report.total_entries, 8);
    assert_eq!(report.unique_blocks, 8);

    let manifest = ObjectManifest::load(&store, &root).await.expect("manifest");
    let map = BlockMap::load(&store, &root).await.expect("block map");
    let (fetcher, admission) = retrieval(&store, manifest, map, MemoryLimits::default());

    assert_eq!(fetcher.total_size().expect("size"), 60_000);
    let fetched = fetcher.fetch_full().await.expect("fetch");
    assert_eq!(&fetched[..], &content[..]);

    // Budget fully returned once the object is assembled.
    let stats = admission.stats();
    assert_eq!(stats.current_usage, 0);
    assert_eq!(stats.active_blocks, 0);
}

#[tokio::test]
async fn retrieval_survives_catalog_loss() {
    let store = GatewayStore::in_memory();
    let content = test_content(60_000);
    let root = seed(&store, &content).await;

    // The live catalog listing disappears after the rollup is built.
    let catalog = StoreShardCatalog::new(store.clone());
    for shard in catalog.shards_for_root(&root).await.expect("catalog") {
        store
            .delete(&keys::catalog_marker(&root, &shard))
            .await
            .expect("delete marker");
    }
    assert!(catalog.shards_for_root(&root).await.expect("relist").is_empty());

    // Retrieval works from the rollup artifact alone.
    let manifest = ObjectManifest::load(&store, &root).await.expect("manifest");
    let map = BlockMap::load(&store, &root).await.expect("block map");
    let (fetcher, _) = retrieval(&store, manifest, map, MemoryLimits::default());
    let fetched = fetcher.fetch_full().await.expect("fetch");
    assert_eq!(&fetched[..], &content[..]);
}

#[tokio::test]
async fn block_lengths_derived_from_offsets() {
    let store = GatewayStore::in_memory();
    let content = test_content(60_000);
    let root = seed(&store, &content).await;

    let map = BlockMap::load(&store, &root).await.expect("block map");
    let manifest = ObjectManifest::load(&store, &root).await.expect("manifest");

    // Seven full blocks plus a 2656-byte tail.
    for (i, digest) in manifest.blocks().iter().enumerate() {
        let loc = map.locate(digest).expect("located");
        let expected = if i == 7 { 2_656 } else { BLOCK_SIZE };
        assert_eq!(loc.length, expected, "block {i}");
    }
}

#[tokio::test]
async fn dropped_stream_releases_budget() {
    let store = GatewayStore::in_memory();
    let content = test_content(60_000);
    let root = seed(&store, &content).await;

    let manifest = ObjectManifest::load(&store, &root).await.expect("manifest");
    let map = Arc::new(BlockMap::load(&store, &root).await.expect("block map"));
    let admission = Arc::new(MemoryAdmission::new(MemoryLimits::default()));
    let source = AdmittedBlockSource::new(
        ShardBlockSource::new(store.clone(), map),
        admission.clone(),
    );

    let mut stream = source.stream(&manifest.blocks()[0]).await.expect("stream");
    let first = stream.try_next().await.expect("poll").expect("chunk");
    assert!(!first.is_empty());
    assert!(admission.stats().current_usage > 0);

    // Early termination: dropping the stream returns everything tracked.
    drop(stream);
    assert_eq!(admission.stats().current_usage, 0);
    assert_eq!(admission.stats().active_blocks, 0);
}

// ──────────────── HTTP surface ────────────────────────────────────────────

async fn http_state(content: &[u8], config: Config) -> (Arc<AppState>, String) {
    let store = GatewayStore::in_memory();
    let root = seed(&store, content).await;
    (Arc::new(AppState::new(store, config)), root)
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("collect body")
}

#[tokio::test]
async fn range_request_returns_partial_content() {
    let content = test_content(60_000);
    let (state, root) = http_state(&content, test_config()).await;
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/object/{root}"))
                .header("range", "bytes=100-299")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers()["content-range"],
        "bytes 100-299/60000"
    );
    assert_eq!(response.headers()["accept-ranges"], "bytes");
    assert!(response.headers().contains_key("x-memory-usage"));
    assert!(response.headers().contains_key("x-active-blocks"));

    let body = body_bytes(response).await;
    assert_eq!(&body[..], &content[100..300]);
}

#[tokio::test]
async fn full_request_streams_whole_object() {
    let content = test_content(60_000);
    let (state, root) = http_state(&content, test_config()).await;
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/object/{root}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-length"], "60000");
    let body = body_bytes(response).await;
    assert_eq!(&body[..], &content[..]);
}

#[tokio::test]
async fn unsatisfiable_range_is_416() {
    let content = test_content(10_000);
    let (state, root) = http_state(&content, test_config()).await;
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/object/{root}"))
                .header("range", "bytes=10000-")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.headers()["content-range"], "bytes */10000");
}

#[tokio::test]
async fn malformed_byte_range_is_416() {
    let content = test_content(10_000);
    let (state, root) = http_state(&content, test_config()).await;
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/object/{root}"))
                .header("range", "bytes=zzz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn unknown_root_is_404() {
    let content = test_content(1_000);
    let (state, _root) = http_state(&content, test_config()).await;
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/object/deadbeef")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn budget_exhaustion_is_413() {
    let content = test_content(60_000);
    let mut config = test_config();
    // Every ingested block is larger than the admitted maximum.
    config.memory.max_block_size = 1_024;
    config.memory.max_batch_size = 2_048;
    let (state, root) = http_state(&content, config).await;
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/object/{root}"))
                .header("range", "bytes=0-100")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn meta_reports_object_shape() {
    let content = test_content(60_000);
    let (state, root) = http_state(&content, test_config()).await;
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/object/{root}/meta"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_bytes(response).await;
    let value: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(value["total_size"], 60_000);
    assert_eq!(value["blocks"], 8);
    assert_eq!(value["shards"], 3);
}
