//! HTTP API — the gateway's range-serving surface.
//!
//! Endpoints:
//!   GET  /api/status                    → gateway configuration snapshot (JSON)
//!   GET  /api/object/{root}             → object bytes; honors `Range: bytes=`
//!   GET  /api/object/{root}/meta        → size/block/shard summary (JSON)
//!
//! Range requests are answered 206 with `Content-Range`, assembled from the
//! chunk cache when possible; requests without a byte-range header stream
//! the full object. Admission-control stats ride on every object response
//! as `X-Memory-Usage` / `X-Active-Blocks`.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::admission::MemoryAdmission;
use crate::cache::{parse_range_header, RangeChunkCache};
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::fetch::{AdmittedBlockSource, BlockMap, BlockSource, ObjectFetcher, ObjectManifest, ShardBlockSource};
use crate::store::GatewayStore;

/// Shared state passed to all handlers.
pub struct AppState {
    pub store: GatewayStore,
    pub config: Config,
    pub cache: RangeChunkCache,
}

impl AppState {
    pub fn new(store: GatewayStore, config: Config) -> Self {
        let cache = RangeChunkCache::new(store.clone(), &config.cache);
        AppState {
            store,
            config,
            cache,
        }
    }
}

/// Build the axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(handle_status))
        .route("/api/object/{root}", get(handle_object))
        .route("/api/object/{root}/meta", get(handle_object_meta))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn start_server(state: Arc<AppState>, port: u16) {
    let app = build_router(state);
    let addr = format!("0.0.0.0:{}", port);
    info!(port, "Gateway listening on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "Failed to bind HTTP server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "HTTP server error");
    }
}

// ──────────────── handlers ────────────────────────────────────────────────

async fn handle_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(serde_json::to_value(&state.config).unwrap()),
    )
}

async fn handle_object_meta(
    State(state): State<Arc<AppState>>,
    Path(root): Path<String>,
) -> Response {
    match object_summary(&state, &root).await {
        Ok(value) => (StatusCode::OK, axum::Json(value)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn object_summary(state: &AppState, root: &str) -> Result<serde_json::Value> {
    let map = Arc::new(BlockMap::load(&state.store, root).await?);
    let manifest = Arc::new(ObjectManifest::load(&state.store, root).await?);
    let (fetcher, _admission) = request_fetcher(state, manifest, map.clone());
    Ok(serde_json::json!({
        "root": root,
        "total_size": fetcher.total_size()?,
        "blocks": fetcher.block_count(),
        "unique_blocks": map.block_count(),
        "shards": map.shard_count(),
    }))
}

async fn handle_object(
    State(state): State<Arc<AppState>>,
    Path(root): Path<String>,
    headers: HeaderMap,
) -> Response {
    // Per-request retrieval context: block map from the rollup artifact,
    // manifest, and a fresh memory budget.
    let map = match BlockMap::load(&state.store, &root).await {
        Ok(m) => Arc::new(m),
        Err(e) => return error_response(&e),
    };
    let manifest = match ObjectManifest::load(&state.store, &root).await {
        Ok(m) => Arc::new(m),
        Err(e) => return error_response(&e),
    };
    let (fetcher, admission) = request_fetcher(&state, manifest, map);

    let total = match fetcher.total_size() {
        Ok(t) => t,
        Err(e) => return error_response(&e),
    };

    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let range = match range_header.as_deref().map(parse_range_header).transpose() {
        Ok(parsed) => parsed.flatten(),
        Err(e) => return range_error_response(&e, total, &admission),
    };

    match range {
        // No byte range requested (or a non-byte unit): the cache is
        // bypassed and the full object streams out.
        None => {
            let mut response = Response::builder()
                .status(StatusCode::OK)
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::CONTENT_LENGTH, total)
                .body(Body::from_stream(fetcher.fetch_stream()))
                .unwrap();
            append_admission_headers(&mut response, &admission);
            response
        }
        Some(range) => {
            let f = fetcher.clone();
            let served = state
                .cache
                .serve(&root, &range, total, move || async move {
                    f.fetch_full().await
                })
                .await;
            match served {
                Ok(slice) => {
                    let mut response = Response::builder()
                        .status(StatusCode::PARTIAL_CONTENT)
                        .header(header::ACCEPT_RANGES, "bytes")
                        .header(
                            header::CONTENT_RANGE,
                            format!("bytes {}-{}/{}", slice.start, slice.end, slice.total),
                        )
                        .header(header::CONTENT_LENGTH, slice.bytes.len())
                        .body(Body::from(slice.bytes))
                        .unwrap();
                    append_admission_headers(&mut response, &admission);
                    response
                }
                Err(e @ GatewayError::Range(_)) => range_error_response(&e, total, &admission),
                Err(e) => error_response(&e),
            }
        }
    }
}

// ──────────────── response helpers ────────────────────────────────────────

fn append_admission_headers(response: &mut Response, admission: &Arc<MemoryAdmission>) {
    let stats = admission.stats();
    let headers = response.headers_mut();
    if let Ok(v) = stats.current_usage.to_string().parse() {
        headers.insert("x-memory-usage", v);
    }
    if let Ok(v) = stats.active_blocks.to_string().parse() {
        headers.insert("x-active-blocks", v);
    }
}

fn range_error_response(e: &GatewayError, total: u64, admission: &Arc<MemoryAdmission>) -> Response {
    let mut response = Response::builder()
        .status(StatusCode::RANGE_NOT_SATISFIABLE)
        .header(header::CONTENT_RANGE, format!("bytes */{total}"))
        .body(Body::from(
            serde_json::json!({"error": e.to_string()}).to_string(),
        ))
        .unwrap();
    append_admission_headers(&mut response, admission);
    response
}

fn error_response(e: &GatewayError) -> Response {
    let status = match e {
        GatewayError::NotFound(_) | GatewayError::ShardNotFound { .. } => StatusCode::NOT_FOUND,
        GatewayError::BudgetExceeded(_) => StatusCode::PAYLOAD_TOO_LARGE,
        GatewayError::Range(_) => StatusCode::RANGE_NOT_SATISFIABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %e, "Request failed");
    }
    (
        status,
        axum::Json(serde_json::json!({"error": e.to_string()})),
    )
        .into_response()
}

/// Per-request retrieval context: a fresh memory budget composed, at
/// construction time, around the shard block source.
fn request_fetcher(
    state: &AppState,
    manifest: Arc<ObjectManifest>,
    map: Arc<BlockMap>,
) -> (ObjectFetcher, Arc<MemoryAdmission>) {
    let admission = Arc::new(MemoryAdmission::new(state.config.memory.clone()));
    let source: Arc<dyn BlockSource> = Arc::new(AdmittedBlockSource::new(
        ShardBlockSource::new(state.store.clone(), map.clone()),
        admission.clone(),
    ));
    let fetcher = ObjectFetcher::new(
        manifest,
        map,
        source,
        state.config.memory.max_concurrent_blocks,
    );
    (fetcher, admission)
}
