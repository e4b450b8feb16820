//! Range-chunk cache integration tests: parsing, assembly, TTL, and the
//! cold/warm population cycle, all against the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use byteorder::{LittleEndian, WriteBytesExt};
use bytes::Bytes;

use casgw::cache::{parse_range_header, ByteRange, RangeChunkCache};
use casgw::config::CacheConfig;
use casgw::error::GatewayError;
use casgw::store::{keys, GatewayStore};

const MIB: u64 = 1024 * 1024;

fn cache_config(chunk_size: u64, ttl_secs: i64) -> CacheConfig {
    CacheConfig {
        chunk_size,
        ttl_secs,
        max_chunks_per_resource: 4096,
    }
}

fn payload(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i * 31 % 251) as u8).collect::<Vec<u8>>())
}

/// Wait until the detached population tasks have written `chunks` entries.
async fn await_population(store: &GatewayStore, resource: &str, chunks: &[u64]) {
    for _ in 0..100 {
        let mut done = true;
        for &i in chunks {
            if !store.exists(&keys::chunk(resource, i)).await.unwrap() {
                done = false;
                break;
            }
        }
        if done {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("chunk population did not complete");
}

// ──────────────── header parsing ──────────────────────────────────────────

#[test]
fn parse_bounded_range() {
    let range = parse_range_header("bytes=0-99").expect("parse").expect("byte range");
    assert_eq!(range, ByteRange { start: Some(0), end: Some(99) });
}

#[test]
fn parse_open_and_suffix_ranges() {
    let open = parse_range_header("bytes=500-").unwrap().unwrap();
    assert_eq!(open, ByteRange { start: Some(500), end: None });

    let suffix = parse_range_header("bytes=-500").unwrap().unwrap();
    assert_eq!(suffix, ByteRange { start: None, end: Some(500) });
}

#[test]
fn parse_takes_first_subrange_only() {
    let range = parse_range_header("bytes=0-10, 20-30").unwrap().unwrap();
    assert_eq!(range, ByteRange { start: Some(0), end: Some(10) });
}

#[test]
fn parse_non_byte_unit_bypasses() {
    assert!(parse_range_header("items=0-5").unwrap().is_none());
}

#[test]
fn parse_malformed_spec_is_range_error() {
    for bad in ["bytes=abc-def", "bytes=", "bytes=-", "bytes=10-2", "bytes=12"] {
        let err = parse_range_header(bad).expect_err("must fail");
        assert!(matches!(err, GatewayError::Range(_)), "{bad}");
    }
}

#[test]
fn resolve_clamps_and_rejects() {
    let range = ByteRange { start: Some(10), end: Some(999) };
    assert_eq!(range.resolve(100).unwrap(), (10, 99));

    let range = ByteRange { start: Some(100), end: None };
    assert!(matches!(range.resolve(100), Err(GatewayError::Range(_))));

    let suffix = ByteRange { start: None, end: Some(30) };
    assert_eq!(suffix.resolve(100).unwrap(), (70, 99));
}

// ──────────────── serving ─────────────────────────────────────────────────

#[tokio::test]
async fn cold_then_warm_serves_identical_bytes() {
    let store = GatewayStore::in_memory();
    let cache = RangeChunkCache::new(store.clone(), &cache_config(1024, 60));
    let data = payload(10_000);
    let fetches = AtomicUsize::new(0);

    let range = ByteRange { start: Some(100), end: Some(4_500) };
    let cold = cache
        .serve("res", &range, data.len() as u64, || {
            fetches.fetch_add(1, Ordering::SeqCst);
            let data = data.clone();
            async move { Ok(data) }
        })
        .await
        .expect("cold serve");
    assert!(!cold.cache_hit);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(cold.bytes, data.slice(100..4_501));
    assert_eq!((cold.start, cold.end, cold.total), (100, 4_500, 10_000));

    // Chunks 0..=4 were missing and must all be populated in the background.
    await_population(&store, "res", &[0, 1, 2, 3, 4]).await;

    let warm = cache
        .serve("res", &range, data.len() as u64, || async move {
            panic!("full fetch must not run on a warm serve")
        })
        .await
        .expect("warm serve");
    assert!(warm.cache_hit);
    assert_eq!(warm.bytes, cold.bytes);
}

#[tokio::test]
async fn range_spanning_chunk_boundary_assembles_from_two_chunks() {
    let store = GatewayStore::in_memory();
    let cache = RangeChunkCache::new(store.clone(), &cache_config(MIB, 60));
    let data = payload(1_200_000);

    let range = ByteRange { start: Some(1_048_000), end: Some(1_048_700) };
    let cold = cache
        .serve("span", &range, data.len() as u64, || {
            let data = data.clone();
            async move { Ok(data) }
        })
        .await
        .expect("cold serve");
    assert_eq!(cold.bytes.len(), 701);
    await_population(&store, "span", &[0, 1]).await;

    let warm = cache
        .serve("span", &range, data.len() as u64, || async move {
            panic!("must assemble from cached chunks")
        })
        .await
        .expect("warm serve");
    assert!(warm.cache_hit);
    assert_eq!(warm.bytes, data.slice(1_048_000..1_048_701));
}

#[tokio::test]
async fn population_covers_only_missing_chunks() {
    let store = GatewayStore::in_memory();
    let cache = RangeChunkCache::new(store.clone(), &cache_config(1000, 60));
    let data = payload(5_000);

    // Warm chunk 1 by serving a range inside it.
    let inner = ByteRange { start: Some(1_100), end: Some(1_200) };
    cache
        .serve("part", &inner, 5_000, || {
            let data = data.clone();
            async move { Ok(data) }
        })
        .await
        .expect("first serve");
    await_population(&store, "part", &[1]).await;
    assert!(!store.exists(&keys::chunk("part", 0)).await.unwrap());

    // A wider range misses chunks 0 and 2 but must not rewrite chunk 1.
    let chunk1_before = store.get(&keys::chunk("part", 1)).await.unwrap();
    let wide = ByteRange { start: Some(500), end: Some(2_500) };
    let served = cache
        .serve("part", &wide, 5_000, || {
            let data = data.clone();
            async move { Ok(data) }
        })
        .await
        .expect("wide serve");
    assert!(!served.cache_hit);
    await_population(&store, "part", &[0, 2]).await;
    let chunk1_after = store.get(&keys::chunk("part", 1)).await.unwrap();
    assert_eq!(chunk1_before, chunk1_after);
}

#[tokio::test]
async fn expired_chunks_are_misses() {
    let store = GatewayStore::in_memory();
    let cache = RangeChunkCache::new(store.clone(), &cache_config(1000, 60));
    let data = payload(2_000);

    // Hand-write chunk entries whose TTL stamp is already in the past.
    for (i, chunk) in data.chunks(1000).enumerate() {
        let mut entry = Vec::new();
        entry.write_i64::<LittleEndian>(0).unwrap();
        entry.extend_from_slice(chunk);
        store
            .put(&keys::chunk("old", i as u64), Bytes::from(entry))
            .await
            .unwrap();
    }

    let fetches = AtomicUsize::new(0);
    let range = ByteRange { start: Some(0), end: Some(1_500) };
    let served = cache
        .serve("old", &range, 2_000, || {
            fetches.fetch_add(1, Ordering::SeqCst);
            let data = data.clone();
            async move { Ok(data) }
        })
        .await
        .expect("serve");
    assert!(!served.cache_hit);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(served.bytes, data.slice(0..1_501));
}

#[tokio::test]
async fn start_past_total_is_a_range_error() {
    let store = GatewayStore::in_memory();
    let cache = RangeChunkCache::new(store.clone(), &cache_config(1000, 60));

    let range = ByteRange { start: Some(2_000), end: None };
    let err = cache
        .serve("oob", &range, 2_000, || async move {
            panic!("unsatisfiable range must not trigger a fetch")
        })
        .await
        .expect_err("must fail");
    assert!(matches!(err, GatewayError::Range(_)));
}
