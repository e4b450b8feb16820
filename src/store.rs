//! Blob store access: a thin wrapper over [`object_store::ObjectStore`]
//! with the gateway's key layout and error vocabulary.
//!
//! Backends are selected by configuration (local filesystem or S3); tests
//! use the in-memory backend. Keys are deterministic functions of content
//! identifiers, so concurrent writers of the same key always agree on the
//! payload and no coordination is needed.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{GetOptions, GetRange, MultipartUpload, ObjectStore, PutPayload};
use tracing::info;

use crate::config::StoreConfig;
use crate::error::{GatewayError, Result};

/// Key derivation for every object class the gateway touches.
pub mod keys {
    use crate::digest::ShardId;

    /// Raw shard bytes.
    pub fn shard(id: &ShardId) -> String {
        format!("shard/{id}")
    }

    /// Per-shard index object (written by ingestion, read here).
    pub fn shard_index(id: &ShardId) -> String {
        format!("index/{id}")
    }

    /// Prefix whose listing is the shard catalog for `root`.
    pub fn catalog_prefix(root: &str) -> String {
        format!("catalog/{root}")
    }

    /// Membership marker tying one shard to one root.
    pub fn catalog_marker(root: &str, id: &ShardId) -> String {
        format!("catalog/{root}/{id}")
    }

    /// Ordered block digests for the object identified by `root`.
    pub fn manifest(root: &str) -> String {
        format!("manifest/{root}")
    }

    /// Consolidated rollup artifact for `root`.
    pub fn rollup(root: &str) -> String {
        format!("rollup/{root}")
    }

    /// One fixed-size cached chunk of a ranged resource.
    pub fn chunk(resource: &str, index: u64) -> String {
        format!("cache/{resource}/{index:08}")
    }
}

/// Shared handle to the configured blob store backend.
#[derive(Clone)]
pub struct GatewayStore {
    inner: Arc<dyn ObjectStore>,
}

fn is_not_found(err: &object_store::Error) -> bool {
    matches!(err, object_store::Error::NotFound { .. })
}

impl GatewayStore {
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        match config {
            StoreConfig::Local { data_dir } => {
                std::fs::create_dir_all(data_dir).map_err(|e| {
                    GatewayError::Config(format!("cannot create data dir {data_dir:?}: {e}"))
                })?;
                info!(dir = ?data_dir, "Using local filesystem blob store");
                let fs = LocalFileSystem::new_with_prefix(data_dir).map_err(|e| {
                    GatewayError::Config(format!("cannot open data dir {data_dir:?}: {e}"))
                })?;
                Ok(GatewayStore { inner: Arc::new(fs) })
            }
            StoreConfig::S3 { bucket } => {
                info!(bucket, "Using S3 blob store");
                let s3 = AmazonS3Builder::from_env()
                    .with_allow_http(true)
                    .with_bucket_name(bucket)
                    .build()
                    .map_err(|e| GatewayError::Config(format!("cannot build S3 store: {e}")))?;
                Ok(GatewayStore { inner: Arc::new(s3) })
            }
        }
    }

    /// In-memory backend, for tests and local experiments.
    pub fn in_memory() -> Self {
        GatewayStore {
            inner: Arc::new(InMemory::new()),
        }
    }

    /// Existence check without reading the payload.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.inner.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Object size in bytes via a head request.
    pub async fn size(&self, key: &str) -> Result<u64> {
        match self.inner.head(&Path::from(key)).await {
            Ok(meta) => Ok(meta.size as u64),
            Err(e) if is_not_found(&e) => Err(GatewayError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a whole object.
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        match self.inner.get(&Path::from(key)).await {
            Ok(result) => Ok(result.bytes().await?),
            Err(e) if is_not_found(&e) => Err(GatewayError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch the byte range `[start, start + length)` of an object.
    pub async fn get_range(&self, key: &str, start: u64, length: u64) -> Result<Bytes> {
        let range = start as usize..(start + length) as usize;
        match self.inner.get_range(&Path::from(key), range).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if is_not_found(&e) => Err(GatewayError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Stream a whole object without materializing it.
    pub async fn get_stream(&self, key: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        match self.inner.get(&Path::from(key)).await {
            Ok(result) => Ok(result.into_stream().map_err(GatewayError::from).boxed()),
            Err(e) if is_not_found(&e) => Err(GatewayError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Stream the byte range `[start, start + length)` of an object.
    pub async fn get_range_stream(
        &self,
        key: &str,
        start: u64,
        length: u64,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        let options = GetOptions {
            range: Some(GetRange::Bounded(start as usize..(start + length) as usize)),
            ..Default::default()
        };
        match self.inner.get_opts(&Path::from(key), options).await {
            Ok(result) => Ok(result.into_stream().map_err(GatewayError::from).boxed()),
            Err(e) if is_not_found(&e) => Err(GatewayError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a whole object.
    pub async fn put(&self, key: &str, bytes: Bytes) -> Result<()> {
        self.inner
            .put(&Path::from(key), PutPayload::from(bytes))
            .await?;
        Ok(())
    }

    /// Remove an object. Absent keys are not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        match self.inner.delete(&Path::from(key)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Begin a multipart upload. The caller must `complete` or `abort` it;
    /// an aborted upload leaves nothing visible at `key`.
    pub async fn put_multipart(&self, key: &str) -> Result<Box<dyn MultipartUpload>> {
        Ok(self.inner.put_multipart(&Path::from(key)).await?)
    }

    /// List all keys under `prefix`, sorted for deterministic enumeration.
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .inner
            .list(Some(&Path::from(prefix)))
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await?;
        keys.sort();
        Ok(keys)
    }
}
