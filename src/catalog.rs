//! Shard catalog: which shards hold blocks of a given root.
//!
//! The catalog is consulted only by the offline rollup builder; request-time
//! retrieval works from the rollup artifact alone.

use async_trait::async_trait;

use crate::digest::ShardId;
use crate::error::Result;
use crate::store::{keys, GatewayStore};

/// Lists the shard identifiers known to contain blocks of a root.
#[async_trait]
pub trait ShardCatalog: Send + Sync {
    async fn shards_for_root(&self, root: &str) -> Result<Vec<ShardId>>;
}

/// Catalog backed by membership markers under `catalog/{root}/` in the
/// blob store. The sorted key listing is the enumeration order, so a stable
/// catalog yields a deterministic rollup artifact.
pub struct StoreShardCatalog {
    store: GatewayStore,
}

impl StoreShardCatalog {
    pub fn new(store: GatewayStore) -> Self {
        StoreShardCatalog { store }
    }
}

#[async_trait]
impl ShardCatalog for StoreShardCatalog {
    async fn shards_for_root(&self, root: &str) -> Result<Vec<ShardId>> {
        let prefix = keys::catalog_prefix(root);
        let mut shards = Vec::new();
        for key in self.store.list_keys(&prefix).await? {
            // Marker keys end in the shard's hex hash.
            let hex = key.rsplit('/').next().unwrap_or(&key);
            shards.push(ShardId::from_hex(hex)?);
        }
        Ok(shards)
    }
}
