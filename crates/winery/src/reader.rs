//! The reader facade (spec.md §6, C10): `get`/`contains`/`iter` over the
//! composition of the signature index and whichever of RW-shard or
//! RO-shard is currently authoritative for an object, per the "polymorphism
//! over shard readers" design note — the two are deliberately not unified
//! behind one trait, since the facade (not the shard types themselves)
//! picks one based on the shard's current state.

use crate::error::{Error, Result};
use futures::Stream;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use winery_catalog::index::{Index, SignatureState};
use winery_catalog::{Catalog, ShardId, ShardRow, ShardState, Signature};
use winery_pool::Pool;
use winery_shard::rw::RwShard;
use winery_shard::RoShard;
use winery_throttler::Throttler;

/// Default bound on "wait for the pool to make an RO-shard visible on this
/// host" (spec.md §5: pool operations that may block indefinitely on an
/// externally-created image use a bounded deadline rather than hanging).
const DEFAULT_POOL_DEADLINE: Duration = Duration::from_secs(30);

pub struct Reader {
    catalog: Catalog,
    pool: Arc<dyn Pool>,
    throttler: Throttler,
    pool_deadline: Duration,
    ro_cache: Mutex<HashMap<ShardId, Arc<RoShard>>>,
}

impl Reader {
    pub fn new(catalog: Catalog, pool: Arc<dyn Pool>, throttler: Throttler) -> Self {
        Self {
            catalog,
            pool,
            throttler,
            pool_deadline: DEFAULT_POOL_DEADLINE,
            ro_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the default deadline on waiting for a pool to make a
    /// shard's file visible on this host (spec.md §5).
    pub fn with_pool_deadline(mut self, deadline: Duration) -> Self {
        self.pool_deadline = deadline;
        self
    }

    /// `get(obj_id) -> bytes | not_found` (spec.md §6). `inflight` and
    /// `deleted` signatures read as not-found (spec.md §4.2).
    pub async fn get(&self, signature: Signature) -> Result<Option<Vec<u8>>> {
        let Some(shard) = self.resolve_present(signature).await? else {
            return Ok(None);
        };

        let bytes = match shard.state {
            ShardState::Writing | ShardState::Full | ShardState::Packing => {
                let rw = RwShard::new(self.catalog.pool(), shard.name);
                rw.get(signature.as_bytes()).await.map_err(Error::from)?
            }
            ShardState::Packed | ShardState::Cleaning | ShardState::Readonly => {
                let reader = self.open_ro_cached(&shard).await?;
                reader.get(signature.as_bytes()).map_err(Error::from)?.map(|b| b.to_vec())
            }
            ShardState::Standby => None,
        };

        if let Some(bytes) = &bytes {
            self.throttler.gate(bytes.len() as u64).await?;
        }

        Ok(bytes)
    }

    /// `contains(obj_id) -> bool` (spec.md §6).
    pub async fn contains(&self, signature: Signature) -> Result<bool> {
        let Some(shard) = self.resolve_present(signature).await? else {
            return Ok(false);
        };

        let found = match shard.state {
            ShardState::Writing | ShardState::Full | ShardState::Packing => {
                let rw = RwShard::new(self.catalog.pool(), shard.name);
                rw.contains(signature.as_bytes()).await.map_err(Error::from)?
            }
            ShardState::Packed | ShardState::Cleaning | ShardState::Readonly => {
                let reader = self.open_ro_cached(&shard).await?;
                reader.get(signature.as_bytes()).map_err(Error::from)?.is_some()
            }
            ShardState::Standby => false,
        };
        Ok(found)
    }

    /// `iter() -> lazy sequence of obj_id` (spec.md §6). Enumerates
    /// `present` entries; no order guarantee, not a snapshot.
    pub fn iter(&self) -> impl Stream<Item = Result<Signature>> + '_ {
        use futures::StreamExt;
        Index::new(self.catalog.pool())
            .iter_present()
            .map(|res| res.map_err(Error::Sqlx))
    }

    async fn resolve_present(&self, signature: Signature) -> Result<Option<ShardRow>> {
        let index = Index::new(self.catalog.pool());
        let entry = index.lookup(signature).await?;
        let Some(entry) = entry else { return Ok(None) };
        if entry.state != SignatureState::Present {
            return Ok(None);
        }
        let shard = self.catalog.get(entry.shard).await?;
        Ok(shard)
    }

    async fn open_ro_cached(&self, shard: &ShardRow) -> Result<Arc<RoShard>> {
        let mut cache = self.ro_cache.lock().await;
        if let Some(reader) = cache.get(&shard.id) {
            return Ok(reader.clone());
        }

        let path = tokio::time::timeout(self.pool_deadline, self.pool.open_ro(&shard.name))
            .await
            .map_err(|_| Error::Timeout)??;
        let reader = tokio::task::spawn_blocking(move || RoShard::open(&path))
            .await
            .expect("ro-shard open task panicked")
            .map_err(Error::from)?;
        let reader = Arc::new(reader);
        cache.insert(shard.id, reader.clone());
        Ok(reader)
    }
}
