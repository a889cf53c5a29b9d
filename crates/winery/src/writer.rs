//! The writer facade (spec.md §6, C10): `add`/`delete` over the
//! composition of the catalog's shard lifecycle (§4.1), its signature
//! index (§4.2), and the RW-shard table (§4.3). Not in the spec's core
//! scope by its own words, but its contract constrains the core, so it is
//! implemented here as a thin composition layer with no outer HTTP/CLI
//! surface.

use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use winery_catalog::index::{Index, InsertInflight, SignatureState};
use winery_catalog::{Catalog, Locker, ShardId, ShardRow, Signature};
use winery_pool::Pool;
use winery_shard::rw::RwShard;
use winery_throttler::Throttler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Written,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

struct CurrentShard {
    row: ShardRow,
    locker: Locker,
    last_write: Instant,
}

/// Packs a shard inline right after it fills, instead of waiting for an
/// external packer process (`packer.pack_immediately`, spec.md §6).
pub struct InlinePacking {
    pub pool: Arc<dyn Pool>,
    pub clean_immediately: bool,
    pub min_mapped_hosts: usize,
    /// Mirrors `packer.create_images` (spec.md §4.6 step 2): whether this
    /// writer's inline pack provisions the pool artifact itself or waits
    /// for an externally-created one.
    pub create_images: bool,
}

pub struct Writer {
    catalog: Catalog,
    throttler: Throttler,
    max_size: u64,
    idle_timeout: Duration,
    inline_packing: Option<InlinePacking>,
    current: Mutex<Option<CurrentShard>>,
}

impl Writer {
    pub fn new(
        catalog: Catalog,
        throttler: Throttler,
        max_size: u64,
        idle_timeout: Duration,
        inline_packing: Option<InlinePacking>,
    ) -> Self {
        Self {
            catalog,
            throttler,
            max_size,
            idle_timeout,
            inline_packing,
            current: Mutex::new(None),
        }
    }

    /// Idempotent: per spec.md §9 "Idempotent adds", the core assumes the
    /// client may retry any `add`, and a conflict on add is success, not
    /// error, since an object id determines its content by construction.
    pub async fn add(&self, signature: Signature, content: &[u8]) -> Result<AddOutcome> {
        self.throttler.gate(content.len() as u64).await?;

        let mut guard = self.current.lock().await;
        let shard = self.current_shard(&mut guard).await?;
        let index = Index::new(self.catalog.pool());

        let outcome = index.insert_inflight(signature, shard.row.id).await?;
        let result = match outcome {
            InsertInflight::Created => {
                self.write_and_commit(shard, signature, content, index)
                    .await?;
                AddOutcome::Written
            }
            InsertInflight::Exists(entry) if entry.shard != shard.row.id => {
                // Another shard already owns (or is taking ownership of)
                // this signature; this writer has nothing to do.
                AddOutcome::AlreadyExists
            }
            InsertInflight::Exists(entry) if entry.state == SignatureState::Inflight => {
                // A prior attempt by this writer got as far as inserting
                // the inflight row but not writing the bytes (e.g. crashed
                // mid-add); resume it.
                self.write_and_commit(shard, signature, content, index)
                    .await?;
                AddOutcome::Written
            }
            InsertInflight::Exists(_) => AddOutcome::AlreadyExists,
        };

        shard.last_write = Instant::now();
        let size = RwShard::new(self.catalog.pool(), shard.row.name)
            .size()
            .await
            .map_err(Error::from)?;

        if size as u64 >= self.max_size {
            let finished = guard.take().expect("current shard set above");
            self.catalog
                .mark_full(finished.row.id, finished.locker)
                .await?;
            tracing::debug!(shard = %finished.row.name, size, "shard reached max_size, marked full");
            self.maybe_pack_inline(finished.row.id).await?;
        }

        Ok(result)
    }

    async fn write_and_commit(
        &self,
        shard: &CurrentShard,
        signature: Signature,
        content: &[u8],
        index: Index<'_>,
    ) -> Result<()> {
        let rw = RwShard::new(self.catalog.pool(), shard.row.name);
        rw.add(signature.as_bytes(), content).await?;
        index.mark_present(signature).await?;
        Ok(())
    }

    async fn maybe_pack_inline(&self, id: ShardId) -> Result<()> {
        let Some(inline) = &self.inline_packing else {
            return Ok(());
        };
        let pack_options = winery_packer::PackOptions {
            create_images: inline.create_images,
            ..winery_packer::PackOptions::default()
        };
        match winery_packer::pack_shard(&self.catalog, inline.pool.as_ref(), id, &pack_options).await {
            Ok(()) => (),
            Err(winery_packer::Error::Catalog(winery_catalog::Error::Conflict(_))) => return Ok(()),
            Err(err) => return Err(packer_error(err)),
        }
        if inline.clean_immediately {
            // Goes through the same min_mapped_hosts gate as the cleaner
            // worker loop (spec.md §4.8) rather than dropping the table
            // unconditionally.
            match winery_cleaner::clean_all_eligible(&self.catalog, inline.min_mapped_hosts).await {
                Ok(_) => (),
                Err(err) => return Err(cleaner_error(err)),
            }
        }
        Ok(())
    }

    /// `present -> deleted`, a soft delete recorded in the index only
    /// (spec.md §6; shards are never rewritten).
    pub async fn delete(&self, signature: Signature) -> Result<DeleteOutcome> {
        let index = Index::new(self.catalog.pool());
        let entry = index.lookup(signature).await?;
        match entry {
            Some(entry) if entry.state == SignatureState::Present => {
                index.mark_deleted(signature).await?;
                Ok(DeleteOutcome::Deleted)
            }
            _ => Ok(DeleteOutcome::NotFound),
        }
    }

    /// Ensures `guard` holds a shard this writer currently owns, releasing
    /// an idle one back to `standby` first and acquiring a fresh `standby`
    /// shard if needed (spec.md §3 lifecycle, §4.1 `standby <-> writing`).
    async fn current_shard<'g>(
        &self,
        guard: &'g mut Option<CurrentShard>,
    ) -> Result<&'g mut CurrentShard> {
        if let Some(shard) = guard.as_ref() {
            if shard.last_write.elapsed() > self.idle_timeout {
                let shard = guard.take().unwrap();
                // Best-effort: if another actor already moved this shard
                // on, the release is a harmless no-op race.
                let _ = self
                    .catalog
                    .release_to_standby(shard.row.id, shard.locker)
                    .await;
                tracing::debug!(shard = %shard.row.name, "released idle shard back to standby");
            }
        }

        if guard.is_none() {
            let row = self.catalog.acquire_standby_shard().await?;
            let locker = Locker::acquire();
            let row = self.catalog.begin_writing(row.id, locker).await?;
            RwShard::new(self.catalog.pool(), row.name)
                .create_table()
                .await
                .map_err(Error::from)?;
            tracing::debug!(shard = %row.name, "acquired shard for writing");
            *guard = Some(CurrentShard {
                row,
                locker,
                last_write: Instant::now(),
            });
        }

        Ok(guard.as_mut().unwrap())
    }
}

fn packer_error(err: winery_packer::Error) -> Error {
    match err {
        winery_packer::Error::Catalog(err) => err.into(),
        winery_packer::Error::Rw(err) => err.into(),
        winery_packer::Error::Ro(err) => err.into(),
        winery_packer::Error::Pool(err) => err.into(),
        winery_packer::Error::VerificationFailed => Error::Corrupt,
        winery_packer::Error::ImageNotVisible => Error::Timeout,
    }
}

fn cleaner_error(err: winery_cleaner::Error) -> Error {
    match err {
        winery_cleaner::Error::Catalog(err) => err.into(),
        winery_cleaner::Error::Rw(err) => err.into(),
    }
}
