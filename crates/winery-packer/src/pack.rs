//! Packs one `full` shard into an RO-shard file (spec.md §4.6).

use crate::error::{Error, Result};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use winery_catalog::{Catalog, Locker, ShardId, ShardName};
use winery_pool::Pool;
use winery_shard::ro;
use winery_shard::rw::RwShard;

/// How many keys to re-verify against the finished RO-shard file before
/// trusting it (spec.md §4.6 step 4). Small and fixed: a corrupt write is
/// overwhelmingly likely to show up in any sample, and a full re-read would
/// cost as much as the pack itself.
const VERIFY_SAMPLE: usize = 32;

/// Tunables for step 2 of spec.md §4.6: obtaining a writer handle from the
/// pool. `create_images = true` (`packer.create_images` in config) means
/// this packer provisions the pool artifact itself; `false` means an
/// external manager (e.g. [`winery_pool::manager`]) is responsible, and the
/// packer instead polls with bounded backoff until the image becomes
/// visible.
#[derive(Debug, Clone, Copy)]
pub struct PackOptions {
    pub create_images: bool,
    pub image_wait_initial: Duration,
    pub image_wait_max: Duration,
    pub image_wait_deadline: Duration,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            create_images: true,
            image_wait_initial: Duration::from_millis(200),
            image_wait_max: Duration::from_secs(5),
            image_wait_deadline: Duration::from_secs(30),
        }
    }
}

/// Packs shard `id`, which the caller has already fetched in `full` state.
/// Returns `Err` (and leaves the shard back in `full`, unlocked) on any
/// failure, so the next poll picks it up again.
pub async fn pack_shard(catalog: &Catalog, pool: &dyn Pool, id: ShardId, options: &PackOptions) -> Result<()> {
    let locker = Locker::acquire();
    let row = catalog.try_acquire_packing(id, locker).await?;

    match pack_locked(catalog, pool, &row, locker, options).await {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::warn!(shard = %row.name, ?err, "packing failed, returning shard to full");
            // Best-effort: if this also fails the shard is recovered later
            // by reclaim_stale_packing instead.
            let _ = catalog.fail_packing(row.id, locker).await;
            Err(err)
        }
    }
}

/// Obtains the writer handle for `name`'s RO-shard file (spec.md §4.6 step
/// 2). If `create_images` is set, creates the pool artifact directly;
/// otherwise waits with exponential backoff, bounded by
/// `image_wait_deadline`, for an externally-created image to become
/// visible.
async fn acquire_writer_handle(
    pool: &dyn Pool,
    name: &ShardName,
    size: Option<u64>,
    options: &PackOptions,
) -> Result<PathBuf> {
    if options.create_images {
        return Ok(pool.create(name, size).await?);
    }

    let start = Instant::now();
    let mut backoff = options.image_wait_initial;
    loop {
        match pool.create(name, size).await {
            Ok(path) => return Ok(path),
            Err(winery_pool::Error::PoolUnavailable) => {
                if start.elapsed() >= options.image_wait_deadline {
                    return Err(Error::ImageNotVisible);
                }
                tracing::debug!(shard = %name, ?backoff, "waiting for externally-created image to become visible");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(options.image_wait_max);
            }
            Err(err) => return Err(err.into()),
        }
    }
}

async fn pack_locked(
    catalog: &Catalog,
    pool: &dyn Pool,
    row: &winery_catalog::ShardRow,
    locker: Locker,
    options: &PackOptions,
) -> Result<()> {
    let rw = RwShard::new(catalog.pool(), row.name);
    let size_hint = rw.size().await.map_err(winery_shard::rw::Error::from)? as u64;

    // Step 2: obtain (or wait for) the writer handle before streaming, per
    // spec.md §4.6.
    let final_path = acquire_writer_handle(pool, &row.name, Some(size_hint), options).await?;

    let mut builder = ro::Builder::new()?;
    let mut sample_keys = Vec::with_capacity(VERIFY_SAMPLE);

    let mut rows = Box::pin(rw.iter());
    while let Some(next) = rows.next().await {
        let (key, content) = next.map_err(winery_shard::rw::Error::from)?;
        let key: [u8; 32] = key
            .as_slice()
            .try_into()
            .expect("rw-shard keys are always 32-byte signatures");
        if sample_keys.len() < VERIFY_SAMPLE {
            sample_keys.push(key);
        }
        builder.push(key, &content)?;
    }
    drop(rows);

    builder.finalize(&final_path)?;

    let reader = ro::Reader::open(&final_path)?;
    reader
        .probe(sample_keys)
        .map_err(|_| Error::VerificationFailed)?;

    catalog.mark_packed(row.id, locker).await?;
    tracing::info!(shard = %row.name, "packed shard");
    Ok(())
}

/// Convenience used by both the worker loop and tests: packs every shard
/// currently `full`, in no particular order.
pub async fn pack_all_full(catalog: &Catalog, pool: &dyn Pool, options: &PackOptions) -> Result<usize> {
    let full = catalog.list_in_state(winery_catalog::ShardState::Full).await?;
    let mut packed = 0;
    for row in full {
        if row.is_locked() {
            continue;
        }
        match pack_shard(catalog, pool, row.id, options).await {
            Ok(()) => packed += 1,
            Err(Error::Catalog(winery_catalog::Error::Conflict(_))) => {
                // Another packer won the race for this shard.
            }
            Err(err) => return Err(err),
        }
    }
    Ok(packed)
}
