//! The packer's poll loop: the same semaphore-gated, jittered-sleep shape
//! as `automations::server::serve`/`ready_tasks_iter`, adapted to dequeue
//! one shard at a time via [`winery_catalog::Catalog::try_acquire_packing`]
//! instead of a generic task queue.

use crate::pack::{pack_shard, PackOptions};
use std::sync::Arc;
use std::time::Duration;
use winery_catalog::{Catalog, ShardState};
use winery_pool::Pool;

pub struct Config {
    /// Maximum shards packed concurrently by this worker.
    pub permits: u32,
    /// Sleep between scans when nothing was found to pack.
    pub dequeue_interval: Duration,
    /// How long a `packing` lock may go unrefreshed before another packer
    /// reclaims it back to `full` (spec.md §4.1 Recovery, DESIGN.md O1).
    pub reclaim_after: chrono::Duration,
    /// `packer.create_images` and its backoff tunables (spec.md §4.6 step 2).
    pub pack_options: PackOptions,
}

/// Runs until `shutdown` resolves, then waits for in-flight packs to finish.
pub async fn run(
    catalog: Catalog,
    pool: Arc<dyn Pool>,
    config: Config,
    shutdown: impl std::future::Future<Output = ()>,
) {
    let semaphore = Arc::new(tokio::sync::Semaphore::new(config.permits as usize));
    tokio::pin!(shutdown);

    loop {
        if let Err(err) = catalog.reclaim_stale_packing(config.reclaim_after).await {
            tracing::error!(?err, "failed to reclaim stale packing locks");
        }

        let candidates = match catalog.list_in_state(ShardState::Full).await {
            Ok(rows) => rows.into_iter().filter(|r| !r.is_locked()).collect::<Vec<_>>(),
            Err(err) => {
                tracing::error!(?err, "failed to list full shards (will retry)");
                Vec::new()
            }
        };

        if candidates.is_empty() {
            let jitter = 0.9 + rand::random::<f64>() * 0.2;
            tokio::select! {
                () = tokio::time::sleep(config.dequeue_interval.mul_f64(jitter)) => (),
                () = &mut shutdown => break,
            }
            continue;
        }

        for row in candidates {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                break;
            };
            let catalog = catalog.clone();
            let pool = pool.clone();
            let pack_options = config.pack_options;
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(err) = pack_shard(&catalog, pool.as_ref(), row.id, &pack_options).await {
                    if !matches!(err, crate::Error::Catalog(winery_catalog::Error::Conflict(_))) {
                        tracing::warn!(shard = %row.name, ?err, "pack attempt failed");
                    }
                }
            });
        }
    }

    let _ = semaphore.acquire_many_owned(config.permits).await;
}
