//! The pool manager (spec.md §4.7): a background loop on every host that
//! wants to serve reads, ensuring every `readonly`, `packed`, and
//! `cleaning` shard is mapped locally and recording that fact in the
//! catalog; optionally also provisioning pool artifacts for `standby` and
//! `writing` shards when `manage_rw_images` delegates that to this
//! manager. Shaped like `automations::server::ready_tasks_iter` minus the
//! locker dance — mapping and provisioning are both idempotent and
//! side-effect-free to repeat, so there is nothing to compare-and-swap,
//! only a scan-and-converge loop.

use crate::pool::Pool;
use std::sync::Arc;
use std::time::Duration;
use winery_catalog::{Catalog, ShardState};

/// Shard states a read-only mapping is expected to exist for, once a shard
/// has been packed (spec.md §4.7): `packed` and `cleaning` are still
/// served from the RO-shard file exactly like `readonly` is.
const RO_MAPPED_STATES: [ShardState; 3] = [ShardState::Packed, ShardState::Cleaning, ShardState::Readonly];

/// Shard states whose pool artifact this manager provisions when
/// `manage_rw_images` is set (spec.md §4.7).
const RW_PROVISIONED_STATES: [ShardState; 2] = [ShardState::Standby, ShardState::Writing];

/// Runs until `shutdown` resolves. `host` identifies this machine in
/// `shards.mapped_on_hosts_when_packed`. `manage_rw_images` mirrors the
/// `packer.create_images`-style config switch from spec.md §6: when set,
/// this manager also provisions a pool artifact for every `standby` and
/// `writing` shard it sees, instead of leaving that to the writer/packer.
pub async fn run(
    catalog: Catalog,
    pool: Arc<dyn Pool>,
    host: String,
    manage_rw_images: bool,
    scan_interval: Duration,
    shutdown: impl std::future::Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    loop {
        if let Err(err) = scan_once(&catalog, pool.as_ref(), &host, manage_rw_images).await {
            tracing::error!(?err, "pool manager scan failed (will retry)");
        }

        let jitter = 0.9 + rand::random::<f64>() * 0.2;
        tokio::select! {
            () = tokio::time::sleep(scan_interval.mul_f64(jitter)) => (),
            () = &mut shutdown => return,
        }
    }
}

/// One pass: maps every `packed | cleaning | readonly` shard this host
/// hasn't recorded yet, and (if `manage_rw_images`) provisions a pool
/// artifact for every `standby | writing` shard. Exposed separately from
/// [`run`] so tests (and a one-shot CLI invocation) can drive a single
/// scan deterministically.
pub async fn scan_once(
    catalog: &Catalog,
    pool: &dyn Pool,
    host: &str,
    manage_rw_images: bool,
) -> Result<(), crate::error::Error> {
    for state in RO_MAPPED_STATES {
        let shards = catalog.list_in_state(state).await?;
        for shard in shards {
            if shard.mapped_on_hosts_when_packed.iter().any(|h| h == host) {
                continue;
            }

            match pool.open_ro(&shard.name).await {
                Ok(_path) => {
                    catalog.record_mapped_host(shard.id, host).await?;
                    tracing::debug!(shard = %shard.name, host, ?state, "mapped shard on host");
                }
                Err(crate::error::Error::PoolUnavailable) => {
                    tracing::warn!(shard = %shard.name, "pool driver unavailable, will retry mapping later");
                }
                Err(crate::error::Error::NotFound) => {
                    tracing::warn!(shard = %shard.name, ?state, "shard missing from pool");
                }
                Err(err) => return Err(err),
            }
        }
    }

    if manage_rw_images {
        for state in RW_PROVISIONED_STATES {
            let shards = catalog.list_in_state(state).await?;
            for shard in shards {
                match pool.create(&shard.name, None).await {
                    Ok(_path) => {
                        tracing::debug!(shard = %shard.name, ?state, "provisioned rw pool artifact");
                    }
                    Err(crate::error::Error::PoolUnavailable) => {
                        tracing::warn!(shard = %shard.name, "pool driver unavailable, cannot provision rw artifact yet");
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DirectoryPool;

    async fn connect() -> sqlx::PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test");
        let pool = sqlx::PgPool::connect(&url).await.unwrap();
        winery_catalog::migrate(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    #[ignore]
    async fn scan_once_maps_unmapped_packed_shards() {
        let pg = connect().await;
        let catalog = Catalog::new(pg, false);
        let dir = tempfile::tempdir().unwrap();
        let pool = DirectoryPool::new(dir.path(), "default");

        let row = catalog.acquire_standby_shard().await.unwrap();
        let locker = winery_catalog::Locker::acquire();
        catalog.begin_writing(row.id, locker).await.unwrap();
        catalog.mark_full(row.id, locker).await.unwrap();
        let locker2 = winery_catalog::Locker::acquire();
        catalog.try_acquire_packing(row.id, locker2).await.unwrap();
        let packed = catalog.mark_packed(row.id, locker2).await.unwrap();

        let path = pool.create(&packed.name, None).await.unwrap();
        tokio::fs::write(&path, b"fake packed bytes").await.unwrap();

        scan_once(&catalog, &pool, "host-a", false).await.unwrap();
        let row = catalog.get(packed.id).await.unwrap().unwrap();
        assert_eq!(row.mapped_on_hosts_when_packed, vec!["host-a".to_string()]);

        // Idempotent: scanning again does not duplicate the host entry.
        scan_once(&catalog, &pool, "host-a", false).await.unwrap();
        let row = catalog.get(packed.id).await.unwrap().unwrap();
        assert_eq!(row.mapped_on_hosts_when_packed, vec!["host-a".to_string()]);
    }

    #[tokio::test]
    #[ignore]
    async fn scan_once_maps_cleaning_and_readonly_shards_too() {
        let pg = connect().await;
        let catalog = Catalog::new(pg, false);
        let dir = tempfile::tempdir().unwrap();
        let pool = DirectoryPool::new(dir.path(), "default");

        let row = catalog.acquire_standby_shard().await.unwrap();
        let writer = winery_catalog::Locker::acquire();
        catalog.begin_writing(row.id, writer).await.unwrap();
        catalog.mark_full(row.id, writer).await.unwrap();
        let packer = winery_catalog::Locker::acquire();
        catalog.try_acquire_packing(row.id, packer).await.unwrap();
        let packed = catalog.mark_packed(row.id, packer).await.unwrap();
        let path = pool.create(&packed.name, None).await.unwrap();
        tokio::fs::write(&path, b"fake packed bytes").await.unwrap();

        let cleaner = winery_catalog::Locker::acquire();
        catalog.try_acquire_cleaning(packed.id, cleaner).await.unwrap();

        // A host that joins while the shard is mid-`cleaning` must still
        // be able to record its mapping (spec.md §4.7).
        scan_once(&catalog, &pool, "host-b", false).await.unwrap();
        let row = catalog.get(packed.id).await.unwrap().unwrap();
        assert!(row.mapped_on_hosts_when_packed.contains(&"host-b".to_string()));

        catalog.mark_readonly(packed.id, cleaner).await.unwrap();

        // And again once it reaches `readonly`, for a host joining even
        // later.
        scan_once(&catalog, &pool, "host-c", false).await.unwrap();
        let row = catalog.get(packed.id).await.unwrap().unwrap();
        assert!(row.mapped_on_hosts_when_packed.contains(&"host-c".to_string()));
    }

    #[tokio::test]
    #[ignore]
    async fn manage_rw_images_provisions_standby_and_writing_shards() {
        let pg = connect().await;
        let catalog = Catalog::new(pg, false);
        let dir = tempfile::tempdir().unwrap();
        let pool = DirectoryPool::new(dir.path(), "default");

        let row = catalog.acquire_standby_shard().await.unwrap();

        // With `manage_rw_images` off, scanning a `standby` shard does
        // nothing to the pool (no directory is created).
        scan_once(&catalog, &pool, "host-a", false).await.unwrap();
        assert!(!tokio::fs::try_exists(dir.path().join("default")).await.unwrap());

        // With it on, scanning provisions the pool artifact for both
        // `standby` and (after the writer claims it) `writing` shards;
        // rerunning is a harmless no-op.
        scan_once(&catalog, &pool, "host-a", true).await.unwrap();
        assert!(tokio::fs::try_exists(dir.path().join("default")).await.unwrap());

        let writer = winery_catalog::Locker::acquire();
        catalog.begin_writing(row.id, writer).await.unwrap();
        scan_once(&catalog, &pool, "host-a", true).await.unwrap();
    }
}
