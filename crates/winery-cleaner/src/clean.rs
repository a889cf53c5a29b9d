//! Drops one `packed` shard's RW-shard table once it has been replicated to
//! enough hosts (spec.md §4.8). Between the `packed -> cleaning` transition
//! and the `cleaning -> readonly` transition, readers treat `cleaning`
//! identically to `packed | readonly` and resolve through the RO path, so
//! there is no window where a reader can observe neither form.

use crate::error::{Error, Result};
use winery_catalog::{Catalog, Locker, ShardId, ShardRow};
use winery_shard::rw::RwShard;

/// Cleans shard `id`, which the caller has already fetched in `packed`
/// state with enough mapped hosts. Leaves the shard `packed` (unlocked) if
/// another cleaner won the race.
pub async fn clean_shard(catalog: &Catalog, id: ShardId) -> Result<()> {
    let locker = Locker::acquire();
    let row = catalog.try_acquire_cleaning(id, locker).await?;

    let rw = RwShard::new(catalog.pool(), row.name);
    rw.drop_table().await?;

    catalog.mark_readonly(row.id, locker).await?;
    tracing::info!(shard = %row.name, "dropped rw-shard table, shard is now readonly");
    Ok(())
}

/// Cleans every `packed` shard whose `mapped_on_hosts_when_packed` already
/// meets `min_mapped_hosts`, in no particular order. Used both by the
/// worker loop and by a packer running with `packer.clean_immediately`.
pub async fn clean_all_eligible(catalog: &Catalog, min_mapped_hosts: usize) -> Result<usize> {
    let packed = catalog
        .list_in_state(winery_catalog::ShardState::Packed)
        .await?;

    let mut cleaned = 0;
    for row in packed {
        if !eligible(&row, min_mapped_hosts) {
            continue;
        }
        match clean_shard(catalog, row.id).await {
            Ok(()) => cleaned += 1,
            Err(Error::Catalog(winery_catalog::Error::Conflict(_))) => {
                // Another cleaner won the race for this shard.
            }
            Err(err) => return Err(err),
        }
    }
    Ok(cleaned)
}

fn eligible(row: &ShardRow, min_mapped_hosts: usize) -> bool {
    !row.is_locked() && row.mapped_on_hosts_when_packed.len() >= min_mapped_hosts
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect() -> sqlx::PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test");
        let pool = sqlx::PgPool::connect(&url).await.unwrap();
        winery_catalog::migrate(&pool).await.unwrap();
        pool
    }

    async fn packed_shard(catalog: &Catalog, pg: &sqlx::PgPool) -> ShardRow {
        let row = catalog.acquire_standby_shard().await.unwrap();
        let writer = Locker::acquire();
        catalog.begin_writing(row.id, writer).await.unwrap();
        RwShard::new(pg, row.name).create_table().await.unwrap();
        catalog.mark_full(row.id, writer).await.unwrap();
        let packer = Locker::acquire();
        catalog.try_acquire_packing(row.id, packer).await.unwrap();
        catalog.mark_packed(row.id, packer).await.unwrap()
    }

    #[tokio::test]
    #[ignore]
    async fn waits_for_min_mapped_hosts_then_drops_table() {
        let pg = connect().await;
        let catalog = Catalog::new(pg.clone(), false);
        let packed = packed_shard(&catalog, &pg).await;

        let cleaned = clean_all_eligible(&catalog, 2).await.unwrap();
        assert_eq!(cleaned, 0, "not enough hosts mapped yet");

        catalog
            .record_mapped_host(packed.id, "host-a")
            .await
            .unwrap();
        catalog
            .record_mapped_host(packed.id, "host-b")
            .await
            .unwrap();

        let cleaned = clean_all_eligible(&catalog, 2).await.unwrap();
        assert_eq!(cleaned, 1);

        let row = catalog.get(packed.id).await.unwrap().unwrap();
        assert_eq!(row.state, winery_catalog::ShardState::Readonly);

        // The rw-shard table is really gone: recreating it (as a reader
        // accidentally would) yields an empty table, not the old rows.
        let rw = RwShard::new(&pg, packed.name);
        rw.create_table().await.unwrap();
        assert!(rw.get(b"anything").await.unwrap().is_none());
    }
}
