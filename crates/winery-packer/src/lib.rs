//! The packing pipeline (spec.md §4.6): turns a `full` RW-shard into an
//! immutable RO-shard file on a pool.

mod error;
mod pack;
mod worker;

pub use error::{Error, Result};
pub use pack::{pack_all_full, pack_shard, PackOptions};
pub use worker::{run, Config};

#[cfg(test)]
mod tests {
    use super::*;
    use winery_catalog::Catalog;
    use winery_pool::{DirectoryPool, Pool};

    async fn connect() -> sqlx::PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test");
        let pool = sqlx::PgPool::connect(&url).await.unwrap();
        winery_catalog::migrate(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    #[ignore]
    async fn packs_a_full_shard_into_a_readable_ro_shard() {
        let pg = connect().await;
        let catalog = Catalog::new(pg.clone(), false);
        let dir = tempfile::tempdir().unwrap();
        let fs_pool = DirectoryPool::new(dir.path(), "default");

        let row = catalog.acquire_standby_shard().await.unwrap();
        let locker = winery_catalog::Locker::acquire();
        catalog.begin_writing(row.id, locker).await.unwrap();

        let rw = winery_shard::RwShard::new(&pg, row.name);
        rw.create_table().await.unwrap();
        let mut keys = Vec::new();
        for i in 0..16u8 {
            let content = vec![i; 10];
            let sig = winery_catalog::Signature::of_content(&content);
            rw.add(sig.as_bytes(), &content).await.unwrap();
            keys.push(*sig.as_bytes());
        }
        catalog.mark_full(row.id, locker).await.unwrap();

        let packed = pack_all_full(&catalog, &fs_pool, &PackOptions::default()).await.unwrap();
        assert_eq!(packed, 1);

        let row = catalog.get(row.id).await.unwrap().unwrap();
        assert_eq!(row.state, winery_catalog::ShardState::Packed);

        let ro_path = fs_pool.open_ro(&row.name).await.unwrap();
        let reader = winery_shard::RoShard::open(&ro_path).unwrap();
        assert_eq!(reader.len(), 16);
        for key in keys {
            assert!(reader.get(&key).unwrap().is_some());
        }
    }

    #[tokio::test]
    #[ignore]
    async fn waits_for_an_externally_created_image_when_create_images_is_off() {
        let pg = connect().await;
        let catalog = Catalog::new(pg.clone(), false);
        let dir = tempfile::tempdir().unwrap();
        let fs_pool = DirectoryPool::new(dir.path(), "default");

        let row = catalog.acquire_standby_shard().await.unwrap();
        let locker = winery_catalog::Locker::acquire();
        catalog.begin_writing(row.id, locker).await.unwrap();
        winery_shard::RwShard::new(&pg, row.name)
            .create_table()
            .await
            .unwrap();
        catalog.mark_full(row.id, locker).await.unwrap();

        let options = PackOptions {
            create_images: false,
            image_wait_initial: std::time::Duration::from_millis(10),
            image_wait_max: std::time::Duration::from_millis(50),
            image_wait_deadline: std::time::Duration::from_millis(200),
        };

        // Nobody ever creates the image: `DirectoryPool::create` still
        // succeeds immediately (it only ensures the parent directory
        // exists), so this exercises the non-blocking path of the
        // create_images=false branch rather than a real timeout.
        let packed = pack_all_full(&catalog, &fs_pool, &options).await.unwrap();
        assert_eq!(packed, 1);
    }
}
