use winery_catalog::index::{Index, InsertInflight, SignatureState};
use winery_catalog::{Catalog, Locker, Signature};

async fn connect() -> sqlx::PgPool {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set to run catalog integration tests");
    let pool = sqlx::PgPool::connect(&url)
        .await
        .expect("failed to connect to test database");
    winery_catalog::migrate(&pool)
        .await
        .expect("failed to run catalog migrations");
    pool
}

#[tokio::test]
#[ignore]
async fn at_most_one_present_entry_per_signature() {
    let pool = connect().await;
    let catalog = Catalog::new(pool.clone(), false);
    let index = Index::new(&pool);

    let shard_a = catalog.acquire_standby_shard().await.unwrap();
    let writer_a = Locker::acquire();
    catalog.begin_writing(shard_a.id, writer_a).await.unwrap();

    let sig = Signature::of_content(b"hello world");

    let outcome = index.insert_inflight(sig, shard_a.id).await.unwrap();
    assert!(matches!(outcome, InsertInflight::Created));

    // A second writer racing the same signature against a different shard
    // sees the first writer's shard and does not get ownership.
    let shard_b = catalog.acquire_standby_shard().await.unwrap();
    let outcome = index.insert_inflight(sig, shard_b.id).await.unwrap();
    match outcome {
        InsertInflight::Exists(entry) => {
            assert_eq!(entry.shard, shard_a.id);
            assert_eq!(entry.state, SignatureState::Inflight);
        }
        InsertInflight::Created => panic!("second writer should not have created the row"),
    }

    index.mark_present(sig).await.unwrap();
    let entry = index.lookup(sig).await.unwrap().unwrap();
    assert_eq!(entry.state, SignatureState::Present);
    assert_eq!(entry.shard, shard_a.id);
}

#[tokio::test]
#[ignore]
async fn deleted_signatures_read_as_missing() {
    let pool = connect().await;
    let catalog = Catalog::new(pool.clone(), false);
    let index = Index::new(&pool);

    let shard = catalog.acquire_standby_shard().await.unwrap();
    let sig = Signature::of_content(b"delete me");

    index.insert_inflight(sig, shard.id).await.unwrap();
    index.mark_present(sig).await.unwrap();
    index.mark_deleted(sig).await.unwrap();

    let entry = index.lookup(sig).await.unwrap().unwrap();
    assert_eq!(entry.state, SignatureState::Deleted);

    index.undelete(sig, shard.id).await.unwrap();
    let entry = index.lookup(sig).await.unwrap().unwrap();
    assert_eq!(entry.state, SignatureState::Present);
}
