//! Integration tests against a real Postgres instance, following the
//! teacher workspace's `control::tests::support::test_database` pattern of
//! running catalog tests against a real database rather than a mock.
//!
//! These require `DATABASE_URL` to point at a scratch Postgres instance and
//! are marked `#[ignore]` so a plain `cargo test` (with no database
//! available) still passes; run with `cargo test -- --ignored` in an
//! environment with Postgres.

use winery_catalog::{shard::ShardState, Catalog, Locker};

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
async fn shard_transitions_follow_the_lifecycle_graph() {
    let pool = connect().await;
    let catalog = Catalog::new(pool, false);

    let shard = catalog.acquire_standby_shard().await.unwrap();
    assert_eq!(shard.state, ShardState::Standby);

    let writer = Locker::acquire();
    let shard = catalog.begin_writing(shard.id, writer).await.unwrap();
    assert_eq!(shard.state, ShardState::Writing);

    let shard = catalog.mark_full(shard.id, writer).await.unwrap();
    assert_eq!(shard.state, ShardState::Full);

    let packer = Locker::acquire();
    let shard = catalog
        .try_acquire_packing(shard.id, packer)
        .await
        .unwrap();
    assert_eq!(shard.state, ShardState::Packing);

    // A second packer racing the same shard loses.
    let other_packer = Locker::acquire();
    let err = catalog
        .try_acquire_packing(shard.id, other_packer)
        .await
        .unwrap_err();
    assert!(matches!(err, winery_catalog::Error::Conflict(_)));

    let shard = catalog.mark_packed(shard.id, packer).await.unwrap();
    assert_eq!(shard.state, ShardState::Packed);
    assert!(shard.mapped_on_hosts_when_packed.is_empty());

    let shard = catalog
        .record_mapped_host(shard.id, "host-a")
        .await
        .unwrap();
    assert_eq!(shard.mapped_on_hosts_when_packed, vec!["host-a".to_string()]);

    // Recording the same host twice is idempotent.
    let shard = catalog
        .record_mapped_host(shard.id, "host-a")
        .await
        .unwrap();
    assert_eq!(shard.mapped_on_hosts_when_packed.len(), 1);

    let cleaner = Locker::acquire();
    let shard = catalog
        .try_acquire_cleaning(shard.id, cleaner)
        .await
        .unwrap();
    assert_eq!(shard.state, ShardState::Cleaning);

    let shard = catalog.mark_readonly(shard.id, cleaner).await.unwrap();
    assert_eq!(shard.state, ShardState::Readonly);
}

#[tokio::test]
#[ignore]
async fn packing_lock_is_reclaimed_after_ttl() {
    let pool = connect().await;
    let catalog = Catalog::new(pool, false);

    let shard = catalog.acquire_standby_shard().await.unwrap();
    let writer = Locker::acquire();
    catalog.begin_writing(shard.id, writer).await.unwrap();
    catalog.mark_full(shard.id, writer).await.unwrap();

    let dead_packer = Locker::acquire();
    catalog
        .try_acquire_packing(shard.id, dead_packer)
        .await
        .unwrap();

    // Not yet stale: a long TTL keeps the lock held.
    let reclaimed = catalog
        .reclaim_stale_packing(chrono::Duration::hours(1))
        .await
        .unwrap();
    assert!(reclaimed.iter().all(|s| s.id != shard.id));

    // A zero TTL reclaims immediately, simulating a crashed packer.
    let reclaimed = catalog
        .reclaim_stale_packing(chrono::Duration::zero())
        .await
        .unwrap();
    assert!(reclaimed.iter().any(|s| s.id == shard.id));

    let fresh = catalog.get(shard.id).await.unwrap().unwrap();
    assert_eq!(fresh.state, ShardState::Full);
    assert!(!fresh.is_locked());
}
