//! The catalog: the only durable shared state in Winery (spec.md §2, C1).
//! Owns the Postgres schema (`shards`, `signature2shard`, `t_read`/`t_write`)
//! and the access layer other crates build on.

mod error;
mod ids;
pub mod index;
pub mod shard;

pub use error::{Error, Result};
pub use ids::{InvalidShardName, Locker, ShardId, ShardName, Signature};
pub use index::{IndexEntry, InsertInflight, SignatureState};
pub use shard::{Catalog, ShardRow, ShardState};

/// Applies the embedded schema migrations, following
/// `control::cmd::setup::setup_database`'s use of `sqlx::migrate!`. Safe to
/// call repeatedly: already-applied migrations are skipped.
pub async fn migrate(pool: &sqlx::PgPool) -> sqlx::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
