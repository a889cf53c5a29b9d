//! The RW-shard: a per-shard mutable table storing `(key -> content)`
//! (spec.md §4.3). The table name is derived deterministically from the
//! shard's name, pairing it with its `shards` row without needing a
//! separate lookup table.

use futures::Stream;
use sqlx::PgPool;
use winery_catalog::ShardName;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error")]
    Sqlx(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Written {
    Written,
    Existed,
}

fn table_name(name: ShardName) -> String {
    format!("rw_shard_{}", name.as_str())
}

/// Handle to one RW-shard's backing table.
pub struct RwShard<'a> {
    pool: &'a PgPool,
    table: String,
    select_all_sql: String,
}

impl<'a> RwShard<'a> {
    pub fn new(pool: &'a PgPool, name: ShardName) -> Self {
        let table = table_name(name);
        let select_all_sql = format!("SELECT key, content FROM {table}");
        Self {
            pool,
            table,
            select_all_sql,
        }
    }

    /// Creates the backing table. Called once when a shard first becomes
    /// `writing`.
    pub async fn create_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (key BYTEA PRIMARY KEY, content BYTEA NOT NULL)",
            self.table
        );
        sqlx::query(&sql).execute(self.pool).await?;
        Ok(())
    }

    /// `INSERT ... ON CONFLICT DO NOTHING`. Combined with the index update
    /// in the same transaction by the writer facade, this yields
    /// exactly-once semantics per `(signature, shard)` (spec.md §4.3).
    pub async fn add(&self, key: &[u8], content: &[u8]) -> Result<Written> {
        let sql = format!(
            "INSERT INTO {} (key, content) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING",
            self.table
        );
        let result = sqlx::query(&sql).bind(key).bind(content).execute(self.pool).await?;
        Ok(if result.rows_affected() == 1 {
            Written::Written
        } else {
            Written::Existed
        })
    }

    /// Same as [`RwShard::add`], but executed against an explicit
    /// transaction so the caller can combine it with the index update in
    /// one commit.
    pub async fn add_in<'t>(
        &self,
        txn: &mut sqlx::Transaction<'t, sqlx::Postgres>,
        key: &[u8],
        content: &[u8],
    ) -> Result<Written> {
        let sql = format!(
            "INSERT INTO {} (key, content) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(key)
            .bind(content)
            .execute(&mut **txn)
            .await?;
        Ok(if result.rows_affected() == 1 {
            Written::Written
        } else {
            Written::Existed
        })
    }

    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let sql = format!("SELECT content FROM {} WHERE key = $1", self.table);
        let row: Option<(Vec<u8>,)> = sqlx::query_as(&sql).bind(key).fetch_optional(self.pool).await?;
        Ok(row.map(|(content,)| content))
    }

    pub async fn contains(&self, key: &[u8]) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE key = $1", self.table);
        let row: Option<(i32,)> = sqlx::query_as(&sql).bind(key).fetch_optional(self.pool).await?;
        Ok(row.is_some())
    }

    /// Sum of content lengths: the shard's logical size, used for the fill
    /// decision against `shards.max_size` (spec.md §4.3, §8 O3).
    pub async fn size(&self) -> Result<i64> {
        let sql = format!("SELECT COALESCE(SUM(octet_length(content)), 0) FROM {}", self.table);
        let (size,): (i64,) = sqlx::query_as(&sql).fetch_one(self.pool).await?;
        Ok(size)
    }

    /// Destroys the backing table. Only permitted while the shard is in
    /// state `cleaning` — enforced by the caller (the cleaner), which only
    /// invokes this after winning the `packed -> cleaning` transition.
    pub async fn drop_table(&self) -> Result<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", self.table);
        sqlx::query(&sql).execute(self.pool).await?;
        Ok(())
    }

    /// Used by the packer: a lazy, order-unspecified but stable-within-one-
    /// iteration sequence of `(key, content)`. The query string is owned by
    /// `self.table` and pre-built in [`RwShard::new`] below it, so the
    /// returned stream only needs to borrow `self`.
    pub fn iter<'s>(&'s self) -> impl Stream<Item = sqlx::Result<(Vec<u8>, Vec<u8>)>> + 's {
        sqlx::query_as::<_, (Vec<u8>, Vec<u8>)>(&self.select_all_sql).fetch(self.pool)
    }
}
