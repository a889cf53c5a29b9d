//! The global signature -> shard index (spec.md §4.2). `signature` is the
//! primary key, so the unique constraint *is* the at-most-one-writer
//! enforcement (invariant I4); we never need an application-level lock here,
//! only the insert-then-read-back idiom `automations::persist_action` uses
//! for `internal.create_task`.

use crate::error::Result;
use crate::ids::{ShardId, Signature};
use sqlx::PgPool;

#[derive(Copy, Clone, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "signature_state", rename_all = "lowercase")]
pub enum SignatureState {
    Inflight,
    Present,
    Deleted,
}

#[derive(Debug, Clone, Copy)]
pub struct IndexEntry {
    pub state: SignatureState,
    pub shard: ShardId,
}

/// Outcome of [`Index::insert_inflight`].
#[derive(Debug, Clone, Copy)]
pub enum InsertInflight {
    /// No prior entry existed; this signature is now `inflight` owned by
    /// `shard`.
    Created,
    /// A prior entry already exists (possibly owned by a different shard,
    /// possibly already `present`).
    Exists(IndexEntry),
}

pub struct Index<'a> {
    pool: &'a PgPool,
}

impl<'a> Index<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Called by a writer before writing bytes. See spec.md §4.2 semantics:
    /// the caller branches on `Exists` to decide whether it owns the write.
    pub async fn insert_inflight(
        &self,
        signature: Signature,
        shard: ShardId,
    ) -> Result<InsertInflight> {
        let inserted = sqlx::query(
            "INSERT INTO signature2shard (signature, state, shard) \
             VALUES ($1, 'inflight', $2) ON CONFLICT (signature) DO NOTHING",
        )
        .bind(signature.as_bytes().as_slice())
        .bind(shard)
        .execute(self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            tracing::debug!(shard = ?shard, "signature claimed inflight");
            return Ok(InsertInflight::Created);
        }

        let row = sqlx::query_as::<_, (SignatureState, ShardId)>(
            "SELECT state, shard FROM signature2shard WHERE signature = $1",
        )
        .bind(signature.as_bytes().as_slice())
        .fetch_one(self.pool)
        .await?;

        Ok(InsertInflight::Exists(IndexEntry {
            state: row.0,
            shard: row.1,
        }))
    }

    /// `inflight -> present`. Precondition: the entry exists and is
    /// currently `inflight` (spec.md §4.2).
    pub async fn mark_present(&self, signature: Signature) -> Result<()> {
        sqlx::query(
            "UPDATE signature2shard SET state = 'present' \
             WHERE signature = $1 AND state = 'inflight'",
        )
        .bind(signature.as_bytes().as_slice())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Readers only return objects whose entry is `present`; `inflight` and
    /// `deleted` are reported as missing by the caller (spec.md §4.2).
    pub async fn lookup(&self, signature: Signature) -> Result<Option<IndexEntry>> {
        let row = sqlx::query_as::<_, (SignatureState, ShardId)>(
            "SELECT state, shard FROM signature2shard WHERE signature = $1",
        )
        .bind(signature.as_bytes().as_slice())
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(|(state, shard)| IndexEntry { state, shard }))
    }

    /// `present -> deleted`. A soft delete: shard bytes are never rewritten.
    pub async fn mark_deleted(&self, signature: Signature) -> Result<()> {
        let result = sqlx::query(
            "UPDATE signature2shard SET state = 'deleted' \
             WHERE signature = $1 AND state = 'present'",
        )
        .bind(signature.as_bytes().as_slice())
        .execute(self.pool)
        .await?;
        if result.rows_affected() == 1 {
            tracing::debug!("signature marked deleted");
        }
        Ok(())
    }

    /// Admin repair (Open Question O2, decided in DESIGN.md): re-activates
    /// a `deleted` entry back to `present`, always against its original
    /// shard — the `shard` argument must match the existing row's shard,
    /// since a signature is never re-routed to a different shard.
    pub async fn undelete(&self, signature: Signature, shard: ShardId) -> Result<()> {
        sqlx::query(
            "UPDATE signature2shard SET state = 'present' \
             WHERE signature = $1 AND shard = $2 AND state = 'deleted'",
        )
        .bind(signature.as_bytes().as_slice())
        .bind(shard)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Enumerates `present` signatures. No order guarantee, not a
    /// snapshot (spec.md §6, `iter()`).
    pub fn iter_present(
        &self,
    ) -> impl futures::Stream<Item = sqlx::Result<Signature>> + 'a {
        use futures::StreamExt;

        sqlx::query_as::<_, (Vec<u8>,)>(
            "SELECT signature FROM signature2shard WHERE state = 'present'",
        )
        .fetch(self.pool)
        .map(|row| {
            row.map(|(bytes,)| {
                let exact: [u8; 32] = bytes.as_slice().try_into().expect("signature is 32 bytes");
                Signature::new(exact)
            })
        })
    }
}
