//! The shard lifecycle state machine (spec.md §4.1) and the `shards` table.
//!
//! Every transition here is a single conditional `UPDATE` that checks the
//! prior `(state, locker)` and rewrites it atomically — the same
//! compare-and-swap-via-SQL technique `automations::server::ready_tasks_iter`
//! uses to dequeue tasks with `FOR UPDATE SKIP LOCKED` plus a heartbeat
//! refresh. A zero-row update is a lost race, not a bug: callers treat it as
//! [`Error::Conflict`] and move on, exactly as a packer "moves on" when
//! another packer won a `full -> packing` transition.

use crate::error::{Error, Result};
use crate::ids::{Locker, ShardId, ShardName};
use sqlx::PgPool;

#[derive(Copy, Clone, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "shard_state", rename_all = "lowercase")]
pub enum ShardState {
    Standby,
    Writing,
    Full,
    Packing,
    Packed,
    Cleaning,
    Readonly,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ShardRow {
    pub id: ShardId,
    pub state: ShardState,
    pub locker_ts: Option<chrono::DateTime<chrono::Utc>>,
    pub locker: Option<uuid::Uuid>,
    pub name: ShardName,
    pub mapped_on_hosts_when_packed: Vec<String>,
}

impl ShardRow {
    pub fn is_locked(&self) -> bool {
        self.locker.is_some()
    }
}

/// Handle to the Postgres catalog database. Threaded explicitly rather than
/// stashed in a singleton, per the "global mutable state" design note in
/// spec.md §9 — each actor reads fresh state at each transition.
#[derive(Clone)]
pub struct Catalog {
    pool: PgPool,
    readonly: bool,
}

impl Catalog {
    pub fn new(pool: PgPool, readonly: bool) -> Self {
        Self { pool, readonly }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(Error::Readonly);
        }
        Ok(())
    }

    /// Finds an unlocked `standby` shard, or creates a fresh one.
    /// Called by a writer that needs a slot (spec.md §3, "created in state standby").
    pub async fn acquire_standby_shard(&self) -> Result<ShardRow> {
        self.check_writable()?;

        if let Some(row) = sqlx::query_as::<_, ShardRow>(
            "SELECT id, state, locker_ts, locker, name, mapped_on_hosts_when_packed \
             FROM shards WHERE state = 'standby' LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok(row);
        }

        let name = ShardName::generate();
        let row = sqlx::query_as::<_, ShardRow>(
            "INSERT INTO shards (state, name) VALUES ('standby', $1) \
             RETURNING id, state, locker_ts, locker, name, mapped_on_hosts_when_packed",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// `standby -> writing`. The writer becomes the shard's locker.
    pub async fn begin_writing(&self, id: ShardId, locker: Locker) -> Result<ShardRow> {
        self.check_writable()?;
        self.transition(id, "standby", None, ShardState::Writing, Some(locker))
            .await
    }

    /// `writing -> standby`, released by the owning writer after
    /// `rw_idle_timeout` with no writes (spec.md §4.1).
    pub async fn release_to_standby(&self, id: ShardId, locker: Locker) -> Result<ShardRow> {
        self.check_writable()?;
        self.transition(id, "writing", Some(locker), ShardState::Standby, None)
            .await
    }

    /// `writing -> full`, either because cumulative size crossed
    /// `shards.max_size` or the writer voluntarily released the shard.
    pub async fn mark_full(&self, id: ShardId, locker: Locker) -> Result<ShardRow> {
        self.check_writable()?;
        self.transition(id, "writing", Some(locker), ShardState::Full, None)
            .await
    }

    /// `full -> packing`, claimed by any packer. Returns `Conflict` if
    /// another packer already won the race.
    pub async fn try_acquire_packing(&self, id: ShardId, locker: Locker) -> Result<ShardRow> {
        self.transition(id, "full", None, ShardState::Packing, Some(locker))
            .await
    }

    /// Reclaims a `packing` shard whose locker has not refreshed within
    /// `reclaim_after`, per the Recovery rule of spec.md §4.1 and the O1
    /// decision in DESIGN.md: the packer (and only the packer) actively
    /// reclaims stale `packing` locks to preserve forward progress.
    pub async fn reclaim_stale_packing(
        &self,
        reclaim_after: chrono::Duration,
    ) -> Result<Vec<ShardRow>> {
        let cutoff = chrono::Utc::now() - reclaim_after;
        let rows = sqlx::query_as::<_, ShardRow>(
            "UPDATE shards SET state = 'full', locker = NULL, locker_ts = NULL \
             WHERE state = 'packing' AND locker_ts < $1 \
             RETURNING id, state, locker_ts, locker, name, mapped_on_hosts_when_packed",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// `packing -> full`, unlocked, on a failed pack attempt.
    pub async fn fail_packing(&self, id: ShardId, locker: Locker) -> Result<ShardRow> {
        self.transition(id, "packing", Some(locker), ShardState::Full, None)
            .await
    }

    /// `packing -> packed`, clearing the locker. From this point readers
    /// resolve the shard through the RO path (spec.md §4.6 step 5).
    pub async fn mark_packed(&self, id: ShardId, locker: Locker) -> Result<ShardRow> {
        self.transition(id, "packing", Some(locker), ShardState::Packed, None)
            .await
    }

    /// Records that `host` has successfully mapped this shard's RO image
    /// read-only (spec.md §4.7). Idempotent: re-running the pool manager
    /// must not duplicate the host name.
    pub async fn record_mapped_host(&self, id: ShardId, host: &str) -> Result<ShardRow> {
        let row = sqlx::query_as::<_, ShardRow>(
            "UPDATE shards SET mapped_on_hosts_when_packed = \
                array_append(mapped_on_hosts_when_packed, $2) \
             WHERE id = $1 AND NOT ($2 = ANY(mapped_on_hosts_when_packed)) \
             RETURNING id, state, locker_ts, locker, name, mapped_on_hosts_when_packed",
        )
        .bind(id)
        .bind(host)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row),
            // Host already recorded, or shard vanished; read back current state.
            None => self.get(id).await?.ok_or(Error::NotFound),
        }
    }

    /// `packed -> cleaning`, claimed by a cleaner once
    /// `|mapped_on_hosts_when_packed| >= min_mapped_hosts` (checked by the
    /// caller; spec.md §4.8).
    pub async fn try_acquire_cleaning(&self, id: ShardId, locker: Locker) -> Result<ShardRow> {
        self.transition(id, "packed", None, ShardState::Cleaning, Some(locker))
            .await
    }

    /// `cleaning -> readonly`, clearing the locker, after the RW-shard
    /// table has been dropped.
    pub async fn mark_readonly(&self, id: ShardId, locker: Locker) -> Result<ShardRow> {
        self.transition(id, "cleaning", Some(locker), ShardState::Readonly, None)
            .await
    }

    pub async fn get(&self, id: ShardId) -> Result<Option<ShardRow>> {
        let row = sqlx::query_as::<_, ShardRow>(
            "SELECT id, state, locker_ts, locker, name, mapped_on_hosts_when_packed \
             FROM shards WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Lists unlocked shards in `state`, for workers scanning for candidates
    /// (packer scans `full`, cleaner scans `packed`, pool manager scans
    /// `standby|writing|packed|cleaning|readonly`).
    pub async fn list_in_state(&self, state: ShardState) -> Result<Vec<ShardRow>> {
        let rows = sqlx::query_as::<_, ShardRow>(
            "SELECT id, state, locker_ts, locker, name, mapped_on_hosts_when_packed \
             FROM shards WHERE state = $1",
        )
        .bind(state)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// The generic conditional-UPDATE transition. `from` is a raw SQL enum
    /// literal rather than `ShardState` so the `locker IS NULL` fast path
    /// below can be expressed once; `expect_locker = None` means "must be
    /// unlocked", `Some(l)` means "must be locked by exactly `l`".
    async fn transition(
        &self,
        id: ShardId,
        from: &str,
        expect_locker: Option<Locker>,
        to: ShardState,
        set_locker: Option<Locker>,
    ) -> Result<ShardRow> {
        let (locker_id, locker_ts) = match set_locker {
            Some(l) => (Some(l.id), Some(l.at)),
            None => (None, None),
        };

        let row = match expect_locker {
            Some(l) => {
                sqlx::query_as::<_, ShardRow>(
                    "UPDATE shards SET state = $1, locker = $2, locker_ts = $3 \
                     WHERE id = $4 AND state = $5::shard_state AND locker = $6 \
                     RETURNING id, state, locker_ts, locker, name, mapped_on_hosts_when_packed",
                )
                .bind(to)
                .bind(locker_id)
                .bind(locker_ts)
                .bind(id)
                .bind(from)
                .bind(l.id)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ShardRow>(
                    "UPDATE shards SET state = $1, locker = $2, locker_ts = $3 \
                     WHERE id = $4 AND state = $5::shard_state AND locker IS NULL \
                     RETURNING id, state, locker_ts, locker, name, mapped_on_hosts_when_packed",
                )
                .bind(to)
                .bind(locker_id)
                .bind(locker_ts)
                .bind(id)
                .bind(from)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        match row {
            Some(row) => {
                tracing::debug!(shard_id = ?id, from, to = ?to, "shard transitioned");
                Ok(row)
            }
            None => {
                tracing::debug!(shard_id = ?id, from, to = ?to, "lost race on shard transition");
                Err(Error::Conflict(id))
            }
        }
    }
}
