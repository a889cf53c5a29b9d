//! The cluster-wide I/O throttler (spec.md §4.9, C9). Every worker process
//! owns one row in `t_read` or `t_write`, refreshes it with its recent
//! bytes-per-second on a timer, and before each I/O queries the live
//! aggregate across all workers' rows to compute its fair share `L/N`. There
//! is no coordinator and no strict fairness guarantee, only convergence
//! over windows much longer than the refresh interval — the same weak,
//! DB-mediated coordination style the catalog uses for shard locks, applied
//! to a credit counter instead of a state machine.

use crate::error::{Error, Result};
use sqlx::PgPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    fn table(self) -> &'static str {
        match self {
            Direction::Read => "t_read",
            Direction::Write => "t_write",
        }
    }
}

/// `throttler.max_read_bps` / `throttler.max_write_bps`; the whole section
/// may be omitted to disable throttling entirely (spec.md §6).
#[derive(Copy, Clone, Debug)]
pub struct Limits {
    pub max_bps: u64,
    /// Rows older than this are excluded from the aggregate: a dead
    /// worker's stale row must not suppress everyone else's share.
    pub live_window: chrono::Duration,
}

struct Credit {
    bytes_since_start: u64,
    started: Instant,
}

/// One worker's handle to a throttled direction (reads or writes). Disabled
/// (`limits: None`) throttlers gate instantly and never touch the database.
pub struct Throttler {
    pool: Option<PgPool>,
    row_id: Option<i32>,
    direction: Direction,
    limits: Option<Limits>,
    observed: Arc<AtomicU64>,
    credit: Mutex<Credit>,
}

impl Throttler {
    /// Inserts this worker's telemetry row (if throttling is enabled) and
    /// returns a handle. Call once per process per direction at startup.
    pub async fn register(
        pool: PgPool,
        direction: Direction,
        limits: Option<Limits>,
    ) -> Result<Self> {
        let row_id = match limits {
            Some(_) => {
                let sql = format!(
                    "INSERT INTO {} (updated, bytes) VALUES (NOW(), 0) RETURNING id",
                    direction.table()
                );
                let (id,): (i32,) = sqlx::query_as(&sql)
                    .fetch_one(&pool)
                    .await
                    .map_err(Error::Throttled)?;
                Some(id)
            }
            None => None,
        };

        Ok(Self {
            pool: limits.map(|_| pool),
            row_id,
            direction,
            limits,
            observed: Arc::new(AtomicU64::new(0)),
            credit: Mutex::new(Credit {
                bytes_since_start: 0,
                started: Instant::now(),
            }),
        })
    }

    /// A throttler with no DB row that never delays I/O, for when
    /// `throttler.*` config is omitted (spec.md §6).
    pub fn disabled(direction: Direction) -> Self {
        Self {
            pool: None,
            row_id: None,
            direction,
            limits: None,
            observed: Arc::new(AtomicU64::new(0)),
            credit: Mutex::new(Credit {
                bytes_since_start: 0,
                started: Instant::now(),
            }),
        }
    }

    /// Shared counter the background refresh loop drains; `gate` adds to it
    /// on every call so the next refresh reports real throughput.
    pub(crate) fn observed_counter(&self) -> Arc<AtomicU64> {
        self.observed.clone()
    }

    pub(crate) fn pool(&self) -> Option<&PgPool> {
        self.pool.as_ref()
    }

    pub(crate) fn row_id(&self) -> Option<i32> {
        self.row_id
    }

    pub(crate) fn direction(&self) -> Direction {
        self.direction
    }

    /// Writes the bytes observed since the last refresh into this worker's
    /// row. Called by [`crate::worker::run`] on a ~1s timer (spec.md §4.9).
    pub async fn refresh(&self, bytes_since_last_refresh: u64) -> Result<()> {
        let (Some(pool), Some(id)) = (&self.pool, self.row_id) else {
            return Ok(());
        };
        let sql = format!("UPDATE {} SET updated = NOW(), bytes = $1 WHERE id = $2", self.direction.table());
        sqlx::query(&sql)
            .bind(bytes_since_last_refresh as i32)
            .bind(id)
            .execute(pool)
            .await
            .map_err(Error::Throttled)?;
        Ok(())
    }

    /// Gates an I/O of `bytes`, sleeping as needed so this worker's share of
    /// the cluster aggregate stays near `max_bps / N` (spec.md §4.9). Counts
    /// `bytes` toward the next refresh regardless of outcome.
    pub async fn gate(&self, bytes: u64) -> Result<()> {
        self.observed.fetch_add(bytes, Ordering::Relaxed);

        let Some(limits) = self.limits else {
            return Ok(());
        };
        let pool = self.pool.as_ref().expect("limits implies a registered pool");

        let cutoff = chrono::Utc::now() - limits.live_window;
        let sql = format!(
            "SELECT COALESCE(SUM(bytes), 0)::BIGINT, COUNT(*) FROM {} WHERE updated > $1",
            self.direction.table()
        );
        let (aggregate_bytes, n): (i64, i64) = sqlx::query_as(&sql)
            .bind(cutoff.naive_utc())
            .fetch_one(pool)
            .await
            .map_err(Error::Throttled)?;

        // Only self-throttle once the cluster aggregate is actually near the
        // configured limit L; below that every worker writes at will
        // (spec.md §4.9).
        if (aggregate_bytes.max(0) as u64) <= limits.max_bps {
            let mut credit = self.credit.lock().await;
            credit.bytes_since_start = 0;
            credit.started = Instant::now();
            return Ok(());
        }

        // Our own row may not yet reflect `bytes` (it refreshes on its own
        // timer), but we are certainly one of the `n` workers sharing `L`.
        let n = n.max(1) as u64;
        let share_bps = (limits.max_bps / n).max(1);

        let mut credit = self.credit.lock().await;
        credit.bytes_since_start += bytes;
        let required = Duration::from_secs_f64(credit.bytes_since_start as f64 / share_bps as f64);
        let elapsed = credit.started.elapsed();
        if required > elapsed {
            let wait = required - elapsed;
            tracing::debug!(?wait, share_bps, n, "throttling i/o to cluster share");
            tokio::time::sleep(wait).await;
        }
        // Reset the bucket periodically so `bytes_since_start`/`elapsed`
        // don't grow without bound over a long-lived worker.
        if credit.started.elapsed() > Duration::from_secs(60) {
            credit.bytes_since_start = 0;
            credit.started = Instant::now();
        }
        Ok(())
    }
}
