//! The cleaner's poll loop: same jittered-scan shape as
//! `winery_packer::worker`/`automations::server::ready_tasks_iter`, minus
//! the semaphore — dropping a table is one round trip, not worth gating
//! behind a permit budget per shard.

use crate::clean::clean_all_eligible;
use std::time::Duration;
use winery_catalog::Catalog;

pub struct Config {
    /// Minimum number of hosts that must have mapped a shard read-only
    /// before its RW-shard table may be dropped (spec.md §4.8).
    pub min_mapped_hosts: usize,
    /// Sleep between scans when nothing was eligible to clean.
    pub scan_interval: Duration,
}

/// Runs until `shutdown` resolves.
pub async fn run(catalog: Catalog, config: Config, shutdown: impl std::future::Future<Output = ()>) {
    tokio::pin!(shutdown);
    loop {
        match clean_all_eligible(&catalog, config.min_mapped_hosts).await {
            Ok(cleaned) if cleaned > 0 => tracing::info!(cleaned, "cleaned rw-shards"),
            Ok(_) => (),
            Err(err) => tracing::error!(?err, "cleaner scan failed (will retry)"),
        }

        let jitter = 0.9 + rand::random::<f64>() * 0.2;
        tokio::select! {
            () = tokio::time::sleep(config.scan_interval.mul_f64(jitter)) => (),
            () = &mut shutdown => return,
        }
    }
}
