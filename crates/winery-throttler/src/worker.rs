//! Background refresh loop: drains the throttler's observed-bytes counter
//! into its telemetry row on a steady interval, the way every other Winery
//! worker polls the catalog on a jittered timer. `refresh_interval` should
//! be close to 1s per spec.md §4.9; a heartbeat even when idle keeps the
//! row from aging out of other workers' freshness window.

use crate::throttler::Throttler;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Runs until `shutdown` resolves, refreshing `throttler`'s row every
/// `refresh_interval`.
pub async fn run(
    throttler: &Throttler,
    refresh_interval: Duration,
    shutdown: impl std::future::Future<Output = ()>,
) {
    let counter = throttler.observed_counter();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = tokio::time::sleep(refresh_interval) => (),
            () = &mut shutdown => return,
        }

        let bytes = counter.swap(0, Ordering::Relaxed);
        if let Err(err) = throttler.refresh(bytes).await {
            tracing::warn!(?err, "failed to refresh throttler telemetry row");
        }
    }
}
