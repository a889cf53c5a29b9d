//! Integration test for scenario 6 / property P7 of spec.md §8: several
//! independent workers sharing one Postgres instance converge to roughly
//! the configured aggregate limit, with no central coordinator.

use std::time::{Duration, Instant};
use winery_throttler::{Direction, Limits, Throttler};

async fn connect() -> sqlx::PgPool {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set to run throttler integration tests");
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
async fn aggregate_throughput_converges_to_the_limit() {
    let pool = connect().await;
    const WORKERS: usize = 10;
    const LIMIT_BPS: u64 = 1_000_000;

    let limits = Limits {
        max_bps: LIMIT_BPS,
        live_window: chrono::Duration::seconds(5),
    };

    let mut throttlers = Vec::new();
    for _ in 0..WORKERS {
        throttlers.push(
            Throttler::register(pool.clone(), Direction::Write, Some(limits))
                .await
                .unwrap(),
        );
    }

    // Each worker attempts to push far more than its fair share; the
    // throttler should hold it back to roughly LIMIT_BPS / WORKERS.
    let start = Instant::now();
    let mut total_bytes = 0u64;
    while start.elapsed() < Duration::from_secs(2) {
        for throttler in &throttlers {
            throttler.gate(20_000).await.unwrap();
            total_bytes += 20_000;
        }
    }

    let observed_bps = total_bytes as f64 / start.elapsed().as_secs_f64();
    // Generous tolerance: this is a weak convergence property, not strict
    // fairness, and the test window is short relative to the refresh cycle.
    assert!(
        observed_bps < LIMIT_BPS as f64 * 3.0,
        "observed {observed_bps} bps, expected roughly {LIMIT_BPS} bps"
    );
}
