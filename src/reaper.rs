use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::model::ReservationStatus;
use crate::observability;

/// Background sweep that expires stale active reservations: the time-based
/// external trigger behind the `expired` status. Each victim goes through
/// the normal transition path, so history and notifications are uniform.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_millis(
        engine.config().sweep_interval_ms as u64,
    ));
    loop {
        interval.tick().await;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let stale = engine.collect_stale_active(now);
        for id in stale {
            match engine
                .transition_reservation(id, ReservationStatus::Expired, "system", None)
                .await
            {
                Ok(_) => {
                    info!("expired stale reservation {id}");
                    metrics::counter!(observability::RESERVATIONS_EXPIRED_TOTAL).increment(1);
                }
                Err(e) => {
                    // May have moved to a terminal status since the scan
                    tracing::debug!("reaper skip {id}: {e}");
                }
            }
        }
    }
}

/// Rewrites the WAL once enough appends have accumulated since the last
/// compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("WAL compacted"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}
