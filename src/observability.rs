use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservations committed.
pub const BOOKINGS_TOTAL: &str = "reserva_bookings_total";

/// Counter: booking attempts rejected by availability checks.
pub const BOOKING_REJECTIONS_TOTAL: &str = "reserva_booking_rejections_total";

/// Counter: reservation status transitions. Labels: status.
pub const TRANSITIONS_TOTAL: &str = "reserva_transitions_total";

/// Counter: reservations expired by the reaper sweep.
pub const RESERVATIONS_EXPIRED_TOTAL: &str = "reserva_reservations_expired_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "reserva_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (transactions per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "reserva_wal_flush_batch_size";

/// Counter: notification delivery attempts. Labels: channel.
pub const OUTBOX_ATTEMPTS_TOTAL: &str = "reserva_outbox_attempts_total";

/// Counter: deliveries that exhausted their attempt ceiling.
pub const OUTBOX_FAILED_TOTAL: &str = "reserva_outbox_failed_total";

/// Gauge: non-terminal deliveries in the outbox.
pub const OUTBOX_DEPTH: &str = "reserva_outbox_depth";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
