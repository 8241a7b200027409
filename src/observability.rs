use std::net::SocketAddr;

// ── Availability ────────────────────────────────────────────────

/// Counter: availability refreshes. Labels: trigger, outcome.
pub const REFRESH_TOTAL: &str = "slotclaim_refresh_total";

/// Histogram: availability read latency in seconds.
pub const REFRESH_DURATION_SECONDS: &str = "slotclaim_refresh_duration_seconds";

/// Counter: selected slots removed because the cache reported them claimed.
pub const SELECTION_PRUNED_TOTAL: &str = "slotclaim_selection_pruned_total";

// ── Submissions ─────────────────────────────────────────────────

/// Counter: reservation submissions. Labels: kind, outcome.
pub const SUBMISSIONS_TOTAL: &str = "slotclaim_submissions_total";

/// Histogram: reservation round-trip in seconds. Labels: kind.
pub const SUBMISSION_DURATION_SECONDS: &str = "slotclaim_submission_duration_seconds";

// ── Background work ─────────────────────────────────────────────

/// Gauge: running poll loops.
pub const POLLERS_ACTIVE: &str = "slotclaim_pollers_active";

/// Counter: queue-status polls. Labels: outcome.
pub const QUEUE_REFRESH_TOTAL: &str = "slotclaim_queue_refresh_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), String> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus metrics exporter: {e}"))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
