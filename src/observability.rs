use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

/// Counter: booking state transitions. Labels: action.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "salonbook_booking_transitions_total";

/// Counter: slot reservation attempts. Labels: outcome.
pub const SLOT_RESERVATIONS_TOTAL: &str = "salonbook_slot_reservations_total";

/// Counter: rejected authentication attempts. Labels: reason.
pub const AUTH_DENIED_TOTAL: &str = "salonbook_auth_denied_total";

/// Counter: cron job runs. Labels: job, status.
pub const CRON_RUNS_TOTAL: &str = "salonbook_cron_runs_total";

/// Counter: requests refused by the rate limiter.
pub const RATE_LIMITED_TOTAL: &str = "salonbook_rate_limited_total";

/// Counter: outbound notifications. Labels: outcome.
pub const NOTIFICATIONS_TOTAL: &str = "salonbook_notifications_total";

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) -> anyhow::Result<()> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
