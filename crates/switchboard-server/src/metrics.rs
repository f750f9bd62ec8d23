//! Prometheus recorder and relay metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at startup, before anything is recorded. The handle renders
/// `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Browser connections accepted (counter).
pub const BROWSER_CONNECTIONS_TOTAL: &str = "relay_browser_connections_total";
/// Browser connections closed (counter).
pub const BROWSER_DISCONNECTIONS_TOTAL: &str = "relay_browser_disconnections_total";
/// Live browser connections (gauge).
pub const BROWSER_CONNECTIONS_ACTIVE: &str = "relay_browser_connections_active";
/// Browser connection lifetime seconds (histogram).
pub const BROWSER_CONNECTION_DURATION_SECONDS: &str = "relay_browser_connection_duration_seconds";
/// Upgrade requests refused (counter, labels: reason).
pub const BROWSER_REJECTIONS_TOTAL: &str = "relay_browser_rejections_total";
/// Upstream dials (counter, labels: outcome).
pub const UPSTREAM_CONNECTS_TOTAL: &str = "relay_upstream_connects_total";
/// Start frames replayed onto a new upstream (counter).
pub const RETRANSMITTED_SUBSCRIPTIONS_TOTAL: &str = "relay_retransmitted_subscriptions_total";
/// Control-plane messages handled (counter, labels: event).
pub const BUS_EVENTS_TOTAL: &str = "relay_bus_events_total";
/// Control-plane messages that failed to decode (counter).
pub const BUS_DECODE_ERRORS_TOTAL: &str = "relay_bus_decode_errors_total";
/// Cursor frames dropped on full browser channels (counter).
pub const PRESENCE_DROPS_TOTAL: &str = "relay_presence_drops_total";
