//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once per process, before the first instance boots.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active registry entries (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connections refused at authentication (counter).
pub const WS_AUTH_FAILURES_TOTAL: &str = "ws_auth_failures_total";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Client frames received (counter).
pub const MESSAGES_RECEIVED_TOTAL: &str = "messages_received_total";
/// Client frames rejected (counter, labels: reason).
pub const MESSAGES_REJECTED_TOTAL: &str = "messages_rejected_total";
/// Envelopes published on the bus (counter).
pub const BUS_PUBLISH_TOTAL: &str = "bus_publish_total";
/// Failed bus publishes (counter).
pub const BUS_PUBLISH_ERRORS_TOTAL: &str = "bus_publish_errors_total";
/// Envelopes received by the relay (counter).
pub const RELAY_ENVELOPES_TOTAL: &str = "relay_envelopes_total";
/// Envelopes the relay could not decode (counter).
pub const RELAY_DECODE_ERRORS_TOTAL: &str = "relay_decode_errors_total";
/// Envelopes addressed to another instance (counter).
pub const RELAY_MISADDRESSED_TOTAL: &str = "relay_misaddressed_total";
/// Frames written to local connections (counter).
pub const DISPATCH_DELIVERED_TOTAL: &str = "dispatch_delivered_total";
/// Recipients with no local connection (counter).
pub const DISPATCH_OFFLINE_TOTAL: &str = "dispatch_offline_total";
/// Connections evicted after a failed write (counter).
pub const DISPATCH_EVICTIONS_TOTAL: &str = "dispatch_evictions_total";
/// Messages dropped because the dispatcher queue stayed full (counter).
pub const DISPATCH_QUEUE_DROPS_TOTAL: &str = "dispatch_queue_drops_total";
/// Failed history writes (counter).
pub const PERSISTENCE_ERRORS_TOTAL: &str = "persistence_errors_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_AUTH_FAILURES_TOTAL,
            WS_CONNECTION_DURATION_SECONDS,
            MESSAGES_RECEIVED_TOTAL,
            MESSAGES_REJECTED_TOTAL,
            BUS_PUBLISH_TOTAL,
            BUS_PUBLISH_ERRORS_TOTAL,
            RELAY_ENVELOPES_TOTAL,
            RELAY_DECODE_ERRORS_TOTAL,
            RELAY_MISADDRESSED_TOTAL,
            DISPATCH_DELIVERED_TOTAL,
            DISPATCH_OFFLINE_TOTAL,
            DISPATCH_EVICTIONS_TOTAL,
            DISPATCH_QUEUE_DROPS_TOTAL,
            PERSISTENCE_ERRORS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{name} is not snake_case"
            );
        }
    }

    #[test]
    fn counters_only_end_in_total() {
        assert!(!WS_CONNECTIONS_ACTIVE.ends_with("_total"));
        assert!(WS_CONNECTION_DURATION_SECONDS.ends_with("_seconds"));
    }
}
