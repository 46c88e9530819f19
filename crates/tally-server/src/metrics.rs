//! Prometheus metrics recorder and metric-name constants.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render the `/metrics` endpoint. Call once at
/// startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Snapshot deliveries dropped on full or closed listener queues (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Accepted votes applied to a tally (counter).
pub const VOTES_APPLIED_TOTAL: &str = "votes_applied_total";
/// Rejected vote events (counter, labels: reason).
pub const VOTES_REJECTED_TOTAL: &str = "votes_rejected_total";
/// Time from dequeue to broadcast hand-off per vote (histogram).
pub const VOTE_APPLY_DURATION_SECONDS: &str = "vote_apply_duration_seconds";
/// Live poll sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "sessions_active";
/// Tally snapshots broadcast (counter).
pub const TALLY_BROADCASTS_TOTAL: &str = "tally_broadcasts_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_does_not_panic() {
        // Build a recorder + handle without installing globally so parallel
        // tests cannot conflict.
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('\n') || output.contains('#'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_BROADCAST_DROPS_TOTAL,
            VOTES_APPLIED_TOTAL,
            VOTES_REJECTED_TOTAL,
            VOTE_APPLY_DURATION_SECONDS,
            SESSIONS_ACTIVE,
            TALLY_BROADCASTS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
