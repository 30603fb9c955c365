//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return the handle for rendering.
///
/// Only one recorder can be installed per process.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Record a peer joining the canvas.
pub fn record_peer_connect() {
    metrics::gauge!("canvas_peers_active").increment(1.0);
}

/// Record a peer leaving, voluntarily or by eviction.
pub fn record_peer_disconnect() {
    metrics::gauge!("canvas_peers_active").decrement(1.0);
}

/// Record an accepted draw event.
pub fn record_draw() {
    metrics::counter!("canvas_draws_total").increment(1);
}

/// Record an error of a given kind.
pub fn record_error(kind: &str) {
    let labels = [("kind", kind.to_string())];
    metrics::counter!("canvas_errors_total", &labels).increment(1);
}
