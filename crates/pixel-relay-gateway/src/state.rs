//! Shared relay state.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use pixel_relay_canvas::CanvasStore;
use pixel_relay_core::PixelCodec;
use pixel_relay_core::config::Config;

use crate::rate_limit::ConnectionLimiter;
use crate::registry::ConnectionRegistry;
use crate::relay::BroadcastRelay;

/// State shared by every connection and HTTP handler.
pub struct RelayState {
    pub config: Arc<Config>,
    pub relay: Arc<BroadcastRelay>,
    pub limiter: Option<Arc<ConnectionLimiter>>,
    pub started_at: DateTime<Utc>,
    #[cfg(feature = "metrics")]
    pub metrics_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl RelayState {
    /// Build a relay with an empty canvas from config.
    pub fn new(config: Arc<Config>) -> Self {
        Self::with_store(config, Arc::new(CanvasStore::new()))
    }

    /// Build a relay around an existing canvas store.
    pub fn with_store(config: Arc<Config>, store: Arc<CanvasStore>) -> Self {
        let codec = PixelCodec::new(config.canvas_bounds());
        let relay = Arc::new(BroadcastRelay::new(
            codec,
            store,
            Arc::new(ConnectionRegistry::new()),
        ));

        let limiter = config
            .max_connections_per_ip()
            .map(|max| Arc::new(ConnectionLimiter::new(max)));

        Self {
            config,
            relay,
            limiter,
            started_at: Utc::now(),
            #[cfg(feature = "metrics")]
            metrics_handle: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
