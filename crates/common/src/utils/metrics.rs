//! Monitoring and Metrics Collection
//!
//! Prometheus metrics for the gateway. Metrics are process-wide statics so
//! any component can record without threading a handle through; a
//! [`MetricsCollector`] owns the registry they are exposed from.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use tracing::warn;

lazy_static! {
    // WebSocket connection metrics
    pub static ref WS_ACTIVE_CONNECTIONS: Gauge = Gauge::new(
        "hlgate_ws_active_connections",
        "Number of active WebSocket connections"
    ).unwrap();

    pub static ref WS_CONNECTIONS_TOTAL: Counter = Counter::new(
        "hlgate_ws_connections_total",
        "Total number of WebSocket connections"
    ).unwrap();

    pub static ref WS_DISCONNECTIONS_TOTAL: Counter = Counter::new(
        "hlgate_ws_disconnections_total",
        "Total number of WebSocket disconnections"
    ).unwrap();

    // WebSocket message metrics
    pub static ref WS_MESSAGES_RECEIVED: Counter = Counter::new(
        "hlgate_ws_messages_received_total",
        "Total messages received from WebSocket clients"
    ).unwrap();

    pub static ref WS_MESSAGES_SENT: Counter = Counter::new(
        "hlgate_ws_messages_sent_total",
        "Total messages queued for WebSocket clients"
    ).unwrap();

    pub static ref WS_MESSAGES_DROPPED: Counter = Counter::new(
        "hlgate_ws_messages_dropped_total",
        "Messages dropped because a client's outbound queue was full"
    ).unwrap();

    pub static ref WS_RPC_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("hlgate_ws_rpc_requests_total", "WebSocket JSON-RPC requests by method"),
        &["method"]
    ).unwrap();

    // Subscription metrics
    pub static ref WS_ACTIVE_SUBSCRIPTIONS: GaugeVec = GaugeVec::new(
        Opts::new("hlgate_ws_active_subscriptions", "Active subscriptions by type"),
        &["type"]
    ).unwrap();

    pub static ref WS_SUBSCRIPTIONS_CREATED: CounterVec = CounterVec::new(
        Opts::new("hlgate_ws_subscriptions_created_total", "Subscriptions created by type"),
        &["type"]
    ).unwrap();

    pub static ref WS_SUBSCRIPTIONS_REMOVED: CounterVec = CounterVec::new(
        Opts::new("hlgate_ws_subscriptions_removed_total", "Subscriptions removed by type"),
        &["type"]
    ).unwrap();

    pub static ref WS_NOTIFICATIONS_SENT: CounterVec = CounterVec::new(
        Opts::new("hlgate_ws_notifications_sent_total", "Subscription notifications queued by type"),
        &["type"]
    ).unwrap();

    // HTTP JSON-RPC relay metrics
    pub static ref RPC_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("hlgate_rpc_requests_total", "HTTP JSON-RPC requests by method"),
        &["method"]
    ).unwrap();

    pub static ref RPC_REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("hlgate_rpc_request_duration_seconds", "HTTP JSON-RPC request duration")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["method"]
    ).unwrap();

    pub static ref RPC_ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("hlgate_rpc_errors_total", "HTTP JSON-RPC errors by type"),
        &["error_type"]
    ).unwrap();

    // Upstream metrics
    pub static ref UPSTREAM_REQUESTS_TOTAL: Counter = Counter::new(
        "hlgate_upstream_requests_total",
        "Total successful requests to the upstream node"
    ).unwrap();

    pub static ref UPSTREAM_ERRORS_TOTAL: Counter = Counter::new(
        "hlgate_upstream_errors_total",
        "Total errors from the upstream node"
    ).unwrap();

    pub static ref BLOCKS_PROCESSED_TOTAL: Counter = Counter::new(
        "hlgate_blocks_processed_total",
        "Total blocks broadcast to subscribers"
    ).unwrap();
}

/// Metrics collector
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
}

impl MetricsCollector {
    /// Create a new metrics collector with every gateway metric registered
    pub fn new() -> Self {
        let registry = Registry::new();

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            // WebSocket
            Box::new(WS_ACTIVE_CONNECTIONS.clone()),
            Box::new(WS_CONNECTIONS_TOTAL.clone()),
            Box::new(WS_DISCONNECTIONS_TOTAL.clone()),
            Box::new(WS_MESSAGES_RECEIVED.clone()),
            Box::new(WS_MESSAGES_SENT.clone()),
            Box::new(WS_MESSAGES_DROPPED.clone()),
            Box::new(WS_RPC_REQUESTS_TOTAL.clone()),
            // Subscriptions
            Box::new(WS_ACTIVE_SUBSCRIPTIONS.clone()),
            Box::new(WS_SUBSCRIPTIONS_CREATED.clone()),
            Box::new(WS_SUBSCRIPTIONS_REMOVED.clone()),
            Box::new(WS_NOTIFICATIONS_SENT.clone()),
            // HTTP RPC
            Box::new(RPC_REQUESTS_TOTAL.clone()),
            Box::new(RPC_REQUEST_DURATION.clone()),
            Box::new(RPC_ERRORS_TOTAL.clone()),
            // Upstream
            Box::new(UPSTREAM_REQUESTS_TOTAL.clone()),
            Box::new(UPSTREAM_ERRORS_TOTAL.clone()),
            Box::new(BLOCKS_PROCESSED_TOTAL.clone()),
        ];

        for collector in collectors {
            if let Err(e) = registry.register(collector) {
                warn!("Failed to register metric: {}", e);
            }
        }

        Self {
            registry: Arc::new(registry),
        }
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Gather metrics as Prometheus text format
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new();
        let metrics = collector.gather();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_labelled_metric_is_exposed() {
        let collector = MetricsCollector::new();
        WS_SUBSCRIPTIONS_CREATED.with_label_values(&["newHeads"]).inc();

        let text = collector.gather().unwrap();
        assert!(text.contains("hlgate_ws_subscriptions_created_total"));
        assert!(text.contains("type=\"newHeads\""));
    }

    #[test]
    fn test_collectors_are_independent_registries() {
        let first = MetricsCollector::new();
        let second = MetricsCollector::new();
        assert!(first.gather().is_ok());
        assert!(second.gather().is_ok());
    }
}
