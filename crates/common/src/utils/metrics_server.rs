use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use tracing::error;

use crate::utils::metrics::MetricsCollector;

/// Handler for /metrics endpoint
async fn metrics_handler(State(metrics): State<MetricsCollector>) -> impl IntoResponse {
    match metrics.gather() {
        Ok(metrics_text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics_text,
        )
            .into_response(),
        Err(err) => {
            error!("Failed to gather metrics: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Create metrics router, meant to be merged into the service router
pub fn create_metrics_router(metrics: MetricsCollector) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}
