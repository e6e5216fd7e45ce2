//! Prometheus metrics endpoint.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::error::AppError;
use crate::metrics::{self, ConnectionMetrics};
use crate::server::AppState;
use crate::streams::Topic;

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    refresh_gauges(&state);

    let output = metrics::encode_metrics()
        .map_err(|e| AppError::Internal(format!("Failed to encode metrics: {}", e)))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        output,
    ))
}

/// Re-read subscriber counts so untouched topics report zero
fn refresh_gauges(state: &AppState) {
    let stats = state.connection_manager.stats();
    for topic in Topic::ALL {
        let count = stats.topics.get(topic.as_str()).copied().unwrap_or(0);
        ConnectionMetrics::set_topic_subscribers(topic, count);
    }
}
