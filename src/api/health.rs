//! Health check endpoint.

use std::collections::HashMap;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub upstream: String,
    pub connections: ConnectionHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct ConnectionHealthResponse {
    pub total: usize,
    pub subscriptions: usize,
    pub topics: HashMap<String, usize>,
    pub total_closed: u64,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.connection_manager.stats();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        upstream: state.live_data.name().to_string(),
        connections: ConnectionHealthResponse {
            total: stats.total_connections,
            subscriptions: stats.total_subscriptions,
            topics: stats.topics,
            total_closed: stats.total_closed,
        },
    })
}
