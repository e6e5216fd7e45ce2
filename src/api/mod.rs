//! Operational HTTP endpoints.

mod health;
mod metrics;

pub use health::{health, ConnectionHealthResponse, HealthResponse};
pub use metrics::prometheus_metrics;
