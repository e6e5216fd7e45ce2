use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::upstream::UpstreamError;

/// Faults raised while serving a single connection or a single publish tick.
///
/// None of these are allowed to take down the process. Protocol, unknown-topic,
/// not-found and upstream faults are reported to the client as an `error` frame and
/// the connection stays open; transport and heartbeat faults end the connection.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Invalid message: {0}")]
    Protocol(String),

    #[error("Unknown stream: {0}")]
    UnknownTopic(String),

    #[error("Upstream fetch failed: {0}")]
    UpstreamFetch(#[from] UpstreamError),

    #[error("Game not found: {0}")]
    GameNotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Heartbeat timeout after {0}s without activity")]
    HeartbeatTimeout(u64),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, client_message, log_message) = match &self {
            AppError::Config(e) => {
                let log_msg = e.to_string();
                let client_msg = if is_production() {
                    "Configuration error".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", client_msg, log_msg)
            }
            AppError::Io(e) => {
                let log_msg = e.to_string();
                (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", log_msg.clone(), log_msg)
            }
            AppError::Internal(e) => {
                let log_msg = e.clone();
                let client_msg = if is_production() {
                    "Internal server error".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", client_msg, log_msg)
            }
        };

        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %log_message,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
