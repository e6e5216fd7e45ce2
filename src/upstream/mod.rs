//! Upstream live-data collaborator.
//!
//! The broadcast core only sees the [`LiveDataProvider`] trait: an async, possibly
//! failing, possibly slow source of live games. Two implementations ship:
//! - [`HttpLiveDataProvider`]: a remote scores service reached over HTTP
//! - [`SimulatedLiveDataProvider`]: an in-process evolving scoreboard for demos

mod http;
mod simulated;

pub use http::HttpLiveDataProvider;
pub use simulated::SimulatedLiveDataProvider;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::UpstreamConfig;

#[derive(Error, Debug, Clone)]
pub enum UpstreamError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("upstream timed out")]
    Timeout,

    #[error("unknown league: {0}")]
    UnknownLeague(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Scheduled,
    InProgress,
    Final,
}

/// One game as reported by the live-data service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveGame {
    pub id: String,
    pub league: String,
    pub sport: String,
    pub home_team: String,
    pub away_team: String,
    pub home_score: u32,
    pub away_score: u32,
    pub status: GameStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl LiveGame {
    /// Case-insensitive match against either side of the game
    pub fn involves_team(&self, team: &str) -> bool {
        let needle = team.to_lowercase();
        self.home_team.to_lowercase().contains(&needle)
            || self.away_team.to_lowercase().contains(&needle)
    }
}

/// Async source of live game data
#[async_trait]
pub trait LiveDataProvider: Send + Sync {
    /// Human-readable name used in logs and payloads
    fn name(&self) -> &str;

    async fn get_live_data(&self, league: &str) -> Result<Vec<LiveGame>, UpstreamError>;

    async fn get_all_live_data(&self) -> Result<Vec<LiveGame>, UpstreamError>;
}

/// Build the provider selected by configuration
pub fn create_live_data_provider(
    config: &UpstreamConfig,
) -> Result<Arc<dyn LiveDataProvider>, UpstreamError> {
    match config.base_url {
        Some(ref base_url) => {
            tracing::info!(base_url = %base_url, "Using HTTP live-data provider");
            let provider = HttpLiveDataProvider::new(base_url, config.request_timeout())?;
            Ok(Arc::new(provider))
        }
        None => {
            tracing::info!(leagues = ?config.leagues, "Using simulated live-data provider");
            Ok(Arc::new(SimulatedLiveDataProvider::new(config.leagues.clone())))
        }
    }
}
