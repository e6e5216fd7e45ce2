use std::time::Duration;

use async_trait::async_trait;

use super::{LiveDataProvider, LiveGame, UpstreamError};

/// Live data fetched from a remote scores service.
///
/// Expects `GET {base}/live/{league}` and `GET {base}/live` to return a JSON array
/// of games.
pub struct HttpLiveDataProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLiveDataProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, url: String) -> Result<Vec<LiveGame>, UpstreamError> {
        let response = self.client.get(&url).send().await.map_err(map_error)?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %url, status = status.as_u16(), "Upstream returned error status");
            return Err(UpstreamError::Status(status.as_u16()));
        }

        response
            .json::<Vec<LiveGame>>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

fn map_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::Request(e.to_string())
    }
}

#[async_trait]
impl LiveDataProvider for HttpLiveDataProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn get_live_data(&self, league: &str) -> Result<Vec<LiveGame>, UpstreamError> {
        if league.is_empty() || !league.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(UpstreamError::UnknownLeague(league.to_string()));
        }
        self.fetch(format!("{}/live/{}", self.base_url, league)).await
    }

    async fn get_all_live_data(&self) -> Result<Vec<LiveGame>, UpstreamError> {
        self.fetch(format!("{}/live", self.base_url)).await
    }
}
