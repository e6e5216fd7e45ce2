use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::streams::{Topic, TopicInfo};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub streams: StreamsConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Heartbeat interval in seconds (server sends ping)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Connection timeout in seconds (disconnect if no inbound traffic)
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Upper bound of random delay added to each heartbeat round, in milliseconds
    #[serde(default)]
    pub heartbeat_jitter_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Outbound frames buffered per connection before it is dropped as a slow consumer
    #[serde(default = "default_outbound_queue_size")]
    pub outbound_queue_size: usize,
}

/// Publisher cadences and production limits.
///
/// A cadence of `0` falls back to the topic's nominal cadence.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamsConfig {
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default)]
    pub pressure_analytics_ms: u64,
    #[serde(default)]
    pub live_scores_ms: u64,
    #[serde(default)]
    pub performance_metrics_ms: u64,
    #[serde(default)]
    pub player_tracking_ms: u64,
    #[serde(default)]
    pub team_analytics_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the live-data service. When unset the simulated scoreboard is used.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_leagues")]
    pub leagues: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_heartbeat_interval() -> u64 {
    30 // 30 seconds
}

fn default_connection_timeout() -> u64 {
    60 // 1 minute
}

fn default_max_connections() -> usize {
    10_000
}

fn default_outbound_queue_size() -> usize {
    256
}

fn default_fetch_timeout_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_leagues() -> Vec<String> {
    ["mlb", "nfl", "nba", "ncaa_football"]
        .iter()
        .map(|l| l.to_string())
        .collect()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "arena-stream-service".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("websocket.heartbeat_interval", default_heartbeat_interval() as i64)?
            .set_default("websocket.connection_timeout", default_connection_timeout() as i64)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // STREAM__SERVER__PORT, STREAM__UPSTREAM__BASE_URL, STREAM__UPSTREAM__LEAGUES=mlb,nba ...
            .add_source(
                Environment::with_prefix("STREAM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("upstream.leagues"),
            );

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would panic or spin at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ws = &self.websocket;
        if ws.outbound_queue_size == 0 {
            return Err(invalid("websocket.outbound_queue_size must be greater than 0"));
        }
        if ws.heartbeat_interval == 0 {
            return Err(invalid("websocket.heartbeat_interval must be greater than 0"));
        }
        if ws.connection_timeout <= ws.heartbeat_interval {
            return Err(invalid(format!(
                "websocket.connection_timeout ({}s) must exceed heartbeat_interval ({}s)",
                ws.connection_timeout, ws.heartbeat_interval
            )));
        }
        if self.streams.fetch_timeout_ms == 0 {
            return Err(invalid("streams.fetch_timeout_ms must be greater than 0"));
        }
        if self.upstream.request_timeout_ms == 0 {
            return Err(invalid("upstream.request_timeout_ms must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.otel.sampling_ratio) {
            return Err(invalid("otel.sampling_ratio must be within 0.0..=1.0"));
        }
        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Message(message.into())
}

impl WebSocketConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }
}

impl StreamsConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// `availableStreams` entries advertising the effective cadences
    pub fn catalogue(&self) -> Vec<TopicInfo> {
        Topic::catalogue(|t| self.cadence(t))
    }

    /// Effective publish cadence for a topic; `None` for event-driven topics.
    pub fn cadence(&self, topic: Topic) -> Option<Duration> {
        let override_ms = match topic {
            Topic::PressureAnalytics => self.pressure_analytics_ms,
            Topic::LiveScores => self.live_scores_ms,
            Topic::PerformanceMetrics => self.performance_metrics_ms,
            Topic::PlayerTracking => self.player_tracking_ms,
            Topic::TeamAnalytics => self.team_analytics_ms,
            Topic::GameUpdates => return None,
        };

        if override_ms > 0 {
            Some(Duration::from_millis(override_ms))
        } else {
            topic.nominal_cadence()
        }
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            connection_timeout: default_connection_timeout(),
            heartbeat_jitter_ms: 0,
            max_connections: default_max_connections(),
            outbound_queue_size: default_outbound_queue_size(),
        }
    }
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: default_fetch_timeout_ms(),
            pressure_analytics_ms: 0,
            live_scores_ms: 0,
            performance_metrics_ms: 0,
            player_tracking_ms: 0,
            team_analytics_ms: 0,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_ms: default_request_timeout_ms(),
            leagues: default_leagues(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
