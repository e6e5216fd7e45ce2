use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};

use crate::config::StreamsConfig;
use crate::error::StreamError;
use crate::metrics::StreamMetrics;
use crate::upstream::LiveDataProvider;

use super::{
    DeliveryResult, LiveScoresSource, PerformanceMetricsSource, PlayerTrackingSource,
    PressureAnalyticsSource, StreamBroadcaster, StreamSource, TeamAnalyticsSource, Topic,
};

/// What happened on one publisher tick
#[derive(Debug)]
pub enum TickOutcome {
    Published(DeliveryResult),
    /// Production failed; the tick was skipped
    Failed(StreamError),
    /// Production did not finish within the fetch timeout; the tick was skipped
    TimedOut,
}

/// Periodic task driving one topic
pub struct StreamPublisher {
    topic: Topic,
    cadence: Duration,
    fetch_timeout: Duration,
    source: Arc<dyn StreamSource>,
    broadcaster: Arc<StreamBroadcaster>,
}

impl StreamPublisher {
    pub fn new(
        source: Arc<dyn StreamSource>,
        cadence: Duration,
        fetch_timeout: Duration,
        broadcaster: Arc<StreamBroadcaster>,
    ) -> Self {
        Self {
            topic: source.topic(),
            cadence,
            fetch_timeout,
            source,
            broadcaster,
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Produce one payload and deliver it to the topic's current subscribers
    pub async fn tick(&self) -> TickOutcome {
        let start = Instant::now();
        let produced = timeout(self.fetch_timeout, self.source.produce()).await;
        StreamMetrics::record_produce_latency(self.topic, start.elapsed().as_secs_f64());

        match produced {
            Ok(Ok(data)) => {
                let result = self.broadcaster.publish(self.topic, &data);
                StreamMetrics::record_published(self.topic, result.delivered);
                TickOutcome::Published(result)
            }
            Ok(Err(e)) => {
                StreamMetrics::record_failed(self.topic);
                tracing::warn!(topic = %self.topic, error = %e, "Stream production failed, skipping tick");
                TickOutcome::Failed(e)
            }
            Err(_) => {
                StreamMetrics::record_timeout(self.topic);
                tracing::warn!(
                    topic = %self.topic,
                    timeout_ms = self.fetch_timeout.as_millis() as u64,
                    "Stream production timed out, skipping tick"
                );
                TickOutcome::TimedOut
            }
        }
    }

    /// Tick at the configured cadence until shutdown
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.cadence);
        // A slow production delays the next tick instead of bursting to catch up.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            topic = %self.topic,
            cadence_ms = self.cadence.as_millis() as u64,
            "Stream publisher started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::debug!(topic = %self.topic, "Stream publisher received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        tracing::info!(topic = %self.topic, "Stream publisher stopped");
    }
}

/// The production set of sources: synthetic telemetry plus the upstream-backed scoreboard
pub fn default_sources(
    provider: Arc<dyn LiveDataProvider>,
    broadcaster: Arc<StreamBroadcaster>,
) -> Vec<Arc<dyn StreamSource>> {
    vec![
        Arc::new(PressureAnalyticsSource::new()),
        Arc::new(LiveScoresSource::new(provider, broadcaster)),
        Arc::new(PerformanceMetricsSource::new()),
        Arc::new(PlayerTrackingSource::new()),
        Arc::new(TeamAnalyticsSource::new()),
    ]
}

/// Spawn one publisher task per periodic source.
///
/// Every publisher runs on its own task, so a failing or slow source only ever costs
/// its own ticks.
pub fn spawn_publishers(
    sources: Vec<Arc<dyn StreamSource>>,
    config: &StreamsConfig,
    broadcaster: Arc<StreamBroadcaster>,
    shutdown: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    sources
        .into_iter()
        .filter_map(|source| {
            let topic = source.topic();
            let Some(cadence) = config.cadence(topic) else {
                tracing::warn!(topic = %topic, "Topic is event-driven, not spawning a publisher");
                return None;
            };

            let publisher =
                StreamPublisher::new(source, cadence, config.fetch_timeout(), broadcaster.clone());
            let rx = shutdown.subscribe();
            Some(tokio::spawn(publisher.run(rx)))
        })
        .collect()
}
