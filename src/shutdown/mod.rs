//! Graceful shutdown for the stream service.
//!
//! Once the shutdown signal is broadcast:
//! 1. Publishers and the heartbeat task stop on their own receivers
//! 2. Every open connection is closed with reason `shutdown`, running the normal
//!    exactly-once cleanup, and its writer sends a close frame
//! 3. Background tasks are awaited, bounded by the drain timeout

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::connection_manager::{CloseReason, ConnectionManager};

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for background tasks to finish (default: 10 seconds)
    pub drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ShutdownResult {
    pub connections_closed: usize,
    /// Whether every background task finished within the drain timeout
    pub tasks_drained: bool,
    pub duration: Duration,
}

pub struct GracefulShutdown {
    connection_manager: Arc<ConnectionManager>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self::with_config(connection_manager, ShutdownConfig::default())
    }

    pub fn with_config(connection_manager: Arc<ConnectionManager>, config: ShutdownConfig) -> Self {
        Self {
            connection_manager,
            config,
        }
    }

    /// Close every open connection with reason `shutdown`
    pub fn close_connections(&self) -> usize {
        let closed = self.connection_manager.close_all(CloseReason::Shutdown);
        tracing::info!(connections_closed = closed, "Closed client connections for shutdown");
        closed
    }

    /// Wait for background tasks, giving up after the drain timeout
    pub async fn drain_tasks(&self, tasks: Vec<JoinHandle<()>>) -> bool {
        let count = tasks.len();
        match timeout(self.config.drain_timeout, join_all(tasks)).await {
            Ok(results) => {
                for result in results.into_iter().filter_map(Result::err) {
                    tracing::warn!(error = %result, "Background task ended abnormally");
                }
                true
            }
            Err(_) => {
                tracing::warn!(
                    tasks = count,
                    timeout_secs = self.config.drain_timeout.as_secs(),
                    "Background tasks did not stop within drain timeout"
                );
                false
            }
        }
    }

    /// Close connections, then drain the given tasks.
    ///
    /// The shutdown signal must already have been broadcast so the tasks are stopping.
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self, tasks),
        fields(open_connections = self.connection_manager.len())
    )]
    pub async fn execute(&self, tasks: Vec<JoinHandle<()>>) -> ShutdownResult {
        let start = Instant::now();

        let connections_closed = self.close_connections();
        let tasks_drained = self.drain_tasks(tasks).await;

        let result = ShutdownResult {
            connections_closed,
            tasks_drained,
            duration: start.elapsed(),
        };

        tracing::info!(
            connections_closed = result.connections_closed,
            tasks_drained = result.tasks_drained,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_manager::ConnectionMeta;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_execute_closes_connections_once() {
        let cm = Arc::new(ConnectionManager::new());
        let mut handles = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = mpsc::channel(4);
            let h = cm.register(ConnectionMeta::default(), tx).unwrap();
            cm.subscribe(h.id, "live_scores").unwrap();
            handles.push(h);
            receivers.push(rx);
        }

        let shutdown = GracefulShutdown::new(cm.clone());
        let result = shutdown.execute(vec![tokio::spawn(async {})]).await;

        assert_eq!(result.connections_closed, 3);
        assert!(result.tasks_drained);
        assert!(cm.is_empty());
        assert_eq!(cm.total_subscriptions(), 0);
        for h in &handles {
            assert_eq!(h.close_reason(), Some(CloseReason::Shutdown));
        }

        // Nothing left to close the second time
        assert_eq!(shutdown.close_connections(), 0);
        assert_eq!(cm.stats().total_closed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_timeout() {
        let cm = Arc::new(ConnectionManager::new());
        let shutdown = GracefulShutdown::with_config(
            cm,
            ShutdownConfig {
                drain_timeout: Duration::from_millis(100),
            },
        );

        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        assert!(!shutdown.drain_tasks(vec![stuck]).await);
    }
}
