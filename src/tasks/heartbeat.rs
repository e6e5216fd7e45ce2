use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::broadcast;
use tokio::sync::mpsc::error::TrySendError;

use crate::config::WebSocketConfig;
use crate::connection_manager::{now_millis, CloseReason, ConnectionManager, HeartbeatState};
use crate::error::StreamError;
use crate::metrics::HeartbeatMetrics;
use crate::websocket::{OutboundMessage, ServerMessage};

/// Counts from one heartbeat sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatRound {
    pub pinged: usize,
    pub timed_out: usize,
    /// Connections whose queue could not take the ping
    pub failed: usize,
}

/// Background task that pings every connection and closes the ones that went quiet.
///
/// This is the only thing that notices a client which vanished without a close frame.
pub struct HeartbeatTask {
    config: WebSocketConfig,
    connection_manager: Arc<ConnectionManager>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        connection_manager: Arc<ConnectionManager>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            connection_manager,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            connection_timeout_secs = self.config.connection_timeout,
            jitter_ms = self.config.heartbeat_jitter_ms,
            "Heartbeat task started"
        );

        loop {
            let delay = self.next_delay();
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(delay) => {
                    self.send_heartbeats();
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    fn next_delay(&self) -> Duration {
        let jitter_ms = match self.config.heartbeat_jitter_ms {
            0 => 0,
            max => rand::rng().random_range(0..=max),
        };
        self.config.heartbeat_interval() + Duration::from_millis(jitter_ms)
    }

    fn send_heartbeats(&self) {
        let start = Instant::now();
        let round = self.sweep(now_millis());
        let elapsed_ms = start.elapsed().as_millis() as u64;

        HeartbeatMetrics::record_duration_ms(elapsed_ms);
        if round.timed_out > 0 {
            HeartbeatMetrics::record_timeouts(round.timed_out as u64);
            tracing::info!(timed_out = round.timed_out, "Closed unresponsive connections");
        }

        tracing::debug!(
            pinged = round.pinged,
            timed_out = round.timed_out,
            failed = round.failed,
            elapsed_ms,
            "Heartbeat round completed"
        );
    }

    /// One pass over every connection at `now_ms`.
    ///
    /// Connections silent for longer than the timeout are closed; the rest get a
    /// heartbeat and have the ping time recorded.
    pub fn sweep(&self, now_ms: i64) -> HeartbeatRound {
        let timeout_ms = self.config.connection_timeout().as_millis() as i64;
        let mut round = HeartbeatRound::default();

        for handle in self.connection_manager.all() {
            if !handle.is_open() {
                continue;
            }

            match handle.heartbeat_state(now_ms, timeout_ms) {
                HeartbeatState::TimedOut => {
                    tracing::info!(
                        connection_id = %handle.id,
                        last_seen_ms = handle.last_seen_ms(),
                        error = %StreamError::HeartbeatTimeout(self.config.connection_timeout),
                        "Closing unresponsive connection"
                    );
                    if self
                        .connection_manager
                        .close(handle.id, CloseReason::HeartbeatTimeout)
                    {
                        round.timed_out += 1;
                    }
                }
                HeartbeatState::Alive | HeartbeatState::AwaitingPong { .. } => {
                    match handle.try_send(OutboundMessage::Control(ServerMessage::heartbeat())) {
                        Ok(()) => {
                            handle.record_ping(now_ms);
                            round.pinged += 1;
                        }
                        Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                            round.failed += 1;
                        }
                    }
                }
            }
        }

        round
    }
}
