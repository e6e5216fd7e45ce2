//! Connection handle and related types

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::websocket::{OutboundMessage, ServerMessage};

/// Wall-clock milliseconds used for liveness bookkeeping
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// What ended a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    ClientClosed,
    TransportError,
    HeartbeatTimeout,
    SlowConsumer,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::SlowConsumer => "slow_consumer",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Liveness as seen by the heartbeat monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Alive,
    /// A ping went out at `since_ms` and nothing has come back yet
    AwaitingPong { since_ms: i64 },
    TimedOut,
}

/// Remote metadata captured at accept time
#[derive(Debug, Clone, Default)]
pub struct ConnectionMeta {
    pub remote_addr: Option<SocketAddr>,
    pub user_agent: Option<String>,
}

/// Handle for a single client connection.
///
/// Owned by the [`ConnectionManager`](super::ConnectionManager); everything else holds
/// clones of the `Arc` or just the id.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub meta: ConnectionMeta,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<OutboundMessage>,
    last_seen_ms: AtomicI64,
    ping_sent_ms: AtomicI64,
    state: AtomicU8,
    close_reason: Mutex<Option<CloseReason>>,
    close_signal: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(meta: ConnectionMeta, sender: mpsc::Sender<OutboundMessage>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            meta,
            connected_at: now,
            sender,
            last_seen_ms: AtomicI64::new(now.timestamp_millis()),
            ping_sent_ms: AtomicI64::new(0),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            close_reason: Mutex::new(None),
            close_signal: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub(crate) fn mark_open(&self) {
        let _ = self.state.compare_exchange(
            ConnectionState::Connecting as u8,
            ConnectionState::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Move to `Closing`. Only the first caller wins; everyone else gets `false`.
    pub(crate) fn begin_close(&self, reason: CloseReason) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= ConnectionState::Closing as u8 {
                return false;
            }
            match self.state.compare_exchange(
                current,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    *self.close_reason.lock() = Some(reason);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn finish_close(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
        self.close_signal.cancel();
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Resolves once the connection has been closed by anyone
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.close_signal.cancelled()
    }

    pub fn close_signal(&self) -> CancellationToken {
        self.close_signal.clone()
    }

    /// Record inbound traffic of any kind
    pub fn touch(&self) {
        self.touch_at(now_millis());
    }

    pub fn touch_at(&self, now_ms: i64) {
        self.last_seen_ms.fetch_max(now_ms, Ordering::Relaxed);
    }

    pub fn last_seen_ms(&self) -> i64 {
        self.last_seen_ms.load(Ordering::Relaxed)
    }

    /// Record that a heartbeat ping went out. Keeps the earliest unanswered ping.
    pub fn record_ping(&self, now_ms: i64) {
        if self.ping_sent_ms.load(Ordering::Relaxed) <= self.last_seen_ms() {
            self.ping_sent_ms.store(now_ms, Ordering::Relaxed);
        }
    }

    pub fn heartbeat_state(&self, now_ms: i64, timeout_ms: i64) -> HeartbeatState {
        let last_seen = self.last_seen_ms();
        if now_ms - last_seen > timeout_ms {
            return HeartbeatState::TimedOut;
        }

        let ping_sent = self.ping_sent_ms.load(Ordering::Relaxed);
        if ping_sent > last_seen {
            HeartbeatState::AwaitingPong { since_ms: ping_sent }
        } else {
            HeartbeatState::Alive
        }
    }

    /// Queue a control message, waiting for buffer space
    pub async fn send(
        &self,
        message: ServerMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(OutboundMessage::Control(message)).await
    }

    /// Queue a message without waiting
    pub fn try_send(&self, message: OutboundMessage) -> Result<(), TrySendError<OutboundMessage>> {
        self.sender.try_send(message)
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("meta", &self.meta)
            .field("close_reason", &self.close_reason())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("Total connection limit exceeded ({current}/{max})")]
    TotalLimitExceeded { current: usize, max: usize },
}

/// Limits for connection management
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub max_connections: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_connections: 10000,
        }
    }
}
