use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::error::StreamError;
use crate::metrics::{ConnectionMetrics, StreamMetrics};
use crate::streams::Topic;
use crate::websocket::{OutboundMessage, ServerMessage};

use super::stats::ConnectionStats;
use super::subscriptions::SubscriptionIndex;
use super::types::{
    CloseReason, ConnectionError, ConnectionHandle, ConnectionLimits, ConnectionMeta,
};

/// Outcome of pushing one frame to a topic's subscribers
#[derive(Debug, Default)]
pub struct FanOut {
    pub delivered: usize,
    /// Subscribers whose transport has already gone away
    pub failed: usize,
    /// Subscribers whose outbound queue was full
    pub overflowed: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Subscribe,
    Unsubscribe,
}

/// Owns every live connection and the subscription index.
///
/// The registry is a `DashMap` so lookups never contend. The subscription index sits
/// behind one mutex: subscribe, unsubscribe, cleanup cascades and topic fan-out all
/// take it, which keeps the two index directions in step and orders a completed
/// unsubscribe strictly before any later fan-out.
pub struct ConnectionManager {
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    index: Mutex<SubscriptionIndex>,
    limits: ConnectionLimits,
    /// Slots taken against `limits.max_connections`, reserved before insert
    reserved: AtomicUsize,
    closed_total: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::with_limits(ConnectionLimits::default())
    }

    pub fn with_limits(limits: ConnectionLimits) -> Self {
        Self {
            connections: DashMap::new(),
            index: Mutex::new(SubscriptionIndex::new()),
            limits,
            reserved: AtomicUsize::new(0),
            closed_total: AtomicU64::new(0),
        }
    }

    /// Register a new connection with a fresh id and no subscriptions
    pub fn register(
        &self,
        meta: ConnectionMeta,
        sender: mpsc::Sender<OutboundMessage>,
    ) -> Result<Arc<ConnectionHandle>, ConnectionError> {
        let current = self.reserved.fetch_add(1, Ordering::AcqRel);
        if current >= self.limits.max_connections {
            self.reserved.fetch_sub(1, Ordering::AcqRel);
            return Err(ConnectionError::TotalLimitExceeded {
                current,
                max: self.limits.max_connections,
            });
        }

        let handle = Arc::new(ConnectionHandle::new(meta, sender));
        self.connections.insert(handle.id, handle.clone());
        handle.mark_open();

        ConnectionMetrics::record_opened();
        tracing::info!(
            connection_id = %handle.id,
            remote_addr = ?handle.meta.remote_addr,
            "Connection registered"
        );

        Ok(handle)
    }

    pub fn get(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    pub fn all(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    pub fn connection_ids(&self) -> Vec<Uuid> {
        self.connections.iter().map(|r| *r.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Subscribe a connection to a stream by name.
    ///
    /// Returns the parsed topic and whether the subscription is new. Subscribing
    /// twice is a successful no-op.
    pub fn subscribe(&self, connection_id: Uuid, stream: &str) -> Result<(Topic, bool), StreamError> {
        self.change_subscription(connection_id, stream, Change::Subscribe, false)
    }

    /// Like [`subscribe`](Self::subscribe), and also queues the `subscribed` ack
    /// while the index lock is held, so no frame for the topic can overtake it.
    pub fn subscribe_with_ack(
        &self,
        connection_id: Uuid,
        stream: &str,
    ) -> Result<(Topic, bool), StreamError> {
        self.change_subscription(connection_id, stream, Change::Subscribe, true)
    }

    /// Unsubscribe a connection from a stream by name.
    ///
    /// Unsubscribing from a topic that was never subscribed is a successful no-op.
    pub fn unsubscribe(&self, connection_id: Uuid, stream: &str) -> Result<(Topic, bool), StreamError> {
        self.change_subscription(connection_id, stream, Change::Unsubscribe, false)
    }

    pub fn unsubscribe_with_ack(
        &self,
        connection_id: Uuid,
        stream: &str,
    ) -> Result<(Topic, bool), StreamError> {
        self.change_subscription(connection_id, stream, Change::Unsubscribe, true)
    }

    fn change_subscription(
        &self,
        connection_id: Uuid,
        stream: &str,
        change: Change,
        ack: bool,
    ) -> Result<(Topic, bool), StreamError> {
        let topic: Topic = stream.parse()?;

        let mut index = self.index.lock();
        // Checked under the index lock so a concurrent close either sees this
        // subscription in its cascade or this call sees the connection closing.
        let handle = self.get(connection_id).filter(|h| h.is_open());
        if handle.is_none() && change == Change::Subscribe {
            return Err(StreamError::Transport(format!(
                "connection {} is closed",
                connection_id
            )));
        }

        let changed = match change {
            Change::Subscribe => index.subscribe(connection_id, topic),
            Change::Unsubscribe => index.unsubscribe(connection_id, topic),
        };
        let queued = match handle {
            Some(handle) if ack => {
                let reply = match change {
                    Change::Subscribe => ServerMessage::subscribed(topic),
                    Change::Unsubscribe => ServerMessage::unsubscribed(topic),
                };
                handle.try_send(OutboundMessage::Control(reply))
            }
            _ => Ok(()),
        };
        let count = index.subscriber_count(topic);
        drop(index);

        ConnectionMetrics::set_topic_subscribers(topic, count);
        tracing::debug!(
            connection_id = %connection_id,
            topic = %topic,
            change = ?change,
            changed,
            "Subscription updated"
        );

        match queued {
            Ok(()) => Ok((topic, changed)),
            Err(TrySendError::Full(_)) => {
                if self.close(connection_id, CloseReason::SlowConsumer) {
                    StreamMetrics::record_slow_consumers(1);
                }
                Err(StreamError::Transport("outbound queue full".to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                Err(StreamError::Transport("outbound queue closed".to_string()))
            }
        }
    }

    pub fn subscribers_of(&self, topic: Topic) -> Vec<Uuid> {
        self.index.lock().subscribers_of(topic).copied().collect()
    }

    pub fn topics_of(&self, connection_id: Uuid) -> Vec<Topic> {
        self.index.lock().topics_of(connection_id)
    }

    pub fn total_subscriptions(&self) -> usize {
        self.index.lock().len()
    }

    /// Push one frame to every current subscriber of a topic.
    ///
    /// Subscribers are read at call time and each one is looked up in the registry
    /// again, so connections closed or unsubscribed a moment ago are skipped silently.
    /// Never blocks: a full outbound queue is reported in [`FanOut::overflowed`].
    pub fn fan_out(&self, topic: Topic, frame: &OutboundMessage) -> FanOut {
        let mut result = FanOut::default();
        let index = self.index.lock();

        for id in index.subscribers_of(topic) {
            let Some(handle) = self.get(*id) else {
                continue;
            };
            if !handle.is_open() {
                continue;
            }

            match handle.try_send(frame.clone()) {
                Ok(()) => result.delivered += 1,
                Err(TrySendError::Full(_)) => result.overflowed.push(*id),
                Err(TrySendError::Closed(_)) => result.failed += 1,
            }
        }

        result
    }

    /// Close a connection and run its cleanup.
    ///
    /// Safe to call from any trigger (client close, transport error, heartbeat
    /// timeout, slow consumer, shutdown) and from several at once: only the first
    /// call for a connection performs the cascade and unregister and returns `true`.
    pub fn close(&self, connection_id: Uuid, reason: CloseReason) -> bool {
        let Some(handle) = self.get(connection_id) else {
            return false;
        };

        if !handle.begin_close(reason) {
            return false;
        }

        // Cascade before unregister so no topic keeps a phantom subscriber.
        let topics = {
            let mut index = self.index.lock();
            let topics = index.remove_connection(connection_id);
            for topic in &topics {
                ConnectionMetrics::set_topic_subscribers(*topic, index.subscriber_count(*topic));
            }
            topics
        };
        self.connections.remove(&connection_id);
        self.reserved.fetch_sub(1, Ordering::AcqRel);
        handle.finish_close();

        self.closed_total.fetch_add(1, Ordering::Relaxed);
        ConnectionMetrics::record_closed(reason);

        let duration_secs = (chrono::Utc::now() - handle.connected_at).num_milliseconds() as f64 / 1000.0;
        tracing::info!(
            connection_id = %connection_id,
            reason = reason.as_str(),
            topics = ?topics,
            duration_secs,
            "Connection unregistered"
        );

        true
    }

    /// Close every connection, returning how many this call closed
    pub fn close_all(&self, reason: CloseReason) -> usize {
        self.connection_ids()
            .into_iter()
            .filter(|id| self.close(*id, reason))
            .count()
    }

    pub fn stats(&self) -> ConnectionStats {
        let index = self.index.lock();
        let topics: HashMap<String, usize> = Topic::ALL
            .iter()
            .map(|t| (t.as_str().to_string(), index.subscriber_count(*t)))
            .collect();

        ConnectionStats {
            total_connections: self.connections.len(),
            total_subscriptions: index.len(),
            topics,
            total_closed: self.closed_total.load(Ordering::Relaxed),
        }
    }

    /// Registry and index agree: the index is self-consistent and only references
    /// registered connections.
    pub fn is_consistent(&self) -> bool {
        let index = self.index.lock();
        index.is_consistent() && index.connections().all(|id| self.connections.contains_key(id))
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn register(cm: &ConnectionManager, capacity: usize) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = cm.register(ConnectionMeta::default(), tx).unwrap();
        (handle, rx)
    }

    fn frame() -> OutboundMessage {
        OutboundMessage::Stream(Arc::from("{\"type\":\"live_scores\"}"))
    }

    #[test]
    fn test_register_assigns_fresh_ids() {
        let cm = ConnectionManager::new();
        let (a, _ra) = register(&cm, 4);
        let (b, _rb) = register(&cm, 4);

        assert_ne!(a.id, b.id);
        assert_eq!(cm.len(), 2);
        assert!(cm.topics_of(a.id).is_empty());
        assert!(cm.get(a.id).is_some());
    }

    #[test]
    fn test_connection_limit() {
        let cm = ConnectionManager::with_limits(ConnectionLimits { max_connections: 1 });
        let (_a, _ra) = register(&cm, 4);

        let (tx, _rx) = mpsc::channel(4);
        let err = cm.register(ConnectionMeta::default(), tx).unwrap_err();
        assert!(matches!(err, ConnectionError::TotalLimitExceeded { current: 1, max: 1 }));
    }

    #[test]
    fn test_subscribe_unknown_topic() {
        let cm = ConnectionManager::new();
        let (a, _ra) = register(&cm, 4);

        let err = tokio_test::assert_err!(cm.subscribe(a.id, "not_a_real_stream"));
        assert!(matches!(err, StreamError::UnknownTopic(_)));
        assert_eq!(cm.total_subscriptions(), 0);
    }

    #[test]
    fn test_subscribe_twice_single_subscription() {
        let cm = ConnectionManager::new();
        let (a, _ra) = register(&cm, 4);

        assert_eq!(cm.subscribe(a.id, "live_scores").unwrap(), (Topic::LiveScores, true));
        assert_eq!(cm.subscribe(a.id, "live_scores").unwrap(), (Topic::LiveScores, false));
        assert_eq!(cm.subscribers_of(Topic::LiveScores), vec![a.id]);
        assert!(cm.is_consistent());
    }

    #[test]
    fn test_close_cascades_and_is_exactly_once() {
        let cm = ConnectionManager::new();
        let (a, _ra) = register(&cm, 4);
        cm.subscribe(a.id, "pressure_analytics").unwrap();
        cm.subscribe(a.id, "team_analytics").unwrap();

        assert!(cm.close(a.id, CloseReason::ClientClosed));
        assert!(!cm.close(a.id, CloseReason::TransportError));
        assert!(!cm.close(a.id, CloseReason::HeartbeatTimeout));

        assert!(cm.get(a.id).is_none());
        assert!(cm.subscribers_of(Topic::PressureAnalytics).is_empty());
        assert!(cm.subscribers_of(Topic::TeamAnalytics).is_empty());
        assert_eq!(cm.stats().total_closed, 1);
        assert_eq!(a.close_reason(), Some(CloseReason::ClientClosed));
        assert!(cm.is_consistent());
    }

    #[test]
    fn test_subscribe_after_close_rejected() {
        let cm = ConnectionManager::new();
        let (a, _ra) = register(&cm, 4);
        cm.close(a.id, CloseReason::ClientClosed);

        assert!(cm.subscribe(a.id, "live_scores").is_err());
        assert!(cm.subscribers_of(Topic::LiveScores).is_empty());
    }

    #[test]
    fn test_fan_out_only_reaches_subscribers() {
        let cm = ConnectionManager::new();
        let (a, mut ra) = register(&cm, 4);
        let (_b, mut rb) = register(&cm, 4);
        cm.subscribe(a.id, "live_scores").unwrap();

        let result = cm.fan_out(Topic::LiveScores, &frame());
        assert_eq!(result.delivered, 1);
        assert!(matches!(ra.try_recv(), Ok(OutboundMessage::Stream(_))));
        assert!(rb.try_recv().is_err());
    }

    #[test]
    fn test_fan_out_reports_full_queue() {
        let cm = ConnectionManager::new();
        let (a, _ra) = register(&cm, 1);
        cm.subscribe(a.id, "live_scores").unwrap();

        assert_eq!(cm.fan_out(Topic::LiveScores, &frame()).delivered, 1);
        let second = cm.fan_out(Topic::LiveScores, &frame());
        assert_eq!(second.delivered, 0);
        assert_eq!(second.overflowed, vec![a.id]);
    }

    #[test]
    fn test_fan_out_to_dropped_receiver_counts_failure() {
        let cm = ConnectionManager::new();
        let (a, ra) = register(&cm, 4);
        cm.subscribe(a.id, "live_scores").unwrap();
        drop(ra);

        let result = cm.fan_out(Topic::LiveScores, &frame());
        assert_eq!(result.delivered, 0);
        assert_eq!(result.failed, 1);
    }

    #[tokio::test]
    async fn test_concurrent_close_triggers_clean_up_once() {
        let cm = Arc::new(ConnectionManager::new());

        for _ in 0..50 {
            let (h, _rx) = register(&cm, 4);
            cm.subscribe(h.id, "live_scores").unwrap();
            cm.subscribe(h.id, "player_tracking").unwrap();

            let reasons = [
                CloseReason::ClientClosed,
                CloseReason::TransportError,
                CloseReason::HeartbeatTimeout,
            ];
            let tasks: Vec<_> = reasons
                .into_iter()
                .map(|reason| {
                    let cm = cm.clone();
                    let id = h.id;
                    tokio::spawn(async move { cm.close(id, reason) })
                })
                .collect();

            let mut winners = 0;
            for task in tasks {
                if task.await.unwrap() {
                    winners += 1;
                }
            }
            assert_eq!(winners, 1);
        }

        let stats = cm.stats();
        assert_eq!(stats.total_closed, 50);
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.total_subscriptions, 0);
        assert!(cm.is_consistent());
    }

    #[test]
    fn test_subscribed_ack_precedes_first_frame() {
        let cm = ConnectionManager::new();
        let (a, mut ra) = register(&cm, 4);

        assert_eq!(
            cm.subscribe_with_ack(a.id, "live_scores").unwrap(),
            (Topic::LiveScores, true)
        );
        assert_eq!(cm.fan_out(Topic::LiveScores, &frame()).delivered, 1);

        assert!(matches!(
            ra.try_recv().unwrap(),
            OutboundMessage::Control(ServerMessage::Subscribed { stream: Topic::LiveScores, .. })
        ));
        assert!(matches!(ra.try_recv().unwrap(), OutboundMessage::Stream(_)));
    }

    #[test]
    fn test_unsubscribed_ack_is_last_frame_for_topic() {
        let cm = ConnectionManager::new();
        let (a, mut ra) = register(&cm, 4);
        cm.subscribe(a.id, "live_scores").unwrap();

        cm.unsubscribe_with_ack(a.id, "live_scores").unwrap();
        assert_eq!(cm.fan_out(Topic::LiveScores, &frame()).delivered, 0);

        assert!(matches!(
            ra.try_recv().unwrap(),
            OutboundMessage::Control(ServerMessage::Unsubscribed { .. })
        ));
        assert!(ra.try_recv().is_err());
    }

    #[test]
    fn test_ack_into_full_queue_closes_slow_consumer() {
        let cm = ConnectionManager::new();
        let (a, _ra) = register(&cm, 1);
        a.try_send(frame()).unwrap();

        let err = cm.subscribe_with_ack(a.id, "team_analytics").unwrap_err();
        assert!(matches!(err, StreamError::Transport(_)));
        assert_eq!(a.close_reason(), Some(CloseReason::SlowConsumer));
        assert!(cm.is_empty());
        assert_eq!(cm.total_subscriptions(), 0);
        assert!(cm.is_consistent());
    }

    #[test]
    fn test_concurrent_registrations_respect_limit() {
        let cm = Arc::new(ConnectionManager::with_limits(ConnectionLimits { max_connections: 8 }));
        let receivers = Arc::new(parking_lot::Mutex::new(Vec::new()));

        std::thread::scope(|scope| {
            for _ in 0..64 {
                let cm = cm.clone();
                let receivers = receivers.clone();
                scope.spawn(move || {
                    let (tx, rx) = mpsc::channel(4);
                    if cm.register(ConnectionMeta::default(), tx).is_ok() {
                        receivers.lock().push(rx);
                    }
                });
            }
        });

        assert_eq!(cm.len(), 8);
        assert_eq!(receivers.lock().len(), 8);

        // Closing frees a slot for the next accept
        let id = cm.connection_ids()[0];
        assert!(cm.close(id, CloseReason::ClientClosed));
        let (_b, _rb) = register(&cm, 4);
        assert_eq!(cm.len(), 8);
    }

    #[tokio::test]
    async fn test_control_send_reaches_receiver() {
        let cm = ConnectionManager::new();
        let (a, mut ra) = register(&cm, 4);
        tokio_test::assert_ok!(a.send(ServerMessage::pong()).await);
        assert!(matches!(ra.recv().await, Some(OutboundMessage::Control(ServerMessage::Pong { .. }))));
    }
}
