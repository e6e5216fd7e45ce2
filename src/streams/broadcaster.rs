use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::connection_manager::{CloseReason, ConnectionManager};
use crate::metrics::StreamMetrics;
use crate::websocket::StreamFrame;

use super::Topic;

/// Result of one publish to a topic
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    pub topic: Topic,
    /// Frames queued to subscribers
    pub delivered: usize,
    /// Subscribers whose transport was already gone
    pub failed: usize,
    /// Subscribers closed as slow consumers
    pub dropped: usize,
}

impl DeliveryResult {
    fn empty(topic: Topic) -> Self {
        Self {
            topic,
            delivered: 0,
            failed: 0,
            dropped: 0,
        }
    }
}

/// Wraps payloads as stream frames and pushes them to a topic's current subscribers
pub struct StreamBroadcaster {
    connection_manager: Arc<ConnectionManager>,
}

impl StreamBroadcaster {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self { connection_manager }
    }

    /// Deliver `data` as a `{type: topic, data, timestamp}` frame.
    ///
    /// The subscriber set is read at delivery time. Subscribers that cannot take the
    /// frame because their queue is full are closed as slow consumers.
    pub fn publish(&self, topic: Topic, data: &Value) -> DeliveryResult {
        let frame = match StreamFrame::new(topic, data).encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(topic = %topic, error = %e, "Failed to serialize stream frame");
                return DeliveryResult::empty(topic);
            }
        };

        let fan_out = self.connection_manager.fan_out(topic, &frame);

        let mut dropped = 0;
        for id in &fan_out.overflowed {
            if self.connection_manager.close(*id, CloseReason::SlowConsumer) {
                dropped += 1;
                tracing::warn!(connection_id = %id, topic = %topic, "Dropping slow consumer");
            }
        }
        if dropped > 0 {
            StreamMetrics::record_slow_consumers(dropped);
        }

        DeliveryResult {
            topic,
            delivered: fan_out.delivered,
            failed: fan_out.failed,
            dropped,
        }
    }

    /// Deliver an event on an event-driven topic
    pub fn publish_event(&self, topic: Topic, data: &Value) -> DeliveryResult {
        let result = self.publish(topic, data);
        StreamMetrics::record_published(topic, result.delivered);
        tracing::debug!(
            topic = %topic,
            delivered = result.delivered,
            "Published event"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_manager::ConnectionMeta;
    use crate::websocket::OutboundMessage;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[test]
    fn test_publish_reaches_only_subscribers() {
        let cm = Arc::new(ConnectionManager::new());
        let broadcaster = StreamBroadcaster::new(cm.clone());

        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let a = cm.register(ConnectionMeta::default(), tx_a).unwrap();
        let _b = cm.register(ConnectionMeta::default(), tx_b).unwrap();
        cm.subscribe(a.id, "team_analytics").unwrap();

        let result = broadcaster.publish(Topic::TeamAnalytics, &json!({"teams": []}));
        assert_eq!(result.delivered, 1);

        match rx_a.try_recv().unwrap() {
            OutboundMessage::Stream(text) => {
                let v: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(v["type"], "team_analytics");
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_slow_consumer_is_closed() {
        let cm = Arc::new(ConnectionManager::new());
        let broadcaster = StreamBroadcaster::new(cm.clone());

        let (tx, _rx) = mpsc::channel(1);
        let a = cm.register(ConnectionMeta::default(), tx).unwrap();
        cm.subscribe(a.id, "player_tracking").unwrap();

        assert_eq!(broadcaster.publish(Topic::PlayerTracking, &json!({})).delivered, 1);
        let second = broadcaster.publish(Topic::PlayerTracking, &json!({}));
        assert_eq!(second.dropped, 1);

        assert!(cm.get(a.id).is_none());
        assert_eq!(a.close_reason(), Some(CloseReason::SlowConsumer));
        assert!(cm.subscribers_of(Topic::PlayerTracking).is_empty());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let cm = Arc::new(ConnectionManager::new());
        let broadcaster = StreamBroadcaster::new(cm);
        let result = broadcaster.publish_event(Topic::GameUpdates, &json!({"gameId": "x"}));
        assert_eq!(result.delivered, 0);
    }
}
