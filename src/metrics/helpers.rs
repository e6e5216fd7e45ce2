//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::connection_manager::CloseReason;
use crate::streams::Topic;

use super::{
    CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED_TOTAL, CONNECTIONS_OPENED_TOTAL,
    HEARTBEAT_DURATION_MS, HEARTBEAT_TIMEOUTS_TOTAL, SLOW_CONSUMERS_DROPPED_TOTAL,
    STREAM_FRAMES_DELIVERED_TOTAL, STREAM_PRODUCE_LATENCY, STREAM_TICKS_TOTAL,
    TOPIC_SUBSCRIBERS, WS_MESSAGES_RECEIVED,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording connection metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        CONNECTIONS_OPENED_TOTAL.inc();
        CONNECTIONS_ACTIVE.inc();
    }

    pub fn record_closed(reason: CloseReason) {
        CONNECTIONS_CLOSED_TOTAL
            .with_label_values(&[reason.as_str()])
            .inc();
        CONNECTIONS_ACTIVE.dec();
    }

    pub fn set_topic_subscribers(topic: Topic, count: usize) {
        TOPIC_SUBSCRIBERS
            .with_label_values(&[topic.as_str()])
            .set(count as i64);
    }
}

/// Helper struct for recording publisher metrics
pub struct StreamMetrics;

impl StreamMetrics {
    pub fn record_published(topic: Topic, delivered: usize) {
        STREAM_TICKS_TOTAL
            .with_label_values(&[topic.as_str(), "published"])
            .inc();
        STREAM_FRAMES_DELIVERED_TOTAL
            .with_label_values(&[topic.as_str()])
            .inc_by(delivered as u64);
    }

    pub fn record_failed(topic: Topic) {
        STREAM_TICKS_TOTAL
            .with_label_values(&[topic.as_str(), "failed"])
            .inc();
    }

    pub fn record_timeout(topic: Topic) {
        STREAM_TICKS_TOTAL
            .with_label_values(&[topic.as_str(), "timeout"])
            .inc();
    }

    pub fn record_produce_latency(topic: Topic, seconds: f64) {
        STREAM_PRODUCE_LATENCY
            .with_label_values(&[topic.as_str()])
            .observe(seconds);
    }

    pub fn record_slow_consumers(count: usize) {
        SLOW_CONSUMERS_DROPPED_TOTAL.inc_by(count as u64);
    }
}

/// Helper struct for recording heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    pub fn record_duration_ms(ms: u64) {
        HEARTBEAT_DURATION_MS.observe(ms as f64);
    }

    pub fn record_timeouts(count: u64) {
        HEARTBEAT_TIMEOUTS_TOTAL.inc_by(count);
    }
}

/// Helper struct for recording inbound WebSocket message metrics
pub struct WsMessageMetrics;

impl WsMessageMetrics {
    pub fn record(kind: &str) {
        WS_MESSAGES_RECEIVED.with_label_values(&[kind]).inc();
    }

    pub fn record_invalid() {
        WS_MESSAGES_RECEIVED.with_label_values(&["invalid"]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_recorded_metrics() {
        StreamMetrics::record_published(Topic::TeamAnalytics, 3);
        WsMessageMetrics::record("ping");

        let output = encode_metrics().unwrap();
        assert!(output.contains("arena_stream_ticks_total"));
        assert!(output.contains("arena_ws_messages_received_total"));
    }
}
