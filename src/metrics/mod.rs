//! Prometheus metrics for the stream service.
//!
//! - Connection metrics (active, opened, closed by reason)
//! - Subscription metrics (subscribers per topic)
//! - Publisher metrics (ticks by outcome, frames delivered, production latency)
//! - Heartbeat metrics (rounds, timeouts)
//! - Inbound WebSocket message metrics

mod helpers;

pub use helpers::{
    encode_metrics, ConnectionMetrics, HeartbeatMetrics, StreamMetrics, WsMessageMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Histogram, HistogramVec, IntCounter,
    IntCounterVec, IntGauge, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "arena";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Number of open WebSocket connections
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of open WebSocket connections"
    ).unwrap();

    /// Connections accepted since startup
    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections accepted"
    ).unwrap();

    /// Connections closed since startup, by reason
    pub static ref CONNECTIONS_CLOSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed",
        &["reason"]
    ).unwrap();

    /// Current subscribers per topic
    pub static ref TOPIC_SUBSCRIBERS: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_topic_subscribers", METRIC_PREFIX),
        "Number of subscribers per topic",
        &["topic"]
    ).unwrap();

    // ============================================================================
    // Publisher Metrics
    // ============================================================================

    /// Publish ticks by topic and outcome (published, failed, timeout)
    pub static ref STREAM_TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_stream_ticks_total", METRIC_PREFIX),
        "Publisher ticks by topic and outcome",
        &["topic", "outcome"]
    ).unwrap();

    /// Stream frames queued to subscribers
    pub static ref STREAM_FRAMES_DELIVERED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_stream_frames_delivered_total", METRIC_PREFIX),
        "Stream frames queued for delivery",
        &["topic"]
    ).unwrap();

    /// Connections dropped because their outbound queue was full
    pub static ref SLOW_CONSUMERS_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_slow_consumers_dropped_total", METRIC_PREFIX),
        "Connections closed because they could not keep up"
    ).unwrap();

    /// Time spent producing a payload
    pub static ref STREAM_PRODUCE_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_stream_produce_latency_seconds", METRIC_PREFIX),
        "Payload production latency in seconds",
        &["topic"],
        vec![0.0001, 0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    /// Duration of a heartbeat round
    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Heartbeat round duration in milliseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
    ).unwrap();

    /// Connections closed for missing heartbeats
    pub static ref HEARTBEAT_TIMEOUTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeat_timeouts_total", METRIC_PREFIX),
        "Connections closed after heartbeat timeout"
    ).unwrap();

    // ============================================================================
    // WebSocket Message Metrics
    // ============================================================================

    /// Inbound messages by type (including "invalid")
    pub static ref WS_MESSAGES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_messages_received_total", METRIC_PREFIX),
        "Inbound WebSocket messages by type",
        &["type"]
    ).unwrap();
}
