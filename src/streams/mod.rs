//! Topic catalogue, data sources and periodic publishers.

mod broadcaster;
mod live_scores;
mod publisher;
mod source;
mod synthetic;
mod topic;

pub use broadcaster::{DeliveryResult, StreamBroadcaster};
pub use live_scores::{GameUpdate, GameUpdateDetector, GameUpdateKind, LiveScoresSource};
pub use publisher::{default_sources, spawn_publishers, StreamPublisher, TickOutcome};
pub use source::StreamSource;
pub use synthetic::{
    stress_level, PerformanceMetricsSource, PlayerTrackingSource, PressureAnalyticsSource,
    TeamAnalyticsSource,
};
pub use topic::{Topic, TopicInfo};
