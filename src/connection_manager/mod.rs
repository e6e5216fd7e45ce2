//! Connection registry and subscription index.

mod registry;
mod stats;
mod subscriptions;
mod types;

pub use registry::{ConnectionManager, FanOut};
pub use stats::ConnectionStats;
pub use subscriptions::SubscriptionIndex;
pub use types::{
    now_millis, CloseReason, ConnectionError, ConnectionHandle, ConnectionLimits, ConnectionMeta,
    ConnectionState, HeartbeatState,
};
