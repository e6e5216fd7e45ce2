use async_trait::async_trait;
use serde_json::Value;

use crate::error::StreamError;

use super::Topic;

/// Produces one payload per publisher tick.
///
/// Synthetic telemetry and upstream-backed feeds both sit behind this trait, so the
/// publisher's scheduling never depends on where data comes from.
#[async_trait]
pub trait StreamSource: Send + Sync {
    fn topic(&self) -> Topic;

    async fn produce(&self) -> Result<Value, StreamError>;
}
