//! Connection statistics

use serde::Serialize;
use std::collections::HashMap;

/// Connection statistics
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub total_subscriptions: usize,
    /// topic name -> subscriber count
    pub topics: HashMap<String, usize>,
    /// Connections closed since startup
    pub total_closed: u64,
}
