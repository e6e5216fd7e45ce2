//! The fixed catalogue of broadcast topics.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::error::StreamError;

/// A named, independently scheduled stream of pushed data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    PressureAnalytics,
    LiveScores,
    PerformanceMetrics,
    GameUpdates,
    PlayerTracking,
    TeamAnalytics,
}

impl Topic {
    pub const ALL: [Topic; 6] = [
        Topic::PressureAnalytics,
        Topic::LiveScores,
        Topic::PerformanceMetrics,
        Topic::GameUpdates,
        Topic::PlayerTracking,
        Topic::TeamAnalytics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::PressureAnalytics => "pressure_analytics",
            Topic::LiveScores => "live_scores",
            Topic::PerformanceMetrics => "performance_metrics",
            Topic::GameUpdates => "game_updates",
            Topic::PlayerTracking => "player_tracking",
            Topic::TeamAnalytics => "team_analytics",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Topic::PressureAnalytics => "Real-time biometric pressure readings for players on the field",
            Topic::LiveScores => "Live game scores across tracked leagues",
            Topic::PerformanceMetrics => "Rolling player performance and fatigue metrics",
            Topic::GameUpdates => "Score and status changes as they happen",
            Topic::PlayerTracking => "High-frequency player position and movement tracking",
            Topic::TeamAnalytics => "Team-level momentum, possession and win probability",
        }
    }

    /// Default publish cadence; `None` means the topic is event-driven.
    pub fn nominal_cadence(&self) -> Option<Duration> {
        match self {
            Topic::PressureAnalytics => Some(Duration::from_secs(1)),
            Topic::LiveScores => Some(Duration::from_secs(30)),
            Topic::PerformanceMetrics => Some(Duration::from_secs(5)),
            Topic::GameUpdates => None,
            Topic::PlayerTracking => Some(Duration::from_millis(100)),
            Topic::TeamAnalytics => Some(Duration::from_secs(10)),
        }
    }

    pub fn update_frequency(&self) -> String {
        frequency_label(self.nominal_cadence())
    }

    /// Catalogue entry advertising `cadence` as the update frequency
    pub fn info(&self, cadence: Option<Duration>) -> TopicInfo {
        TopicInfo {
            name: *self,
            description: self.description(),
            update_frequency: frequency_label(cadence),
        }
    }

    /// Every topic with the cadence reported by `cadence_of`
    pub fn catalogue(cadence_of: impl Fn(Topic) -> Option<Duration>) -> Vec<TopicInfo> {
        Self::ALL.iter().map(|t| t.info(cadence_of(*t))).collect()
    }
}

fn frequency_label(cadence: Option<Duration>) -> String {
    match cadence {
        None => "event-driven".to_string(),
        Some(d) if d.subsec_millis() != 0 || d.as_secs() == 0 => format!("{}ms", d.as_millis()),
        Some(d) => format!("{}s", d.as_secs()),
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StreamError::UnknownTopic(s.to_string()))
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Entry of the `availableStreams` list sent on connect
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicInfo {
    pub name: Topic,
    pub description: &'static str,
    pub update_frequency: String,
}
