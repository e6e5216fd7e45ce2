use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::streams::{Topic, TopicInfo};

/// Messages sent from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        stream: String,
    },
    Unsubscribe {
        stream: String,
    },
    Ping,
    GetLiveData {
        #[serde(default)]
        sport: Option<String>,
        #[serde(default)]
        league: Option<String>,
        #[serde(default)]
        teams: Vec<String>,
    },
    GetGameUpdates {
        #[serde(rename = "gameId")]
        game_id: String,
        #[serde(default)]
        league: Option<String>,
    },
}

impl ClientMessage {
    /// Wire name of the message type
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Ping => "ping",
            Self::GetLiveData { .. } => "get_live_data",
            Self::GetGameUpdates { .. } => "get_game_updates",
        }
    }
}

/// Control and reply messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connection {
        status: &'static str,
        #[serde(rename = "clientId")]
        client_id: Uuid,
        timestamp: DateTime<Utc>,
        #[serde(rename = "availableStreams")]
        available_streams: Vec<TopicInfo>,
    },
    Subscribed {
        stream: Topic,
        timestamp: DateTime<Utc>,
    },
    Unsubscribed {
        stream: Topic,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    LiveData {
        data: Value,
        timestamp: DateTime<Utc>,
    },
    GameUpdate {
        data: Value,
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage {
    pub fn connected(client_id: Uuid, available_streams: Vec<TopicInfo>) -> Self {
        Self::Connection {
            status: "connected",
            client_id,
            timestamp: Utc::now(),
            available_streams,
        }
    }

    pub fn subscribed(stream: Topic) -> Self {
        Self::Subscribed {
            stream,
            timestamp: Utc::now(),
        }
    }

    pub fn unsubscribed(stream: Topic) -> Self {
        Self::Unsubscribed {
            stream,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Utc::now(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: Utc::now(),
        }
    }

    pub fn live_data(data: Value) -> Self {
        Self::LiveData {
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn game_update(data: Value) -> Self {
        Self::GameUpdate {
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Pushed stream data: `{type: <topic>, data, timestamp}`
#[derive(Debug, Serialize)]
pub struct StreamFrame<'a> {
    #[serde(rename = "type")]
    pub topic: Topic,
    pub data: &'a Value,
    pub timestamp: DateTime<Utc>,
}

impl<'a> StreamFrame<'a> {
    pub fn new(topic: Topic, data: &'a Value) -> Self {
        Self {
            topic,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Serialize once so the same text can be shared by every subscriber
    pub fn encode(&self) -> Result<OutboundMessage, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(OutboundMessage::Stream(Arc::from(json)))
    }
}

/// What sits in a connection's outbound queue
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Serialized by the writer task
    Control(ServerMessage),
    /// Pre-serialized stream frame shared across subscribers
    Stream(Arc<str>),
}

impl OutboundMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Control(msg) => serde_json::to_string(msg),
            Self::Stream(text) => Ok(text.to_string()),
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Control(ServerMessage::Heartbeat { .. }))
    }
}

impl From<ServerMessage> for OutboundMessage {
    fn from(msg: ServerMessage) -> Self {
        Self::Control(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_client_messages() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","stream":"live_scores"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Subscribe { ref stream } if stream == "live_scores"));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"get_live_data","sport":"baseball","league":"mlb","teams":["Cardinals"]}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::GetLiveData { sport, league, teams } => {
                assert_eq!(sport.as_deref(), Some("baseball"));
                assert_eq!(league.as_deref(), Some("mlb"));
                assert_eq!(teams, vec!["Cardinals".to_string()]);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"get_game_updates","gameId":"mlb-1"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::GetGameUpdates { ref game_id, league: None } if game_id == "mlb-1"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"stream":"live_scores"}"#).is_err());
    }

    #[test]
    fn test_connection_ack_shape() {
        let id = Uuid::new_v4();
        let catalogue = crate::config::StreamsConfig::default().catalogue();
        let json = serde_json::to_value(ServerMessage::connected(id, catalogue)).unwrap();

        assert_eq!(json["type"], "connection");
        assert_eq!(json["status"], "connected");
        assert_eq!(json["clientId"], id.to_string());
        assert!(json["timestamp"].is_string());
        assert_eq!(json["availableStreams"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn test_control_message_tags() {
        let cases = [
            (ServerMessage::subscribed(Topic::LiveScores), "subscribed"),
            (ServerMessage::unsubscribed(Topic::LiveScores), "unsubscribed"),
            (ServerMessage::error("nope"), "error"),
            (ServerMessage::pong(), "pong"),
            (ServerMessage::heartbeat(), "heartbeat"),
            (ServerMessage::live_data(json!({})), "live_data"),
            (ServerMessage::game_update(json!({})), "game_update"),
        ];

        for (msg, tag) in cases {
            let json = serde_json::to_value(&msg).unwrap();
            assert_eq!(json["type"], tag);
            assert!(json["timestamp"].is_string());
        }

        let json = serde_json::to_value(ServerMessage::subscribed(Topic::LiveScores)).unwrap();
        assert_eq!(json["stream"], "live_scores");
    }

    #[test]
    fn test_stream_frame_shape() {
        let data = json!({"players": [{"playerId": "p1"}]});
        let outbound = StreamFrame::new(Topic::PressureAnalytics, &data).encode().unwrap();

        let text = outbound.to_json().unwrap();
        let json: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["type"], "pressure_analytics");
        assert_eq!(json["data"]["players"][0]["playerId"], "p1");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_heartbeat_detection() {
        assert!(OutboundMessage::from(ServerMessage::heartbeat()).is_heartbeat());
        assert!(!OutboundMessage::from(ServerMessage::pong()).is_heartbeat());
    }
}
