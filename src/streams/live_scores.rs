//! Live scores feed and the event-driven game updates derived from it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::StreamError;
use crate::upstream::{GameStatus, LiveDataProvider, LiveGame};

use super::{StreamBroadcaster, StreamSource, Topic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameUpdateKind {
    NewGame,
    ScoreChange,
    StatusChange,
}

/// A change observed between two scoreboard snapshots
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameUpdate {
    pub kind: GameUpdateKind,
    pub game_id: String,
    pub league: String,
    pub game: LiveGame,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<GameSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub home_score: u32,
    pub away_score: u32,
    pub status: GameStatus,
}

impl From<&LiveGame> for GameSnapshot {
    fn from(game: &LiveGame) -> Self {
        Self {
            home_score: game.home_score,
            away_score: game.away_score,
            status: game.status,
        }
    }
}

/// Diffs consecutive scoreboards into game updates.
///
/// The first snapshot only primes the detector; nothing is emitted for it.
#[derive(Debug, Default)]
pub struct GameUpdateDetector {
    last: HashMap<String, GameSnapshot>,
    primed: bool,
}

impl GameUpdateDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diff(&mut self, games: &[LiveGame]) -> Vec<GameUpdate> {
        let mut updates = Vec::new();

        for game in games {
            let current = GameSnapshot::from(game);
            let previous = self.last.insert(game.id.clone(), current);

            if !self.primed {
                continue;
            }

            let kind = match previous {
                None => Some(GameUpdateKind::NewGame),
                Some(prev) if prev.status != current.status => Some(GameUpdateKind::StatusChange),
                Some(prev) if prev.home_score != current.home_score || prev.away_score != current.away_score => {
                    Some(GameUpdateKind::ScoreChange)
                }
                Some(_) => None,
            };

            if let Some(kind) = kind {
                updates.push(GameUpdate {
                    kind,
                    game_id: game.id.clone(),
                    league: game.league.clone(),
                    game: game.clone(),
                    previous,
                });
            }
        }

        self.primed = true;
        updates
    }
}

/// Publishes the full scoreboard every tick and pushes per-game changes to
/// `game_updates` as they are detected.
pub struct LiveScoresSource {
    provider: Arc<dyn LiveDataProvider>,
    broadcaster: Arc<StreamBroadcaster>,
    detector: Mutex<GameUpdateDetector>,
}

impl LiveScoresSource {
    pub fn new(provider: Arc<dyn LiveDataProvider>, broadcaster: Arc<StreamBroadcaster>) -> Self {
        Self {
            provider,
            broadcaster,
            detector: Mutex::new(GameUpdateDetector::new()),
        }
    }
}

#[async_trait]
impl StreamSource for LiveScoresSource {
    fn topic(&self) -> Topic {
        Topic::LiveScores
    }

    async fn produce(&self) -> Result<Value, StreamError> {
        let games = self.provider.get_all_live_data().await?;

        let updates = self.detector.lock().diff(&games);
        for update in &updates {
            self.broadcaster
                .publish_event(Topic::GameUpdates, &json!(update));
        }
        if !updates.is_empty() {
            tracing::debug!(count = updates.len(), "Detected game updates");
        }

        Ok(json!({
            "games": games,
            "count": games.len(),
            "source": self.provider.name(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_manager::{ConnectionManager, ConnectionMeta};
    use crate::upstream::UpstreamError;
    use crate::websocket::OutboundMessage;
    use chrono::Utc;
    use tokio::sync::mpsc;

    fn game(id: &str, home: u32, away: u32, status: GameStatus) -> LiveGame {
        LiveGame {
            id: id.to_string(),
            league: "nfl".to_string(),
            sport: "football".to_string(),
            home_team: "Tennessee Titans".to_string(),
            away_team: "Houston Texans".to_string(),
            home_score: home,
            away_score: away,
            status,
            period: None,
            clock: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_first_snapshot_only_primes() {
        let mut detector = GameUpdateDetector::new();
        assert!(detector.diff(&[game("a", 0, 0, GameStatus::InProgress)]).is_empty());
        assert!(detector.diff(&[game("a", 0, 0, GameStatus::InProgress)]).is_empty());
    }

    #[test]
    fn test_detects_each_kind() {
        let mut detector = GameUpdateDetector::new();
        detector.diff(&[
            game("a", 0, 0, GameStatus::InProgress),
            game("b", 7, 3, GameStatus::InProgress),
        ]);

        let updates = detector.diff(&[
            game("a", 3, 0, GameStatus::InProgress),
            game("b", 7, 3, GameStatus::Final),
            game("c", 0, 0, GameStatus::Scheduled),
        ]);

        let kinds: Vec<_> = updates.iter().map(|u| (u.game_id.as_str(), u.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("a", GameUpdateKind::ScoreChange),
                ("b", GameUpdateKind::StatusChange),
                ("c", GameUpdateKind::NewGame),
            ]
        );
        assert_eq!(updates[0].previous.unwrap().home_score, 0);
        assert!(updates[2].previous.is_none());
    }

    #[test]
    fn test_update_wire_shape() {
        let mut detector = GameUpdateDetector::new();
        detector.diff(&[game("a", 0, 0, GameStatus::InProgress)]);
        let updates = detector.diff(&[game("a", 0, 6, GameStatus::InProgress)]);

        let json = json!(updates[0]);
        assert_eq!(json["kind"], "score_change");
        assert_eq!(json["gameId"], "a");
        assert_eq!(json["game"]["awayScore"], 6);
        assert_eq!(json["previous"]["awayScore"], 0);
    }

    struct ScriptedProvider {
        boards: Mutex<Vec<Vec<LiveGame>>>,
    }

    #[async_trait]
    impl LiveDataProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn get_live_data(&self, _league: &str) -> Result<Vec<LiveGame>, UpstreamError> {
            self.get_all_live_data().await
        }

        async fn get_all_live_data(&self) -> Result<Vec<LiveGame>, UpstreamError> {
            let mut boards = self.boards.lock();
            if boards.is_empty() {
                Err(UpstreamError::Status(503))
            } else {
                Ok(boards.remove(0))
            }
        }
    }

    #[tokio::test]
    async fn test_source_pushes_game_updates() {
        let cm = Arc::new(ConnectionManager::new());
        let broadcaster = Arc::new(StreamBroadcaster::new(cm.clone()));
        let provider = Arc::new(ScriptedProvider {
            boards: Mutex::new(vec![
                vec![game("a", 0, 0, GameStatus::InProgress)],
                vec![game("a", 7, 0, GameStatus::InProgress)],
            ]),
        });
        let source = LiveScoresSource::new(provider, broadcaster);

        let (tx, mut rx) = mpsc::channel(8);
        let conn = cm.register(ConnectionMeta::default(), tx).unwrap();
        cm.subscribe(conn.id, "game_updates").unwrap();

        let first = source.produce().await.unwrap();
        assert_eq!(first["count"], 1);
        assert_eq!(first["source"], "scripted");
        assert!(rx.try_recv().is_err());

        source.produce().await.unwrap();
        match rx.try_recv().unwrap() {
            OutboundMessage::Stream(text) => {
                let v: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(v["type"], "game_updates");
                assert_eq!(v["data"]["kind"], "score_change");
            }
            other => panic!("unexpected message: {:?}", other),
        }

        // Upstream failure surfaces as an error for the publisher to log
        let err = source.produce().await.unwrap_err();
        assert!(matches!(err, StreamError::UpstreamFetch(UpstreamError::Status(503))));
    }
}
