use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use crate::connection_manager::{ConnectionHandle, ConnectionManager};
use crate::error::StreamError;
use crate::metrics::WsMessageMetrics;
use crate::upstream::{LiveDataProvider, LiveGame, UpstreamError};

use super::message::{ClientMessage, ServerMessage};

/// Parses inbound text frames and dispatches them by message type.
///
/// Nothing a client sends can close its own connection from here: every rejected
/// request is answered with an `error` frame.
pub struct MessageRouter {
    connection_manager: Arc<ConnectionManager>,
    live_data: Arc<dyn LiveDataProvider>,
    request_timeout: Duration,
}

impl MessageRouter {
    pub fn new(
        connection_manager: Arc<ConnectionManager>,
        live_data: Arc<dyn LiveDataProvider>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            connection_manager,
            live_data,
            request_timeout,
        }
    }

    /// Handle one inbound text frame
    pub async fn route_text(&self, handle: &Arc<ConnectionHandle>, text: &str) {
        handle.touch();

        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                WsMessageMetrics::record_invalid();
                tracing::warn!(connection_id = %handle.id, error = %e, "Failed to parse client message");
                reply_error(handle, &StreamError::Protocol(e.to_string())).await;
                return;
            }
        };

        self.dispatch(handle, msg).await;
    }

    #[tracing::instrument(
        name = "ws.message",
        skip(self, handle, msg),
        fields(connection_id = %handle.id, message_type = msg.kind())
    )]
    pub async fn dispatch(&self, handle: &Arc<ConnectionHandle>, msg: ClientMessage) {
        WsMessageMetrics::record(msg.kind());

        match msg {
            ClientMessage::Subscribe { stream } => self.handle_subscribe(handle, &stream).await,
            ClientMessage::Unsubscribe { stream } => self.handle_unsubscribe(handle, &stream).await,
            ClientMessage::Ping => {
                let _ = handle.send(ServerMessage::pong()).await;
            }
            ClientMessage::GetLiveData { sport, league, teams } => {
                self.spawn_live_data(handle, sport, league, teams);
            }
            ClientMessage::GetGameUpdates { game_id, league } => {
                self.spawn_game_updates(handle, game_id, league);
            }
        }
    }

    async fn handle_subscribe(&self, handle: &Arc<ConnectionHandle>, stream: &str) {
        // The ack is queued by the registry under the index lock, ahead of any frame
        match self.connection_manager.subscribe_with_ack(handle.id, stream) {
            Ok((topic, added)) => {
                if added {
                    tracing::info!(connection_id = %handle.id, topic = %topic, "Subscribed to stream");
                }
            }
            Err(e) => {
                tracing::warn!(connection_id = %handle.id, stream = %stream, error = %e, "Subscribe rejected");
                reply_error(handle, &e).await;
            }
        }
    }

    async fn handle_unsubscribe(&self, handle: &Arc<ConnectionHandle>, stream: &str) {
        match self.connection_manager.unsubscribe_with_ack(handle.id, stream) {
            Ok((topic, removed)) => {
                if removed {
                    tracing::info!(connection_id = %handle.id, topic = %topic, "Unsubscribed from stream");
                }
            }
            Err(e) => {
                tracing::warn!(connection_id = %handle.id, stream = %stream, error = %e, "Unsubscribe rejected");
                reply_error(handle, &e).await;
            }
        }
    }

    /// Snapshot requests run off the reader task so a slow upstream never delays this
    /// connection's subscribe and unsubscribe handling.
    fn spawn_live_data(
        &self,
        handle: &Arc<ConnectionHandle>,
        sport: Option<String>,
        league: Option<String>,
        teams: Vec<String>,
    ) {
        let handle = handle.clone();
        let provider = self.live_data.clone();
        let request_timeout = self.request_timeout;

        tokio::spawn(async move {
            let games = match fetch(provider.as_ref(), league.as_deref(), request_timeout).await {
                Ok(games) => games,
                Err(e) => {
                    tracing::warn!(connection_id = %handle.id, error = %e, "Live data request failed");
                    reply_error(&handle, &e).await;
                    return;
                }
            };

            let games = filter_games(games, sport.as_deref(), &teams);
            let data = json!({
                "games": games,
                "count": games.len(),
                "league": league,
                "sport": sport,
            });

            if handle.is_open() {
                let _ = handle.send(ServerMessage::live_data(data)).await;
            }
        });
    }

    fn spawn_game_updates(&self, handle: &Arc<ConnectionHandle>, game_id: String, league: Option<String>) {
        let handle = handle.clone();
        let provider = self.live_data.clone();
        let request_timeout = self.request_timeout;

        tokio::spawn(async move {
            let result = fetch(provider.as_ref(), league.as_deref(), request_timeout)
                .await
                .and_then(|games| {
                    games
                        .into_iter()
                        .find(|g| g.id == game_id)
                        .ok_or_else(|| StreamError::GameNotFound(game_id.clone()))
                });

            match result {
                Ok(game) if handle.is_open() => {
                    let _ = handle.send(ServerMessage::game_update(json!(game))).await;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(connection_id = %handle.id, game_id = %game_id, error = %e, "Game update request failed");
                    reply_error(&handle, &e).await;
                }
            }
        });
    }
}

async fn fetch(
    provider: &dyn LiveDataProvider,
    league: Option<&str>,
    request_timeout: Duration,
) -> Result<Vec<LiveGame>, StreamError> {
    let request = async {
        match league {
            Some(league) => provider.get_live_data(league).await,
            None => provider.get_all_live_data().await,
        }
    };

    match timeout(request_timeout, request).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(UpstreamError::Timeout.into()),
    }
}

/// Keep games matching the sport (exact, case-insensitive) and involving any of the teams
fn filter_games(games: Vec<LiveGame>, sport: Option<&str>, teams: &[String]) -> Vec<LiveGame> {
    games
        .into_iter()
        .filter(|g| sport.map_or(true, |s| g.sport.eq_ignore_ascii_case(s)))
        .filter(|g| teams.is_empty() || teams.iter().any(|t| g.involves_team(t)))
        .collect()
}

async fn reply_error(handle: &ConnectionHandle, error: &StreamError) {
    if handle.is_open() {
        let _ = handle.send(ServerMessage::error(error.to_string())).await;
    }
}
