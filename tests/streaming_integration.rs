//! End-to-end tests over a real WebSocket client.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use arena_stream_service::config::Settings;
use arena_stream_service::error::AppError;
use arena_stream_service::server::{AppState, StreamServer};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    url: String,
    state: AppState,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<arena_stream_service::error::Result<()>>,
}

/// Boot a server on an ephemeral port with the simulated upstream
async fn boot_server(configure: impl FnOnce(&mut Settings)) -> TestServer {
    let mut settings = Settings::default();
    settings.server.host = "127.0.0.1".to_string();
    settings.server.port = 0;
    configure(&mut settings);

    let server = StreamServer::bind(settings).await.unwrap();
    let addr = server.local_addr().unwrap();
    let state = server.state().clone();
    let shutdown = server.shutdown_handle();
    let task = tokio::spawn(server.run());

    TestServer {
        url: format!("ws://{addr}/ws"),
        state,
        shutdown,
        task,
    }
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next JSON text frame, skipping transport control frames
async fn recv_json(ws: &mut WsStream) -> Option<Value> {
    loop {
        match timeout(TIMEOUT, ws.next()).await.ok()?? {
            Ok(Message::Text(text)) => return Some(serde_json::from_str(text.as_str()).unwrap()),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

/// Read frames until one of the given type arrives, returning it and everything skipped
async fn recv_until(ws: &mut WsStream, kind: &str) -> (Value, Vec<Value>) {
    let mut skipped = Vec::new();
    loop {
        let msg = recv_json(ws).await.expect("connection ended early");
        if msg["type"] == kind {
            return (msg, skipped);
        }
        skipped.push(msg);
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_pressure_analytics_subscribe_unsubscribe() {
    let server = boot_server(|_| {}).await;
    let mut ws = connect(&server.url).await;

    let ack = recv_json(&mut ws).await.unwrap();
    assert_eq!(ack["type"], "connection");
    assert_eq!(ack["status"], "connected");
    assert!(ack["clientId"].is_string());
    assert_eq!(ack["availableStreams"].as_array().unwrap().len(), 6);

    send_json(&mut ws, json!({"type": "subscribe", "stream": "pressure_analytics"})).await;
    let (subscribed, _) = recv_until(&mut ws, "subscribed").await;
    assert_eq!(subscribed["stream"], "pressure_analytics");

    let frame = timeout(Duration::from_millis(1500), recv_until(&mut ws, "pressure_analytics"))
        .await
        .expect("pressure frame within 1.5s")
        .0;
    assert!(!frame["data"]["players"].as_array().unwrap().is_empty());
    assert!(frame["timestamp"].is_string());

    send_json(&mut ws, json!({"type": "unsubscribe", "stream": "pressure_analytics"})).await;
    let (unsubscribed, _) = recv_until(&mut ws, "unsubscribed").await;
    assert_eq!(unsubscribed["stream"], "pressure_analytics");

    let mut late_frames = 0;
    let window = Instant::now() + Duration::from_secs(5);
    while let Ok(next) = tokio::time::timeout_at(window, ws.next()).await {
        match next {
            Some(Ok(Message::Text(text))) => {
                let v: Value = serde_json::from_str(text.as_str()).unwrap();
                if v["type"] == "pressure_analytics" {
                    late_frames += 1;
                }
            }
            Some(Ok(_)) => {}
            _ => break,
        }
    }
    assert_eq!(late_frames, 0);

    let _ = server.shutdown.send(());
}

#[tokio::test]
async fn test_connection_ack_reports_configured_cadence() {
    let server = boot_server(|s| s.streams.live_scores_ms = 250).await;
    let mut ws = connect(&server.url).await;

    let (ack, _) = recv_until(&mut ws, "connection").await;
    let streams = ack["availableStreams"].as_array().unwrap();
    let live = streams.iter().find(|s| s["name"] == "live_scores").unwrap();
    assert_eq!(live["updateFrequency"], "250ms");
    let pressure = streams.iter().find(|s| s["name"] == "pressure_analytics").unwrap();
    assert_eq!(pressure["updateFrequency"], "1s");

    let _ = server.shutdown.send(());
}

#[tokio::test]
async fn test_protocol_errors_keep_connection_open() {
    let server = boot_server(|_| {}).await;
    let mut ws = connect(&server.url).await;
    recv_until(&mut ws, "connection").await;

    ws.send(Message::Text("{not json".into())).await.unwrap();
    assert_eq!(recv_until(&mut ws, "error").await.0["type"], "error");

    send_json(&mut ws, json!({"type": "subscribe", "stream": "not_a_real_stream"})).await;
    let (err, _) = recv_until(&mut ws, "error").await;
    assert_eq!(err["message"], "Unknown stream: not_a_real_stream");

    ws.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();
    recv_until(&mut ws, "error").await;

    send_json(&mut ws, json!({"type": "ping"})).await;
    recv_until(&mut ws, "pong").await;

    assert_eq!(server.state.connection_manager.len(), 1);
    assert_eq!(server.state.connection_manager.total_subscriptions(), 0);

    let _ = server.shutdown.send(());
}

#[tokio::test]
async fn test_live_data_request() {
    let server = boot_server(|s| s.upstream.leagues = vec!["nfl".to_string(), "nba".to_string()]).await;
    let mut ws = connect(&server.url).await;
    recv_until(&mut ws, "connection").await;

    send_json(&mut ws, json!({"type": "get_live_data", "league": "nba"})).await;
    let (reply, _) = recv_until(&mut ws, "live_data").await;
    let games = reply["data"]["games"].as_array().unwrap();
    assert!(!games.is_empty());
    assert!(games.iter().all(|g| g["league"] == "nba"));

    let game_id = games[0]["id"].as_str().unwrap().to_string();
    send_json(&mut ws, json!({"type": "get_game_updates", "gameId": game_id})).await;
    let (update, _) = recv_until(&mut ws, "game_update").await;
    assert_eq!(update["data"]["id"], game_id.as_str());

    let _ = server.shutdown.send(());
}

#[tokio::test]
async fn test_client_close_cleans_up_once() {
    let server = boot_server(|_| {}).await;
    let mut ws = connect(&server.url).await;
    recv_until(&mut ws, "connection").await;

    send_json(&mut ws, json!({"type": "subscribe", "stream": "team_analytics"})).await;
    recv_until(&mut ws, "subscribed").await;
    assert_eq!(server.state.connection_manager.total_subscriptions(), 1);

    ws.close(None).await.unwrap();

    let cm = server.state.connection_manager.clone();
    assert!(wait_for(|| cm.is_empty()).await);
    let stats = cm.stats();
    assert_eq!(stats.total_closed, 1);
    assert_eq!(stats.total_subscriptions, 0);
    assert!(cm.is_consistent());

    let _ = server.shutdown.send(());
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let server = boot_server(|s| {
        s.websocket.heartbeat_interval = 1;
        s.websocket.connection_timeout = 2;
    })
    .await;

    // Never read, so transport pings go unanswered
    let _ws = connect(&server.url).await;
    let cm = server.state.connection_manager.clone();
    assert!(wait_for(|| cm.len() == 1).await);

    assert!(wait_for(|| cm.is_empty()).await);
    assert_eq!(cm.stats().total_closed, 1);

    let _ = server.shutdown.send(());
}

#[tokio::test]
async fn test_invalid_settings_refuse_to_bind() {
    let mut settings = Settings::default();
    settings.server.host = "127.0.0.1".to_string();
    settings.server.port = 0;
    settings.websocket.outbound_queue_size = 0;

    let err = StreamServer::bind(settings).await.err().expect("bind should fail");
    assert!(matches!(err, AppError::Config(_)));
    assert!(err.to_string().contains("outbound_queue_size"));
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let server = boot_server(|_| {}).await;
    let mut ws = connect(&server.url).await;
    recv_until(&mut ws, "connection").await;
    send_json(&mut ws, json!({"type": "subscribe", "stream": "live_scores"})).await;
    recv_until(&mut ws, "subscribed").await;

    server.shutdown.send(()).unwrap();

    // The stream ends with a close frame once the connection is torn down
    let mut saw_end = false;
    while let Ok(next) = timeout(TIMEOUT, ws.next()).await {
        match next {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                saw_end = true;
                break;
            }
            Some(Ok(_)) => {}
        }
    }
    assert!(saw_end);

    timeout(TIMEOUT, server.task)
        .await
        .expect("server stops")
        .unwrap()
        .unwrap();
    assert!(server.state.connection_manager.is_empty());
}
