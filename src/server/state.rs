use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::connection_manager::{ConnectionLimits, ConnectionManager};
use crate::streams::StreamBroadcaster;
use crate::upstream::LiveDataProvider;
use crate::websocket::MessageRouter;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub connection_manager: Arc<ConnectionManager>,
    pub broadcaster: Arc<StreamBroadcaster>,
    pub router: Arc<MessageRouter>,
    pub live_data: Arc<dyn LiveDataProvider>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, live_data: Arc<dyn LiveDataProvider>) -> Self {
        let connection_manager = Arc::new(ConnectionManager::with_limits(ConnectionLimits {
            max_connections: settings.websocket.max_connections,
        }));
        let broadcaster = Arc::new(StreamBroadcaster::new(connection_manager.clone()));
        let router = Arc::new(MessageRouter::new(
            connection_manager.clone(),
            live_data.clone(),
            settings.upstream.request_timeout(),
        ));

        Self {
            settings: Arc::new(settings),
            connection_manager,
            broadcaster,
            router,
            live_data,
            start_time: Instant::now(),
        }
    }
}
