//! Server facade: wires the registry, publishers, heartbeat and HTTP surface together
//! and owns the process-level start and stop sequence.

mod app;
mod state;

pub use app::create_app;
pub use state::AppState;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::Settings;
use crate::error::{AppError, Result};
use crate::shutdown::GracefulShutdown;
use crate::streams::{default_sources, spawn_publishers, StreamSource};
use crate::tasks::HeartbeatTask;
use crate::upstream::{create_live_data_provider, LiveDataProvider};

pub struct StreamServer {
    listener: TcpListener,
    state: AppState,
    shutdown_tx: broadcast::Sender<()>,
}

impl StreamServer {
    /// Bind the configured address with the configured live-data provider
    pub async fn bind(settings: Settings) -> Result<Self> {
        let provider = create_live_data_provider(&settings.upstream)
            .map_err(|e| AppError::Internal(format!("live-data provider: {}", e)))?;
        Self::bind_with_provider(settings, provider).await
    }

    pub async fn bind_with_provider(
        settings: Settings,
        provider: Arc<dyn LiveDataProvider>,
    ) -> Result<Self> {
        settings.validate()?;
        let addr = settings.server_addr();
        let listener = TcpListener::bind(&addr).await?;
        let (shutdown_tx, _) = broadcast::channel(1);

        tracing::info!(addr = %listener.local_addr()?, upstream = provider.name(), "Server bound");

        Ok(Self {
            listener,
            state: AppState::new(settings, provider),
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Sending on this stops the server
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Serve with the production stream sources until shutdown
    pub async fn run(self) -> Result<()> {
        let sources = default_sources(self.state.live_data.clone(), self.state.broadcaster.clone());
        self.run_with_sources(sources).await
    }

    pub async fn run_with_sources(self, sources: Vec<Arc<dyn StreamSource>>) -> Result<()> {
        let Self {
            listener,
            state,
            shutdown_tx,
        } = self;

        let mut tasks = spawn_publishers(
            sources,
            &state.settings.streams,
            state.broadcaster.clone(),
            &shutdown_tx,
        );

        let heartbeat = HeartbeatTask::new(
            state.settings.websocket.clone(),
            state.connection_manager.clone(),
            shutdown_tx.subscribe(),
        );
        tasks.push(tokio::spawn(heartbeat.run()));

        let shutdown = GracefulShutdown::new(state.connection_manager.clone());
        let mut shutdown_rx = shutdown_tx.subscribe();
        let app = create_app(state);

        tracing::info!(addr = %listener.local_addr()?, "Server listening");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            tracing::info!("Shutdown signal received, stopping server");
            shutdown.execute(tasks).await;
        })
        .await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}
