use crate::{
    access::AccessController,
    config::ServerConfig,
    error::{LockcamError, Result, ServerError},
    events::EventBus,
};
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::handlers::{health_handler, publish_handler, view_handler, RecognitionHook, RelayState};
use super::registry::ConnectionRegistry;

/// WebSocket relay server: one publisher and any number of viewers per camera
pub struct RelayServer {
    pub(crate) config: ServerConfig,
    pub(crate) state: RelayState,
}

impl RelayServer {
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.state.registry)
    }

    /// Routes served by the relay
    pub fn router(&self) -> Router {
        Router::new()
            .route("/publish/:camera_id", get(publish_handler))
            .route("/view/:camera_id", get(view_handler))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.ip, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::BindFailed {
                address: addr.clone(),
                source: e,
            })?;

        info!("Relay server listening on {}", addr);
        Ok(listener)
    }

    /// Bind the configured address and serve until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let connections = self.state.shutdown.clone();
        let app = self.router();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                // Open sockets close once their handlers see this
                connections.cancel();
            })
            .await
            .map_err(|e| ServerError::StartupFailed {
                details: format!("Server error: {}", e),
            })?;

        info!("Relay server stopped");
        Ok(())
    }
}

/// Relay server builder for configuration
pub struct RelayServerBuilder {
    config: Option<ServerConfig>,
    event_bus: Option<Arc<EventBus>>,
    registry: Option<Arc<ConnectionRegistry>>,
    recognition: Option<RecognitionHook>,
    access: Option<Arc<AccessController>>,
}

impl RelayServerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            event_bus: None,
            registry: None,
            recognition: None,
            access: None,
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Use an existing registry instead of creating one from the config
    pub fn registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Feed published frames to recognition
    pub fn recognition(mut self, hook: RecognitionHook) -> Self {
        self.recognition = Some(hook);
        self
    }

    /// Report lock states on `/health`
    pub fn access(mut self, access: Arc<AccessController>) -> Self {
        self.access = Some(access);
        self
    }

    pub fn build(self) -> Result<RelayServer> {
        let config = self.config.ok_or_else(|| {
            LockcamError::Server(ServerError::StartupFailed {
                details: "Server configuration is required".to_string(),
            })
        })?;

        let event_bus = self.event_bus.ok_or_else(|| {
            LockcamError::Server(ServerError::StartupFailed {
                details: "Event bus is required".to_string(),
            })
        })?;

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(ConnectionRegistry::new(config.subscriber_queue)));

        Ok(RelayServer {
            config,
            state: RelayState {
                registry,
                event_bus,
                recognition: self.recognition,
                access: self.access,
                shutdown: CancellationToken::new(),
            },
        })
    }
}

impl Default for RelayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
