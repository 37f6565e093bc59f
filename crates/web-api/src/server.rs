use crate::identity::{HeaderIdentity, IdentityProvider};
use crate::{handlers, websocket};
use axum::{routing::get, Router};
use parlay_live::{Broadcaster, ScoreCache};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared handles behind every route.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ScoreCache>,
    pub broadcaster: Arc<Broadcaster>,
    pub identity: Arc<dyn IdentityProvider>,
    connections: Arc<AtomicU64>,
}

impl AppState {
    #[must_use]
    pub fn new(cache: Arc<ScoreCache>, broadcaster: Arc<Broadcaster>) -> Self {
        Self::with_identity(cache, broadcaster, Arc::new(HeaderIdentity::default()))
    }

    #[must_use]
    pub fn with_identity(
        cache: Arc<ScoreCache>,
        broadcaster: Arc<Broadcaster>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            cache,
            broadcaster,
            identity,
            connections: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn next_connection_id(&self) -> String {
        format!("ws-{}", self.connections.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    #[must_use]
    pub const fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/api/health", get(handlers::health))
            .route("/api/scores/:season/:period", get(handlers::standings))
            .route("/api/scores/:season/:period/:owner", get(handlers::owner_score))
            .route("/api/picks/:season/:period", get(handlers::picks))
            .route("/ws", get(websocket::websocket_handler))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serves until `shutdown` flips to `true`.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the address or serve requests.
    pub async fn serve(self, addr: &str, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Web API listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await?;

        tracing::info!("Web API stopped");
        Ok(())
    }
}
