//! HTTP surface for the registry.

use super::directory::Registry;
use super::protocol::{HealthResponse, PeersQuery, RegisterRequest, RegisterResponse, unix_millis};
use crate::error::RegistryError;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// HTTP status for a registry error
fn status_for(error: &RegistryError) -> StatusCode {
    match error {
        RegistryError::DuplicateUsername(_) => StatusCode::CONFLICT,
        RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::InvalidUsername(_) => StatusCode::BAD_REQUEST,
        RegistryError::Unreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_response(error: &RegistryError) -> Response {
    (status_for(error), Json(RegisterResponse::err(error))).into_response()
}

/// Registry HTTP server bound to a local socket
pub struct RegistryServer {
    listener: TcpListener,
    registry: Arc<Registry>,
}

impl RegistryServer {
    /// Bind the server socket
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, registry: Arc<Registry>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Registry listening on {}", listener.local_addr()?);
        Ok(Self { listener, registry })
    }

    /// Address the server is actually bound to
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has been closed.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Route table over a registry
    pub fn router(registry: Arc<Registry>) -> Router {
        Router::new()
            .route("/register", post(handle_register))
            .route("/heartbeat/{username}", post(handle_heartbeat))
            .route("/unregister/{username}", delete(handle_unregister))
            .route("/peers", get(handle_peers))
            .route("/peerinfo/{username}", get(handle_peerinfo))
            .route("/health", get(handle_health))
            .with_state(registry)
    }

    /// Serve requests and run the expiry sweeper until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns an error if the accept loop fails.
    pub async fn serve<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sweeper = self.registry.spawn_sweeper();
        let app = Self::router(Arc::clone(&self.registry));

        let result = axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        sweeper.stop().await;
        tracing::info!("Registry stopped");
        result
    }
}

async fn handle_register(
    State(registry): State<Arc<Registry>>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    match registry.register(&req.username, &req.address, req.port, req.kind) {
        Ok(record) => (
            StatusCode::CREATED,
            Json(RegisterResponse::ok(Some(record))),
        )
            .into_response(),
        Err(e) => {
            tracing::debug!("Register rejected: {}", e);
            error_response(&e)
        }
    }
}

async fn handle_heartbeat(
    State(registry): State<Arc<Registry>>,
    Path(username): Path<String>,
) -> Response {
    match registry.heartbeat(&username) {
        Ok(()) => Json(RegisterResponse::ok(None)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn handle_unregister(
    State(registry): State<Arc<Registry>>,
    Path(username): Path<String>,
) -> StatusCode {
    registry.deregister(&username);
    StatusCode::NO_CONTENT
}

async fn handle_peers(
    State(registry): State<Arc<Registry>>,
    Query(query): Query<PeersQuery>,
) -> Response {
    Json(registry.list(query.exclude.as_deref())).into_response()
}

async fn handle_peerinfo(
    State(registry): State<Arc<Registry>>,
    Path(username): Path<String>,
) -> Response {
    match registry.lookup(&username) {
        Ok(record) => Json(record).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn handle_health(State(registry): State<Arc<Registry>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: unix_millis(),
        peer_count: registry.len(),
    })
}
