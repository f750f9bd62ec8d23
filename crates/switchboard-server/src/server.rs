//! `RelayServer`: axum router for the relay endpoint, health and metrics.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::connection::BrowserConnection;
use crate::context::RelayContext;
use crate::errors::SessionError;
use crate::health::{self, HealthResponse};
use crate::metrics::BROWSER_REJECTIONS_TOTAL;
use crate::transport::axum_ws;
use crate::websocket::{SessionInfo, run_browser_session};

/// Subprotocols offered to browsers, preferred first.
pub const SUBPROTOCOLS: [&str; 2] = ["graphql-transport-ws", "graphql-ws"];

/// The relay's HTTP face.
#[derive(Debug, Clone)]
pub struct RelayServer {
    ctx: Arc<RelayContext>,
}

impl RelayServer {
    /// Create a server over `ctx`.
    pub fn new(ctx: RelayContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    /// Shared context.
    pub fn context(&self) -> &Arc<RelayContext> {
        &self.ctx
    }

    /// Build the router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route(&self.ctx.config.path, get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.ctx.clone())
    }

    /// Bind and serve until the shutdown token fires.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener =
            TcpListener::bind((self.ctx.config.host.as_str(), self.ctx.config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.ctx.shutdown.token();

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "relay server failed");
            }
        });
        info!(%addr, path = %self.ctx.config.path, "relay listening");
        Ok((addr, handle))
    }
}

/// GET /health
async fn health_handler(State(ctx): State<Arc<RelayContext>>) -> Json<HealthResponse> {
    Json(health::health_check(
        ctx.start_time,
        ctx.connections.connection_count(),
        ctx.presence.meeting_count(),
        ctx.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(ctx): State<Arc<RelayContext>>) -> Response {
    match &ctx.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET <relay path>: admit, resolve the session, upgrade.
async fn ws_handler(
    State(ctx): State<Arc<RelayContext>>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let session = match admit(&ctx, &headers) {
        Ok(session) => session,
        Err(e) => {
            let reason = match e {
                SessionError::MissingClaim(_) => "unauthorized",
                SessionError::TooManyConnections(_) => "capacity",
                SessionError::ShuttingDown => "shutdown",
            };
            counter!(BROWSER_REJECTIONS_TOTAL, "reason" => reason).increment(1);
            warn!(error = %e, "browser upgrade refused");
            return e.into_response();
        }
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let browser = Arc::new(BrowserConnection::new(session, &ctx.config));
    ws.protocols(SUBPROTOCOLS)
        .max_message_size(ctx.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let (reader, writer) = axum_ws::split(socket);
            run_browser_session(ctx, browser, reader, writer).await;
        })
}

fn admit(ctx: &RelayContext, headers: &HeaderMap) -> Result<SessionInfo, SessionError> {
    if ctx.shutdown.is_shutting_down() {
        return Err(SessionError::ShuttingDown);
    }
    let limit = ctx.config.max_connections;
    if ctx.connections.connection_count() >= limit {
        return Err(SessionError::TooManyConnections(limit));
    }
    ctx.resolver.resolve(headers)
}
