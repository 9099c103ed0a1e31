//! HTTP + WebSocket gateway.
//!
//! Serves:
//! - `GET /health` returns `{ "ok": true }`
//! - `GET /metrics` renders [`crate::metrics`] as Prometheus text
//! - `GET /ws` opens one chat session per connection

mod handlers;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::{routing::get, Router};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info, warn};

use crate::chat::SessionDeps;

/// Wildcard entry in the allowed-origins list.
pub const ANY_ORIGIN: &str = "*";

/// Handle returned by [`start_gateway`].
pub struct Gateway {
    /// Server task handle.
    pub handle: JoinHandle<()>,
    /// The address the server is actually listening on.
    pub addr: SocketAddr,
}

/// Everything the gateway needs besides its listen address.
#[derive(Clone)]
pub struct GatewaySettings {
    pub deps: SessionDeps,
    pub allowed_origins: Vec<String>,
    /// Cancelling this token stops accepting connections and drains the server.
    pub shutdown: CancellationToken,
}

// ── Shared state injected into axum handlers ───────────────

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) deps: SessionDeps,
    pub(crate) allowed_origins: Arc<Vec<String>>,
}

impl AppState {
    /// `*` admits every connection; otherwise the origin must be listed.
    pub(crate) fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.iter().any(|o| o == ANY_ORIGIN) {
            return true;
        }
        match origin {
            Some(origin) if !origin.is_empty() => {
                self.allowed_origins.iter().any(|o| o == origin)
            }
            _ => false,
        }
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_origin = if allowed_origins.iter().any(|o| o == ANY_ORIGIN) {
        AllowOrigin::mirror_request()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(origin = %o, error = %e, "ignoring unusable CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET])
        .allow_credentials(true)
}

// ── Server startup ──────────────────────────────────────────

/// Start the gateway HTTP + WS server on `addr`.
///
/// Returns a [`Gateway`] holding the bound address and server task.
pub async fn start_gateway(addr: SocketAddr, settings: GatewaySettings) -> std::io::Result<Gateway> {
    let state = AppState {
        deps: settings.deps,
        allowed_origins: Arc::new(settings.allowed_origins),
    };

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/metrics", get(handlers::health::metrics))
        .route("/ws", get(ws::ws_handler))
        .layer(cors_layer(&state.allowed_origins))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let shutdown = settings.shutdown;
    let handle = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            error!("gateway server error: {e}");
        }
    });

    info!(%bound_addr, "gateway started");

    Ok(Gateway {
        handle,
        addr: bound_addr,
    })
}
