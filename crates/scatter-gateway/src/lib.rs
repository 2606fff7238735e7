//! Local HTTP gateway for Scatter.
//!
//! Provides a [`GatewayServer`] exposing the transfer engine to browsers,
//! media players and scripts:
//!
//! - `PUT /api/upload?name=<file>&add=<bool>`: upload the body, answer the share code
//! - `GET /api/download?s=<code>`: stream a file, honouring `Range`
//! - `GET /api/download/{name}?s=<code>`: same, with a file name in the URL for players
//! - `GET /api/file_info?s=<code>`: `{"name","size"}` of a share code
//! - `GET /api/upload_history`: recorded uploads, newest first
//! - `GET /api/tasks`, `DELETE /api/tasks/{id}`: list, cancel or forget transfers
//! - `GET /api/settings`, `PUT /api/settings`: live transfer settings
//!
//! ## Access key
//!
//! When an access key is configured every `/api` request must carry
//! `?accessKey=<key>`, otherwise it is answered with 403. The comparison is
//! constant-time.

mod error;
mod handlers;
pub mod history;
pub mod range;


use std::sync::Arc;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, put};
use scatter_engine::TransferEngine;
use subtle::ConstantTimeEq;
use tower_http::cors::CorsLayer;
use tracing::warn;

pub use error::GatewayError;
pub use history::{HISTORY_LIMIT, History, HistoryEntry};

/// Shared application state for all handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub engine: Arc<TransferEngine>,
    pub history: Arc<History>,
    pub access_key: Option<Arc<str>>,
    /// Render share codes in the compact form.
    pub compact_codes: bool,
}

/// Reject requests that do not carry the configured access key.
async fn access_key_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    if let Some(expected) = &state.access_key {
        let supplied = request
            .uri()
            .query()
            .and_then(|q| {
                form_urlencoded::parse(q.as_bytes())
                    .find(|(k, _)| k == "accessKey")
                    .map(|(_, v)| v.into_owned())
            })
            .unwrap_or_default();

        let authenticated: bool = supplied.as_bytes().ct_eq(expected.as_bytes()).into();
        if !authenticated {
            warn!(path = request.uri().path(), "request without valid access key");
            return Err(GatewayError::AccessDenied);
        }
    }
    Ok(next.run(request).await)
}

/// Configuration for creating a [`GatewayServer`].
pub struct GatewayConfig {
    /// The transfer engine to serve.
    pub engine: Arc<TransferEngine>,
    /// Where successful uploads are recorded.
    pub history: Arc<History>,
    /// Required `accessKey` query value. `None` or empty disables the check.
    pub access_key: Option<String>,
    /// Render share codes in the compact form.
    pub compact_codes: bool,
}

/// HTTP gateway backed by a [`TransferEngine`].
pub struct GatewayServer {
    router: Router,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> Self {
        let state = AppState {
            engine: config.engine,
            history: config.history,
            access_key: config
                .access_key
                .filter(|k| !k.is_empty())
                .map(Arc::from),
            compact_codes: config.compact_codes,
        };
        Self {
            router: Self::build_router(state),
        }
    }

    fn build_router(state: AppState) -> Router {
        let api = Router::new()
            .route("/api/upload", put(handlers::upload))
            .route("/api/download", get(handlers::download))
            .route("/api/download/{name}", get(handlers::download_named))
            .route("/api/file_info", get(handlers::file_info))
            .route("/api/upload_history", get(handlers::upload_history))
            .route("/api/tasks", get(handlers::list_tasks))
            .route("/api/tasks/{id}", delete(handlers::remove_task))
            .route(
                "/api/settings",
                get(handlers::get_settings).put(handlers::update_settings),
            )
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                access_key_middleware,
            ));

        Router::new()
            .merge(api)
            // Uploads stream straight into the engine; no size cap here.
            .layer(DefaultBodyLimit::disable())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Return the inner [`Router`] (useful for testing with `tower::ServiceExt`).
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve on the given TCP address.
    pub async fn serve(self, addr: &str) -> Result<(), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr, "gateway listening");
        axum::serve(listener, self.router).await
    }

    /// Serve with graceful shutdown triggered by the given future.
    ///
    /// When `shutdown` completes, the server stops accepting new connections
    /// and waits for in-flight requests to finish.
    pub async fn serve_with_shutdown(
        self,
        addr: &str,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        self.serve_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener, e.g. one bound to port 0.
    pub async fn serve_listener(
        self,
        listener: tokio::net::TcpListener,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), std::io::Error> {
        tracing::info!(addr = %listener.local_addr()?, "gateway listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
