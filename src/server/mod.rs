//! HTTP wire server exposing the backend contract.
//!
//! | Method | Path              | Behavior                                   |
//! |--------|-------------------|--------------------------------------------|
//! | GET    | `/`               | identity text                              |
//! | GET    | `/{domain}/{key}` | value bytes, or empty body when absent     |
//! | PUT    | `/{domain}/{key}` | store the request body                     |
//! | DELETE | `/{domain}/{key}` | remove the key (idempotent)                |
//! | GET    | `/{domain}`       | stream every key as NDJSON arrays          |
//! | DELETE | `/{domain}`       | flush the namespace                        |
//!
//! `{domain}` is a symbolic name resolved through the [`Registry`]. Errors
//! become a status code plus the `x-err` header naming the error kind.

mod handlers;

use crate::error::Error;
use crate::registry::Registry;
use crate::wire::ERROR_HEADER;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Shared state of the wire server.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
}

impl AppState {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }
}

/// Builds the wire protocol router.
pub fn router(state: AppState) -> Router {
    router_with(state, Router::new())
}

/// Builds the wire protocol router merged with caller-supplied routes.
///
/// `extra` must not define `/`, `/{domain}` or `/{domain}/{key}`; axum
/// panics on overlapping routes.
pub fn router_with(state: AppState, extra: Router) -> Router {
    let max_body_bytes = state.registry.settings().server.max_body_bytes;

    Router::new()
        .route("/", get(handlers::landing))
        .route(
            "/{domain}",
            get(handlers::list_keys).delete(handlers::flush_domain),
        )
        .route(
            "/{domain}/{key}",
            get(handlers::get_value)
                .put(handlers::put_value)
                .delete(handlers::delete_value),
        )
        .with_state(state)
        .merge(extra)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

/// Serves `app` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns the I/O error that stopped the accept loop.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status =
            StatusCode::from_u16(kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            warn!(kind = kind.header_value(), error = %self, "request failed");
        } else {
            debug!(kind = kind.header_value(), error = %self, "request rejected");
        }

        (status, [(ERROR_HEADER, kind.header_value())], self.message()).into_response()
    }
}
