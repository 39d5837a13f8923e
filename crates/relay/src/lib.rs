// docsync-relay: WebSocket relay fanning document snapshots, changes and
// undo/redo between the clients of each channel, with file-backed documents.

pub mod config;
pub mod docs;
pub mod hub;
pub mod storage;
pub mod ws;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    http::{header::HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

pub use config::RelayConfig;
pub use hub::Hub;
pub use storage::DocumentFiles;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Hub backed by the configured data directory.
pub fn hub_from_config(config: &RelayConfig) -> Arc<Hub> {
    Arc::new(Hub::new(DocumentFiles::new(config.data_dir.clone()), config.history_limit))
}

/// WebSocket upgrades are accepted on `/` and `/ws`.
pub fn build_router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/", get(ws::ws_handler))
        .route("/ws", get(ws::ws_handler))
        .route("/healthz", get(healthz))
        .with_state(hub)
        .layer(middleware::from_fn(request_context_middleware))
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, hub: Arc<Hub>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, build_router(hub)).with_graceful_shutdown(shutdown).await
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = next.run(request).await;

    if let Ok(request_id_header) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, request_id_header);
    }

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
