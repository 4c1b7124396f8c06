//! Inbound request handling.
//!
//! [`forward_handler`] is the Axum fallback that receives every
//! non-`/health` request, assigns a correlation id, snapshots the current
//! config, and hands the request to the [`engine`]. Submodules handle
//! candidate planning ([`upstream`]), header construction ([`headers`]),
//! and the network seam ([`dispatch`]).

pub mod dispatch;
pub mod engine;
pub mod headers;
pub mod upstream;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;

use crate::server::AppState;
use engine::InboundRequest;

pub async fn forward_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = headers
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from);

    // Clone the Arc<Config> (cheap refcount bump) to release the RwLock before .await
    let config = Arc::clone(&state.config.read().await.config);

    tracing::info!(
        correlation_id = %correlation_id,
        method = %method,
        path = %uri.path(),
        "request received"
    );

    state
        .engine
        .handle(
            &config,
            InboundRequest {
                method,
                uri,
                headers,
                body,
                correlation_id,
            },
        )
        .await
}
