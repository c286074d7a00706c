//! Wire protocol handlers.

use super::AppState;
use crate::error::{Error, Result};
use crate::wire::{CHUNK_SIZE, OCTET_STREAM, encode_frame};
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, StreamExt};
use tracing::warn;

const NDJSON: &str = "application/x-ndjson";

/// GET / - Identity text.
pub(crate) async fn landing() -> String {
    format!("coldstore {}\n", env!("CARGO_PKG_VERSION"))
}

/// GET /{domain}/{key} - Value bytes, empty body when absent.
pub(crate) async fn get_value(
    State(state): State<AppState>,
    Path((domain, key)): Path<(String, String)>,
) -> Result<Response> {
    let store = state.registry.resolve(&domain).await?;
    Ok(match store.get(&key).await? {
        Some(value) => ([(header::CONTENT_TYPE, OCTET_STREAM)], value).into_response(),
        None => StatusCode::OK.into_response(),
    })
}

/// PUT /{domain}/{key} - Store the raw body.
pub(crate) async fn put_value(
    State(state): State<AppState>,
    Path((domain, key)): Path<(String, String)>,
    body: Bytes,
) -> Result<StatusCode> {
    let store = state.registry.resolve(&domain).await?;
    store.set(&key, body.to_vec()).await?;
    Ok(StatusCode::OK)
}

/// DELETE /{domain}/{key} - Remove a key.
pub(crate) async fn delete_value(
    State(state): State<AppState>,
    Path((domain, key)): Path<(String, String)>,
) -> Result<StatusCode> {
    let store = state.registry.resolve(&domain).await?;
    store.delete(&key).await?;
    Ok(StatusCode::OK)
}

/// GET /{domain} - Stream every key, [`CHUNK_SIZE`] per line.
///
/// The first frame is produced before the response starts so an immediate
/// enumeration failure still gets a proper error response. Later failures
/// abort the body.
pub(crate) async fn list_keys(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<Response> {
    let store = state.registry.resolve(&domain).await?;
    let mut frames = store
        .ids()
        .chunks(CHUNK_SIZE)
        .map(|chunk| chunk.into_iter().collect::<Result<Vec<String>>>());

    let first = match frames.next().await {
        Some(frame) => encode_frame(&frame?)?,
        None => return Ok(([(header::CONTENT_TYPE, NDJSON)], Body::empty()).into_response()),
    };

    let rest = frames.map(move |frame| {
        frame.and_then(|keys| encode_frame(&keys)).inspect_err(|e| {
            warn!(domain = %domain, error = %e, "key enumeration aborted");
        })
    });
    let body = Body::from_stream(stream::once(async move { Ok::<_, Error>(first) }).chain(rest));

    Ok(([(header::CONTENT_TYPE, NDJSON)], body).into_response())
}

/// DELETE /{domain} - Flush the namespace.
pub(crate) async fn flush_domain(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<StatusCode> {
    let store = state.registry.resolve(&domain).await?;
    store.flush().await?;
    Ok(StatusCode::OK)
}
