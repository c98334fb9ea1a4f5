//! The dispatch handler: one request through the engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;

use trellis::{AppCode, AppError, RequestInput};

use crate::app::AppState;
use crate::response::{error_response, ok_response};

/// Header carrying the caller's session identity.
pub(crate) const SESSION_HEADER: &str = "x-session-id";

pub(crate) async fn dispatch(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let debug = state.debug;
    match handle(state, method, uri, query, headers, body).await {
        Ok(resp) => resp,
        Err(e) => error_response(&e, debug),
    }
}

async fn handle(
    state: Arc<AppState>,
    method: Method,
    uri: Uri,
    query: BTreeMap<String, String>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, AppError> {
    let path = uri.path().to_string();

    // Per-route method lists from the apiServer config.
    if let Some(route) = state.route_for(&path) {
        if !route.methods.is_empty()
            && !route
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method.as_str()))
        {
            return Err(AppError::new(
                AppCode::BadRequest,
                format!("method {} not allowed on {}", method, path),
            ));
        }
    }

    let body = body.map_err(|e| {
        // The body-limit layer rejects oversized payloads before the engine runs.
        AppError::new(AppCode::RequestTooLarge, "request body too large").with_error(e)
    })?;

    let header_map: BTreeMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();
    let session_id = header_map.get(SESSION_HEADER).cloned();

    let parsed_body = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&body).into_owned())
        })
    };

    let input = RequestInput {
        method: method.as_str().to_string(),
        route: path,
        query: query
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect(),
        headers: header_map,
        body: parsed_body,
        session_id,
    };

    let data = state.engine.execute(input).await?;
    Ok(ok_response(data))
}
