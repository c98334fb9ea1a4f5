//! Engine results and errors as HTTP responses.

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use trellis::{AppError, ResponseData};

use crate::dispatch::SESSION_HEADER;

/// A successful engine response: status, `apiResponse.meta.headers`, the
/// shaped body, and the session id echoed back.
pub(crate) fn ok_response(data: ResponseData) -> Response {
    let status = StatusCode::from_u16(data.status).unwrap_or(StatusCode::OK);
    let mut response = (status, Json(data.body)).into_response();
    let headers = response.headers_mut();
    for (name, value) in &data.headers {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    if let Ok(sid) = HeaderValue::from_str(&data.session_id) {
        headers.insert(HeaderName::from_static(SESSION_HEADER), sid);
    }
    response
}

/// An error response: `{code, message, details?, resourceId?}`, with `stack`
/// only in debug mode. The status comes from the error's mapping (or its
/// explicit override).
pub(crate) fn error_response(err: &AppError, debug: bool) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut body = serde_json::json!({
        "code": err.code().as_str(),
        "message": err.message(),
    });
    if let Some(details) = err.details() {
        body["details"] = serde_json::to_value(details).unwrap_or_default();
    }
    if let Some(resource_id) = err.resource_id() {
        body["resourceId"] = serde_json::json!(resource_id);
    }
    if debug {
        if let Some(stack) = err.stack() {
            body["stack"] = serde_json::json!(stack);
        }
        // The wrapped cause chain, outermost first.
        let mut causes = Vec::new();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        if !causes.is_empty() {
            body["causes"] = serde_json::json!(causes);
        }
    }
    (status, Json(serde_json::json!({ "success": false, "error": body }))).into_response()
}
