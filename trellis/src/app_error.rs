//! Request-time error taxonomy: machine code, HTTP status mapping, resource
//! context, structured details, wrapped cause.
//!
//! Backends and the scheduler build these with the `with_*` chain; the
//! dispatcher maps the terminating error's code to an HTTP status.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Machine-readable failure class carried by [`AppError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppCode {
    ValidationError,
    NotFound,
    Unauthorized,
    Forbidden,
    BadRequest,
    Conflict,
    RateLimited,
    RequestTooLarge,
    InternalError,
    ServiceUnavailable,
    Timeout,
    DependencyFailed,
    ResourceFailed,
    PreflightFailed,
    ExpressionError,
}

impl AppCode {
    /// Canonical wire spelling, e.g. `VALIDATION_ERROR`.
    pub fn as_str(self) -> &'static str {
        match self {
            AppCode::ValidationError => "VALIDATION_ERROR",
            AppCode::NotFound => "NOT_FOUND",
            AppCode::Unauthorized => "UNAUTHORIZED",
            AppCode::Forbidden => "FORBIDDEN",
            AppCode::BadRequest => "BAD_REQUEST",
            AppCode::Conflict => "CONFLICT",
            AppCode::RateLimited => "RATE_LIMITED",
            AppCode::RequestTooLarge => "REQUEST_TOO_LARGE",
            AppCode::InternalError => "INTERNAL_ERROR",
            AppCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            AppCode::Timeout => "TIMEOUT",
            AppCode::DependencyFailed => "DEPENDENCY_FAILED",
            AppCode::ResourceFailed => "RESOURCE_FAILED",
            AppCode::PreflightFailed => "PREFLIGHT_FAILED",
            AppCode::ExpressionError => "EXPRESSION_ERROR",
        }
    }

    /// Deterministic HTTP status for this code. Unknown codes map to 500 at
    /// the dispatcher, but every variant here has an explicit row.
    pub fn http_status(self) -> u16 {
        match self {
            AppCode::ValidationError | AppCode::BadRequest => 400,
            AppCode::Unauthorized => 401,
            AppCode::Forbidden => 403,
            AppCode::NotFound => 404,
            AppCode::Conflict => 409,
            AppCode::RequestTooLarge => 413,
            AppCode::RateLimited => 429,
            AppCode::InternalError
            | AppCode::ResourceFailed
            | AppCode::PreflightFailed
            | AppCode::ExpressionError
            | AppCode::DependencyFailed => 500,
            AppCode::ServiceUnavailable => 503,
            AppCode::Timeout => 504,
        }
    }
}

impl fmt::Display for AppCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application error with code, message, and request context.
///
/// String form: `[<CODE>] <message>` or `[<CODE>] <message> (resource: <id>)`.
#[derive(Debug)]
pub struct AppError {
    code: AppCode,
    message: String,
    status_code: u16,
    resource_id: Option<String>,
    details: Option<BTreeMap<String, serde_json::Value>>,
    err: Option<Box<dyn std::error::Error + Send + Sync>>,
    stack: Option<String>,
}

impl AppError {
    /// Creates an error with the code's default HTTP status.
    pub fn new(code: AppCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status_code: code.http_status(),
            resource_id: None,
            details: None,
            err: None,
            stack: None,
        }
    }

    /// Attaches the id of the resource that produced the error.
    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Adds one structured detail entry, lazily creating the detail map.
    pub fn with_details(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Sets the wrapped cause. When the current message is empty, the cause's
    /// message is copied up so callers never see a blank error.
    pub fn with_error(mut self, err: impl std::error::Error + Send + Sync + 'static) -> Self {
        if self.message.is_empty() {
            self.message = err.to_string();
        }
        self.err = Some(Box::new(err));
        self
    }

    /// Records a backtrace-style string, surfaced only in debug mode.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Overrides the HTTP status (e.g. an explicit `preflightCheck.error.code`).
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = status;
        self
    }

    /// The machine code.
    pub fn code(&self) -> AppCode {
        self.code
    }

    /// The message without code prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The HTTP status this error maps to.
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// The resource that raised the error, when known.
    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    /// Structured details, when any were attached.
    pub fn details(&self) -> Option<&BTreeMap<String, serde_json::Value>> {
        self.details.as_ref()
    }

    /// One detail entry by key.
    pub fn detail(&self, key: &str) -> Option<&serde_json::Value> {
        self.details.as_ref().and_then(|d| d.get(key))
    }

    /// Stack string for debug responses.
    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource_id {
            Some(id) => write!(f, "[{}] {} (resource: {})", self.code, self.message, id),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.err
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_and_without_resource() {
        let e = AppError::new(AppCode::NotFound, "route not found");
        assert_eq!(e.to_string(), "[NOT_FOUND] route not found");

        let e = AppError::new(AppCode::ResourceFailed, "query failed").with_resource("db");
        assert_eq!(e.to_string(), "[RESOURCE_FAILED] query failed (resource: db)");
    }

    /// **Scenario**: every code maps deterministically to its HTTP status.
    #[test]
    fn http_status_table() {
        assert_eq!(AppCode::ValidationError.http_status(), 400);
        assert_eq!(AppCode::BadRequest.http_status(), 400);
        assert_eq!(AppCode::Unauthorized.http_status(), 401);
        assert_eq!(AppCode::Forbidden.http_status(), 403);
        assert_eq!(AppCode::NotFound.http_status(), 404);
        assert_eq!(AppCode::Conflict.http_status(), 409);
        assert_eq!(AppCode::RequestTooLarge.http_status(), 413);
        assert_eq!(AppCode::RateLimited.http_status(), 429);
        assert_eq!(AppCode::InternalError.http_status(), 500);
        assert_eq!(AppCode::ResourceFailed.http_status(), 500);
        assert_eq!(AppCode::PreflightFailed.http_status(), 500);
        assert_eq!(AppCode::ExpressionError.http_status(), 500);
        assert_eq!(AppCode::DependencyFailed.http_status(), 500);
        assert_eq!(AppCode::ServiceUnavailable.http_status(), 503);
        assert_eq!(AppCode::Timeout.http_status(), 504);
    }

    /// **Scenario**: `with_error` on an empty message copies the cause's message up.
    #[test]
    fn with_error_fills_empty_message() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket reset");
        let e = AppError::new(AppCode::ServiceUnavailable, "").with_error(io);
        assert_eq!(e.message(), "socket reset");
        assert!(std::error::Error::source(&e).is_some());
    }

    #[test]
    fn with_details_lazily_initializes() {
        let e = AppError::new(AppCode::ResourceFailed, "tx failed")
            .with_details("failedQuery", "bad")
            .with_details("attempt", 2);
        assert_eq!(e.detail("failedQuery"), Some(&serde_json::json!("bad")));
        assert_eq!(e.detail("attempt"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn unwrap_chain_recovers_original() {
        let inner = std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline");
        let e = AppError::new(AppCode::Timeout, "upstream timed out").with_error(inner);
        let src = std::error::Error::source(&e).unwrap();
        let io = src.downcast_ref::<std::io::Error>().unwrap();
        assert_eq!(io.kind(), std::io::ErrorKind::TimedOut);
    }

    #[test]
    fn code_serde_spelling() {
        let s = serde_json::to_string(&AppCode::RequestTooLarge).unwrap();
        assert_eq!(s, "\"REQUEST_TOO_LARGE\"");
        let c: AppCode = serde_json::from_str("\"RATE_LIMITED\"").unwrap();
        assert_eq!(c, AppCode::RateLimited);
    }
}
