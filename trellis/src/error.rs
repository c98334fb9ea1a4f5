//! Workflow-load error family: numeric codes with an optional cause chain.
//!
//! Raised while loading and validating a workflow document, before any request
//! runs. Request-time failures use [`crate::app_error::AppError`] instead.

use std::fmt;

/// Numeric code identifying the load-time failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// The workflow document is structurally invalid (missing target, duplicate ids).
    InvalidWorkflow = 0,
    /// A resource declaration is invalid (no primary action, bad requires).
    InvalidResource = 1,
    /// `requires` edges form a cycle.
    DependencyCycle = 2,
    /// Load-time validation of declared rules failed.
    ValidationFailed = 3,
    /// Execution failed before the request taxonomy applied.
    ExecutionFailed = 4,
    /// The document could not be parsed at all.
    ParseError = 5,
    /// An expression failed to parse or classify.
    ExpressionError = 6,
}

impl ErrorCode {
    /// The numeric wire value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Load-time error: `[<n>] <message>` or `[<n>] <message>: <cause>`.
#[derive(Debug)]
pub struct Error {
    code: ErrorCode,
    message: String,
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates an error with a code and message, no cause.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// Attaches the underlying cause.
    pub fn with_cause(
        mut self,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// The numeric failure class.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The human-readable message (without code prefix or cause).
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "[{}] {}: {}", self.code.as_u8(), self.message, cause),
            None => write!(f, "[{}] {}", self.code.as_u8(), self.message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}
