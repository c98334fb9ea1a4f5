//! The capability set an expression evaluator runs against.
//!
//! Nine operations: `get`, `set`, `file`, `info`, `input`, `output`, `item`,
//! `session`, `env`. The scheduler supplies a per-request implementation; the
//! evaluator never touches engine internals directly.

use async_trait::async_trait;
use serde_json::Value;

use crate::app_error::AppError;

/// Where `set(key, value, storage)` writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageTarget {
    /// Request-scoped memory; discarded when the request ends.
    #[default]
    Memory,
    /// The caller's TTL-bounded session.
    Session,
}

impl StorageTarget {
    /// Parses the optional third argument of `set`. Unknown names fall back to memory.
    pub fn from_name(name: &str) -> Self {
        match name {
            "session" => StorageTarget::Session,
            _ => StorageTarget::Memory,
        }
    }
}

/// Selector for the `item()` capability within an iteration scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemField {
    /// The item currently being iterated.
    #[default]
    Current,
    /// The previous item, or null at the first.
    Prev,
    /// The next item, or null at the last.
    Next,
    /// Zero-based position.
    Index,
    /// Total number of items.
    Count,
}

impl ItemField {
    /// Parses the optional argument of `item`. Unknown names select the current item.
    pub fn from_name(name: &str) -> Self {
        match name {
            "prev" => ItemField::Prev,
            "next" => ItemField::Next,
            "index" => ItemField::Index,
            "count" => ItemField::Count,
            _ => ItemField::Current,
        }
    }
}

/// The operations available to expressions during a resource run.
///
/// Lookup precedence is part of the contract:
/// `get`: items → memory → session → output → param → header → file → info.
/// `input`: query → header → body.
/// Absent values resolve to `Value::Null`, not an error.
#[async_trait]
pub trait Capabilities: Send + Sync {
    /// First defined value for `name` across the `get` precedence chain.
    async fn get(&self, name: &str, type_hint: Option<&str>) -> Result<Value, AppError>;

    /// Writes to memory (default) or the session.
    async fn set(&self, key: &str, value: Value, storage: StorageTarget) -> Result<(), AppError>;

    /// Pattern-based file access; `selector` picks one entry from a multi-match.
    async fn file(&self, pattern: &str, selector: Option<&str>) -> Result<Value, AppError>;

    /// Workflow/request metadata field (e.g. `name`, `version`, `actionId`).
    async fn info(&self, field: &str) -> Result<Value, AppError>;

    /// Request input by name: query → header → body.
    async fn input(&self, name: &str, type_hint: Option<&str>) -> Result<Value, AppError>;

    /// Captured output of a prior resource.
    async fn output(&self, resource_id: &str) -> Result<Value, AppError>;

    /// Iteration-scope item access.
    async fn item(&self, which: ItemField) -> Result<Value, AppError>;

    /// Whole-session snapshot as a JSON object.
    async fn session(&self) -> Result<Value, AppError>;

    /// Process environment variable, or null when unset.
    async fn env(&self, name: &str) -> Result<Value, AppError>;
}
