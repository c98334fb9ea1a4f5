//! TTL-bounded session key/value store.
//!
//! Values are scoped to a caller's session (identified by `X-Session-Id`) and
//! expire after their TTL. A background sweeper removes expired entries at the
//! configured interval; see [`Sweeper`].

mod memory;
mod sqlite;
mod sweeper;

pub use memory::MemorySessionStore;
pub use sqlite::SqliteSessionStore;
pub use sweeper::Sweeper;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::config::{SessionConfig, SessionType};

/// Session storage failure.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session storage: {0}")]
    Storage(String),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// The store contract: read, write, delete, whole-session snapshot, sweep.
///
/// Concurrent access is safe; per-key writes are atomic (last writer wins) and
/// snapshots see a consistent point-in-time view.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Reads one value, or `None` when absent or expired.
    async fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>, SessionError>;

    /// Writes one value with the given lifetime.
    async fn set(
        &self,
        session_id: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), SessionError>;

    /// Removes one key; removing an absent key is not an error.
    async fn delete(&self, session_id: &str, key: &str) -> Result<(), SessionError>;

    /// All live keys of one session as a JSON object.
    async fn snapshot(&self, session_id: &str)
        -> Result<serde_json::Map<String, Value>, SessionError>;

    /// Removes expired entries, returning how many were dropped.
    async fn sweep(&self) -> Result<usize, SessionError>;
}

/// Opens the store a [`SessionConfig`] describes: in-process memory or a
/// SQLite file at `path`.
pub fn open_store(cfg: &SessionConfig) -> Result<Arc<dyn SessionStore>, SessionError> {
    match cfg.get_type() {
        SessionType::Memory => Ok(Arc::new(MemorySessionStore::new())),
        SessionType::Sqlite => {
            let path = cfg.get_path();
            if path.is_empty() {
                return Err(SessionError::Storage(
                    "sqlite session store requires a path".to_string(),
                ));
            }
            Ok(Arc::new(SqliteSessionStore::new(path)?))
        }
    }
}
