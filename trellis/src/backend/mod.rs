//! Action backends: the uniform execution contract behind every resource.
//!
//! Each backend takes a *resolved* config (expressions already expanded by the
//! scheduler), honors its timeout through context cancellation, and classifies
//! failures into the request-time error taxonomy.

mod chat;
mod http;
mod http_cache;
mod process;
mod providers;
mod sql;

pub use chat::ChatBackend;
pub use http::HttpBackend;
pub use http_cache::HttpCache;
pub use process::ProcessBackend;
pub use providers::provider;
pub use sql::SqlBackend;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::app_error::{AppCode, AppError};
use crate::config::{format_duration, PrimaryAction, WorkflowSettings};

/// Shared backend set for one engine instance. HTTP cache and SQL pools are
/// process-wide and shared across requests.
pub struct Backends {
    chat: ChatBackend,
    http: HttpBackend,
    sql: SqlBackend,
    process: ProcessBackend,
}

impl Backends {
    /// Builds the backend set for a workflow's settings (named SQL
    /// connections, agent env for child processes).
    pub fn new(settings: &WorkflowSettings) -> Self {
        let cache = Arc::new(HttpCache::new());
        Self {
            chat: ChatBackend::new(),
            http: HttpBackend::new(cache),
            sql: SqlBackend::new(settings.sql_connections.clone()),
            process: ProcessBackend::new(settings.agent_settings.env.clone()),
        }
    }

    /// Dispatches one resolved primary (or inline) action and returns its
    /// captured output.
    pub async fn run(&self, action: PrimaryAction<'_>) -> Result<Value, AppError> {
        match action {
            PrimaryAction::Chat(cfg) => self.chat.run(cfg).await,
            PrimaryAction::HttpClient(cfg) => self.http.run(cfg).await,
            PrimaryAction::Sql(cfg) => self.sql.run(cfg).await,
            PrimaryAction::Python(cfg) => self.process.run_python(cfg).await,
            PrimaryAction::Exec(cfg) => self.process.run_exec(cfg).await,
        }
    }
}

/// Runs `fut` under the action's timeout. Elapsing yields `TIMEOUT`; with no
/// timeout the future runs to completion (the request deadline still applies
/// upstream).
pub(crate) async fn with_timeout<T, F>(
    timeout: Option<Duration>,
    fut: F,
) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match timeout {
        Some(d) => match tokio::time::timeout(d, fut).await {
            Ok(r) => r,
            Err(_) => Err(AppError::new(
                AppCode::Timeout,
                format!("timed out after {}", format_duration(d)),
            )),
        },
        None => fut.await,
    }
}

/// Maps a transport-level reqwest failure: timeouts to `TIMEOUT`, everything
/// else to `SERVICE_UNAVAILABLE`, preserving the cause.
pub(crate) fn classify_reqwest(e: reqwest::Error) -> AppError {
    let code = if e.is_timeout() {
        AppCode::Timeout
    } else {
        AppCode::ServiceUnavailable
    };
    AppError::new(code, "").with_error(e)
}
