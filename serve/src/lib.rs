//! HTTP dispatcher for Trellis workflows.
//!
//! Maps each incoming request to the workflow's target action: applies CORS,
//! locates the declared route, enforces per-route method lists, resolves the
//! caller's session, runs the scheduler, and translates engine errors into
//! HTTP responses.

mod app;
mod cors;
mod dispatch;
mod response;

pub use app::{router, AppState, DEFAULT_BODY_LIMIT, DEFAULT_ROUTE};

use std::sync::Arc;

use trellis::{Engine, Workflow};

/// Builds the engine and serves it on the workflow's configured host/port
/// until the process ends.
pub async fn run_serve(workflow: Workflow) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!(
        "{}:{}",
        workflow.settings.get_host_ip(),
        workflow.settings.get_port_num()
    );
    let engine = Engine::new(workflow)?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", addr);
    run_serve_on_listener(listener, engine).await
}

/// Serves an already-built engine on an existing listener. Tests bind port 0
/// and pass the listener in.
pub async fn run_serve_on_listener(
    listener: tokio::net::TcpListener,
    engine: Engine,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = Arc::new(AppState::new(engine, config::debug_enabled()));
    let app = router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
