//! Axum app: state, router, body cap, health route.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{any, get};
use axum::{Json, Router};

use trellis::config::RouteConfig;
use trellis::Engine;

use crate::cors::cors_layer;
use crate::dispatch::dispatch;

/// Route mounted when the workflow declares none.
pub const DEFAULT_ROUTE: &str = "/api/v1/run";

/// Request body cap; oversized bodies fail fast as `REQUEST_TOO_LARGE`.
pub const DEFAULT_BODY_LIMIT: usize = 8 * 1024 * 1024;

/// Shared server state: the engine plus dispatcher knobs.
pub struct AppState {
    pub(crate) engine: Engine,
    pub(crate) debug: bool,
    pub(crate) routes: Vec<RouteConfig>,
}

impl AppState {
    /// Captures the declared routes (or the default) alongside the engine.
    pub fn new(engine: Engine, debug: bool) -> Self {
        let mut routes = engine
            .workflow()
            .settings
            .api_server
            .as_ref()
            .map(|a| a.routes.clone())
            .unwrap_or_default();
        if routes.is_empty() {
            routes.push(RouteConfig {
                path: DEFAULT_ROUTE.to_string(),
                methods: Vec::new(),
            });
        }
        Self {
            engine,
            debug,
            routes,
        }
    }

    /// The declared route entry for a request path, if any.
    pub(crate) fn route_for(&self, path: &str) -> Option<&RouteConfig> {
        self.routes.iter().find(|r| r.path == path)
    }
}

/// Builds the router: one dispatch handler per declared route, a health
/// route outside the workflow, CORS per settings, and the body cap.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.engine.workflow().settings.effective_cors());
    let mut router = Router::new().route("/healthz", get(healthz));
    for route in &state.routes {
        router = router.route(&route.path, any(dispatch));
    }
    let mut router = router
        .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT))
        .with_state(state);
    if let Some(cors) = cors {
        router = router.layer(cors);
    }
    router
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
