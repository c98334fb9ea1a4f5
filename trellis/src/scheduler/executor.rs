//! Request execution engine: walks the dependency closure of the target
//! resource in topological order and runs each resource's expression/action
//! pipeline against the request scope.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{json, Value};

use crate::app_error::{AppCode, AppError};
use crate::backend::Backends;
use crate::config::{
    BoolOrExpr, InlineResource, OnErrorAction, PrimaryAction, Resource, Workflow,
};
use crate::error::Error;
use crate::expr::{Capabilities, Evaluator, Expression};
use crate::scheduler::graph::DependencyGraph;
use crate::scheduler::scope::RequestScope;
use crate::scheduler::state::{ResourceState, RunState};
use crate::session::{open_store, MemorySessionStore, SessionStore, Sweeper};

/// One incoming request, as the dispatcher hands it to the engine.
#[derive(Debug, Default)]
pub struct RequestInput {
    pub method: String,
    pub route: String,
    pub query: BTreeMap<String, Value>,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    /// `X-Session-Id`, when the caller sent one.
    pub session_id: Option<String>,
}

/// The shaped response handed back to the dispatcher.
#[derive(Debug)]
pub struct ResponseData {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub session_id: String,
}

/// Engine for one loaded workflow. Holds the shared backends, the resolved
/// dependency graph, and the session store (with its sweeper when enabled).
pub struct Engine {
    workflow: Workflow,
    graph: DependencyGraph,
    backends: Backends,
    session_store: Arc<dyn SessionStore>,
    _sweeper: Option<Sweeper>,
}

impl Engine {
    /// Validates the workflow and assembles the engine. Must run inside a
    /// tokio runtime (the session sweeper is spawned here).
    pub fn new(workflow: Workflow) -> Result<Self, Error> {
        workflow.validate()?;
        let graph = DependencyGraph::build(&workflow.resources)?;
        let backends = Backends::new(&workflow.settings);

        let (session_store, sweeper): (Arc<dyn SessionStore>, Option<Sweeper>) =
            match &workflow.settings.session {
                Some(cfg) if cfg.enabled => {
                    let store = open_store(cfg).map_err(|e| {
                        Error::new(
                            crate::error::ErrorCode::InvalidWorkflow,
                            "open session store",
                        )
                        .with_cause(e)
                    })?;
                    let sweeper = Sweeper::spawn(store.clone(), cfg.get_cleanup_interval());
                    (store, Some(sweeper))
                }
                _ => (Arc::new(MemorySessionStore::new()), None),
            };

        Ok(Self {
            workflow,
            graph,
            backends,
            session_store,
            _sweeper: sweeper,
        })
    }

    /// The loaded workflow.
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Runs one request through the workflow and shapes the response.
    pub async fn execute(&self, req: RequestInput) -> Result<ResponseData, AppError> {
        let target_id = self.workflow.metadata.target_action_id.clone();
        let target = self.workflow.target_resource().ok_or_else(|| {
            AppError::new(
                AppCode::NotFound,
                format!("target action '{}' not found", target_id),
            )
        })?;

        check_restrictions(target, &req)?;

        let session_id = req
            .session_id
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let session_ttl = self
            .workflow
            .settings
            .session
            .as_ref()
            .map(|c| c.get_ttl())
            .unwrap_or(crate::config::SessionConfig::default().get_ttl());

        let scope = RequestScope::new(
            filter_params(&req.query, &target.run.allowed_params),
            filter_headers(&req.headers, &target.run.allowed_headers),
            req.body.clone(),
            self.info_map(&req, &session_id),
            self.session_store.clone(),
            session_id.clone(),
            session_ttl,
        );

        let target_idx = self
            .graph
            .index_of(&target_id)
            .expect("validated target resolves");
        let mut states: HashMap<usize, RunState> = HashMap::new();

        for idx in self.graph.closure_of(target_idx) {
            let resource = &self.workflow.resources[idx];
            self.run_resource(idx, resource, &scope, &mut states)
                .await
                .map_err(|e| {
                    if e.resource_id().is_some() {
                        e
                    } else {
                        e.with_resource(resource.action_id())
                    }
                })?;
        }

        self.shape_response(target, &scope, session_id).await
    }

    fn info_map(&self, req: &RequestInput, session_id: &str) -> BTreeMap<String, Value> {
        let meta = &self.workflow.metadata;
        let mut info = BTreeMap::new();
        info.insert("name".to_string(), json!(meta.name));
        info.insert("description".to_string(), json!(meta.description));
        info.insert("version".to_string(), json!(meta.version));
        info.insert("targetActionId".to_string(), json!(meta.target_action_id));
        info.insert("method".to_string(), json!(req.method));
        info.insert("route".to_string(), json!(req.route));
        info.insert("sessionId".to_string(), json!(session_id));
        info
    }

    /// Runs one resource through the full pipeline, applying `onError`.
    async fn run_resource(
        &self,
        idx: usize,
        resource: &Resource,
        scope: &RequestScope,
        states: &mut HashMap<usize, RunState>,
    ) -> Result<(), AppError> {
        let id = resource.action_id();
        let mut run_state = RunState::default();

        // A resource whose requires include a skipped resource is skipped.
        let dep_skipped = self
            .graph
            .requires_of(idx)
            .iter()
            .any(|d| matches!(states.get(d).map(|s| s.state), Some(ResourceState::Skipped)));
        let mut skipped = dep_skipped;
        if !skipped {
            for cond in &resource.run.skip_condition {
                if Evaluator.eval_truthy(cond, scope).await? {
                    skipped = true;
                    break;
                }
            }
        }
        if skipped {
            tracing::debug!(resource = id, "skipped");
            run_state.skip();
            scope.record_output(id, Value::Null);
            states.insert(idx, run_state);
            return Ok(());
        }

        // Preflight gates the run and is not subject to onError.
        if let Some(preflight) = &resource.run.preflight_check {
            for check in &preflight.validations {
                if !Evaluator.eval_truthy(check, scope).await? {
                    let (status, message) = match &preflight.error {
                        Some(e) => (
                            if e.code != 0 { e.code } else { 500 },
                            if e.message.is_empty() {
                                "preflight check failed".to_string()
                            } else {
                                e.message.clone()
                            },
                        ),
                        None => (500, "preflight check failed".to_string()),
                    };
                    run_state.begin_attempt();
                    let err = AppError::new(AppCode::PreflightFailed, message)
                        .with_status(status)
                        .with_details("check", check.as_str().to_string())
                        .with_resource(id);
                    run_state.fail(&err);
                    states.insert(idx, run_state);
                    return Err(err);
                }
            }
        }

        let on_error = resource.run.on_error.as_ref();
        let mut retries = 0u32;
        loop {
            run_state.begin_attempt();
            match self.attempt(resource, scope).await {
                Ok(output) => {
                    run_state.complete(output.clone());
                    scope.record_output(id, output);
                    states.insert(idx, run_state);
                    return Ok(());
                }
                Err(err) => {
                    let handled = match on_error {
                        Some(h) => self.handler_matches(h, &err, scope).await?,
                        None => false,
                    };
                    if !handled {
                        run_state.fail(&err);
                        states.insert(idx, run_state);
                        return Err(err);
                    }
                    let handler = on_error.expect("matched handler");
                    self.run_handler_exprs(handler, &err, scope).await;
                    match handler.action {
                        OnErrorAction::Fail => {
                            run_state.fail(&err);
                            states.insert(idx, run_state);
                            return Err(err);
                        }
                        OnErrorAction::Continue => {
                            // Completed with the fallback; not a failure for
                            // downstream scheduling.
                            let fallback = handler.fallback.clone().unwrap_or(Value::Null);
                            tracing::debug!(resource = id, "continuing with fallback output");
                            run_state.complete(fallback.clone());
                            scope.record_output(id, fallback);
                            states.insert(idx, run_state);
                            return Ok(());
                        }
                        OnErrorAction::Retry => {
                            if retries < handler.get_max_retries() {
                                retries += 1;
                                tracing::debug!(
                                    resource = id,
                                    attempt = retries,
                                    "retrying after failure"
                                );
                                if let Some(delay) = handler.retry_delay {
                                    tokio::time::sleep(delay).await;
                                }
                                continue;
                            }
                            run_state.fail(&err);
                            states.insert(idx, run_state);
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    /// One attempt: validation, exprBefore, before[], primary, after[],
    /// expr[], exprAfter[]. With `items[]`, the whole pipeline runs once per
    /// item and the outputs collect into an array.
    async fn attempt(
        &self,
        resource: &Resource,
        scope: &RequestScope,
    ) -> Result<Value, AppError> {
        if let Some(rules) = &resource.run.validation {
            let input = validation_input(scope).await;
            if let Err(failures) = crate::validate::check(rules, &input, scope).await {
                return Err(AppError::new(AppCode::ValidationError, failures.to_string())
                    .with_details("errors", failures.to_details()));
            }
        }

        if resource.items.is_empty() {
            return self.attempt_once(resource, scope).await;
        }

        scope.enter_items(resource.items.clone());
        let mut outputs = Vec::with_capacity(resource.items.len());
        for index in 0..resource.items.len() {
            scope.advance_item(index);
            match self.attempt_once(resource, scope).await {
                Ok(v) => outputs.push(v),
                Err(e) => {
                    scope.exit_items();
                    return Err(e);
                }
            }
        }
        scope.exit_items();
        Ok(Value::Array(outputs))
    }

    async fn attempt_once(
        &self,
        resource: &Resource,
        scope: &RequestScope,
    ) -> Result<Value, AppError> {
        let run = &resource.run;

        for expr in &run.expr_before {
            Evaluator.eval(expr, scope).await?;
        }
        for inline in &run.before {
            self.run_inline(inline, scope).await?;
        }

        let output = match run.primary() {
            Some(action) => self.run_action(action, scope).await?,
            None => Value::Null,
        };

        for inline in &run.after {
            self.run_inline(inline, scope).await?;
        }
        // `expr` runs before `exprAfter`; both follow the primary action.
        for expr in run.expr.iter().chain(run.expr_after.iter()) {
            Evaluator.eval(expr, scope).await?;
        }

        Ok(output)
    }

    async fn run_inline(
        &self,
        inline: &InlineResource,
        scope: &RequestScope,
    ) -> Result<Value, AppError> {
        if let Some(cfg) = &inline.chat {
            let cfg = resolve_config(cfg, scope).await?;
            return self.backends.run(PrimaryAction::Chat(&cfg)).await;
        }
        if let Some(cfg) = &inline.http_client {
            let cfg = resolve_config(cfg, scope).await?;
            return self.backends.run(PrimaryAction::HttpClient(&cfg)).await;
        }
        if let Some(cfg) = &inline.sql {
            let cfg = resolve_config(cfg, scope).await?;
            return self.backends.run(PrimaryAction::Sql(&cfg)).await;
        }
        if let Some(cfg) = &inline.python {
            let cfg = resolve_config(cfg, scope).await?;
            return self.backends.run(PrimaryAction::Python(&cfg)).await;
        }
        if let Some(cfg) = &inline.exec {
            let cfg = resolve_config(cfg, scope).await?;
            return self.backends.run(PrimaryAction::Exec(&cfg)).await;
        }
        Ok(Value::Null)
    }

    async fn run_action(
        &self,
        action: PrimaryAction<'_>,
        scope: &RequestScope,
    ) -> Result<Value, AppError> {
        match action {
            PrimaryAction::Chat(cfg) => {
                let cfg = resolve_config(cfg, scope).await?;
                self.backends.run(PrimaryAction::Chat(&cfg)).await
            }
            PrimaryAction::HttpClient(cfg) => {
                let cfg = resolve_config(cfg, scope).await?;
                self.backends.run(PrimaryAction::HttpClient(&cfg)).await
            }
            PrimaryAction::Sql(cfg) => {
                let cfg = resolve_config(cfg, scope).await?;
                self.backends.run(PrimaryAction::Sql(&cfg)).await
            }
            PrimaryAction::Python(cfg) => {
                let cfg = resolve_config(cfg, scope).await?;
                self.backends.run(PrimaryAction::Python(&cfg)).await
            }
            PrimaryAction::Exec(cfg) => {
                let cfg = resolve_config(cfg, scope).await?;
                self.backends.run(PrimaryAction::Exec(&cfg)).await
            }
        }
    }

    /// All `when[]` predicates must be truthy against the in-scope `error`;
    /// an empty list matches every error.
    async fn handler_matches(
        &self,
        handler: &crate::config::OnErrorConfig,
        err: &AppError,
        scope: &RequestScope,
    ) -> Result<bool, AppError> {
        if handler.when.is_empty() {
            return Ok(true);
        }
        scope.set_memory("error", error_scope(err));
        let mut matched = true;
        for predicate in &handler.when {
            if !Evaluator.eval_truthy(predicate, scope).await? {
                matched = false;
                break;
            }
        }
        scope.clear_memory("error");
        Ok(matched)
    }

    /// Handler expressions see the error in scope; their own failures only log.
    async fn run_handler_exprs(
        &self,
        handler: &crate::config::OnErrorConfig,
        err: &AppError,
        scope: &RequestScope,
    ) {
        if handler.expr.is_empty() {
            return;
        }
        scope.set_memory("error", error_scope(err));
        for expr in &handler.expr {
            if let Err(e) = Evaluator.eval(expr, scope).await {
                tracing::warn!("onError expr failed: {}", e);
            }
        }
        scope.clear_memory("error");
    }

    /// Shapes the terminal response from the target's `apiResponse`, or
    /// synthesizes one around the captured output.
    async fn shape_response(
        &self,
        target: &Resource,
        scope: &RequestScope,
        session_id: String,
    ) -> Result<ResponseData, AppError> {
        let output = scope.output(target.action_id()).await?;
        let Some(cfg) = &target.run.api_response else {
            return Ok(ResponseData {
                status: 200,
                headers: BTreeMap::new(),
                body: json!({ "success": true, "response": output }),
                session_id,
            });
        };

        let success = match &cfg.success {
            BoolOrExpr::Bool(b) => *b,
            BoolOrExpr::Expr(raw) => {
                Evaluator
                    .eval_truthy(&Expression::from(raw.as_str()), scope)
                    .await?
            }
        };
        let mut response = cfg.response.clone();
        resolve_value(&mut response, scope).await?;

        let status = if success {
            cfg.success_status()
        } else {
            match &cfg.meta {
                Some(m) if m.status_code != 0 => m.status_code,
                _ => AppCode::InternalError.http_status(),
            }
        };
        let headers = cfg
            .meta
            .as_ref()
            .map(|m| m.headers.clone())
            .unwrap_or_default();

        let body = json!({ "success": success, "response": response });
        scope.record_output(target.action_id(), body.clone());
        Ok(ResponseData {
            status,
            headers,
            body,
            session_id,
        })
    }
}

/// Restriction enforcement for the target resource.
fn check_restrictions(target: &Resource, req: &RequestInput) -> Result<(), AppError> {
    let run = &target.run;
    if !run.restrict_to_http_methods.is_empty() {
        let allowed = run
            .restrict_to_http_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&req.method));
        if !allowed {
            return Err(AppError::new(
                AppCode::BadRequest,
                format!("method {} not allowed for this action", req.method),
            ));
        }
    }
    if !run.restrict_to_routes.is_empty() && !run.restrict_to_routes.contains(&req.route) {
        return Err(AppError::new(
            AppCode::NotFound,
            format!("route {} not allowed for this action", req.route),
        ));
    }
    Ok(())
}

fn filter_params(
    query: &BTreeMap<String, Value>,
    allowed: &[String],
) -> BTreeMap<String, Value> {
    if allowed.is_empty() {
        return query.clone();
    }
    query
        .iter()
        .filter(|(k, _)| allowed.contains(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn filter_headers(
    headers: &BTreeMap<String, String>,
    allowed: &[String],
) -> BTreeMap<String, String> {
    if allowed.is_empty() {
        return headers.clone();
    }
    headers
        .iter()
        .filter(|(k, _)| allowed.iter().any(|a| a.eq_ignore_ascii_case(k)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// The flat field→value mapping validation runs against: body fields,
/// overlaid by headers, overlaid by query (the `input` precedence).
async fn validation_input(scope: &RequestScope) -> BTreeMap<String, Value> {
    scope.flat_input_view()
}

fn error_scope(err: &AppError) -> Value {
    json!({
        "message": err.message(),
        "code": err.code().as_str(),
        "type": err.code().as_str(),
        "status": err.status_code(),
    })
}

/// Recursively expands expressions inside a JSON value: a string that is one
/// whole `{{ expr }}` span becomes the expression's value; a string with
/// embedded spans interpolates to text; everything else recurses.
pub(crate) fn resolve_value<'a>(
    value: &'a mut Value,
    scope: &'a RequestScope,
) -> BoxFuture<'a, Result<(), AppError>> {
    Box::pin(async move {
        match value {
            Value::String(s) => {
                if !s.contains("{{") {
                    return Ok(());
                }
                // Mustache sections are template-glue territory; pass through.
                if Expression::from(s.as_str()).kind() == crate::expr::ExprKind::Mustache {
                    return Ok(());
                }
                let trimmed = s.trim();
                if let Some(inner) = whole_span(trimmed) {
                    let expr = Expression::from(inner);
                    // The whole string is one span: keep the value's type.
                    let v = match expr.kind() {
                        crate::expr::ExprKind::Direct => Evaluator.eval(&expr, scope).await?,
                        _ => Value::String(crate::expr::interpolate(s, scope).await?),
                    };
                    *value = v;
                } else {
                    *value = Value::String(crate::expr::interpolate(s, scope).await?);
                }
                Ok(())
            }
            Value::Array(items) => {
                for item in items {
                    resolve_value(item, scope).await?;
                }
                Ok(())
            }
            Value::Object(map) => {
                for (_, v) in map.iter_mut() {
                    resolve_value(v, scope).await?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    })
}

/// Returns the inner expression when the whole string is a single
/// `{{ ... }}` span.
fn whole_span(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

/// Serializes a config, expands expressions in its string leaves, and decodes
/// it back. Aliases stay canonical because serialization emits the long form.
async fn resolve_config<T>(cfg: &T, scope: &RequestScope) -> Result<T, AppError>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    let mut value = serde_json::to_value(cfg)
        .map_err(|e| AppError::new(AppCode::InternalError, "encode action config").with_error(e))?;
    resolve_value(&mut value, scope).await?;
    serde_json::from_value(value)
        .map_err(|e| AppError::new(AppCode::InternalError, "decode action config").with_error(e))
}
