//! Per-request capability scope.
//!
//! Implements the nine-operation capability set over the request's inputs,
//! the in-request memory map, the session store, and the captured outputs of
//! completed resources.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::app_error::{AppCode, AppError};
use crate::expr::{Capabilities, ItemField, StorageTarget};
use crate::session::SessionStore;
use std::sync::Arc;

/// Iteration position while a resource walks its `items[]`.
#[derive(Debug, Clone, Default)]
pub(crate) struct ItemScope {
    pub items: Vec<Value>,
    pub index: usize,
}

/// Capability scope for one request execution.
pub struct RequestScope {
    /// Query/path parameters, already filtered by `allowedParams`.
    query: BTreeMap<String, Value>,
    /// Request headers, already filtered by `allowedHeaders`.
    headers: BTreeMap<String, String>,
    /// Parsed request body (an object, or null).
    body: Value,
    /// Workflow/request metadata served by `info(field)`.
    info: BTreeMap<String, Value>,

    session_store: Arc<dyn SessionStore>,
    session_id: String,
    session_ttl: Duration,

    memory: Mutex<BTreeMap<String, Value>>,
    outputs: Mutex<BTreeMap<String, Value>>,
    item: Mutex<Option<ItemScope>>,
}

impl RequestScope {
    /// Builds a scope over the request inputs.
    pub fn new(
        query: BTreeMap<String, Value>,
        headers: BTreeMap<String, String>,
        body: Value,
        info: BTreeMap<String, Value>,
        session_store: Arc<dyn SessionStore>,
        session_id: String,
        session_ttl: Duration,
    ) -> Self {
        Self {
            query,
            headers,
            body,
            info,
            session_store,
            session_id,
            session_ttl,
            memory: Mutex::new(BTreeMap::new()),
            outputs: Mutex::new(BTreeMap::new()),
            item: Mutex::new(None),
        }
    }

    /// The caller's session id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Records a completed resource's output for `output(id)`.
    pub fn record_output(&self, action_id: &str, output: Value) {
        self.outputs
            .lock()
            .expect("outputs lock")
            .insert(action_id.to_string(), output);
    }

    /// Writes a request-memory entry (also used for the `error` scope
    /// during `onError.when` evaluation).
    pub fn set_memory(&self, key: &str, value: Value) {
        self.memory
            .lock()
            .expect("memory lock")
            .insert(key.to_string(), value);
    }

    /// Removes a request-memory entry.
    pub fn clear_memory(&self, key: &str) {
        self.memory.lock().expect("memory lock").remove(key);
    }

    /// Enters an iteration scope over `items`.
    pub(crate) fn enter_items(&self, items: Vec<Value>) {
        *self.item.lock().expect("item lock") = Some(ItemScope { items, index: 0 });
    }

    /// Advances to the next item.
    pub(crate) fn advance_item(&self, index: usize) {
        if let Some(scope) = self.item.lock().expect("item lock").as_mut() {
            scope.index = index;
        }
    }

    /// Leaves the iteration scope.
    pub(crate) fn exit_items(&self) {
        *self.item.lock().expect("item lock") = None;
    }

    /// The flat field→value view validation runs against: body fields
    /// overlaid by headers overlaid by query, matching `input` precedence.
    pub fn flat_input_view(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        if let Value::Object(map) = &self.body {
            for (k, v) in map {
                out.insert(k.clone(), v.clone());
            }
        }
        for (k, v) in &self.headers {
            out.insert(k.clone(), Value::String(v.clone()));
        }
        for (k, v) in &self.query {
            out.insert(k.clone(), v.clone());
        }
        out
    }

    fn current_item_field(&self, name: &str) -> Option<Value> {
        let guard = self.item.lock().expect("item lock");
        let scope = guard.as_ref()?;
        scope
            .items
            .get(scope.index)
            .and_then(|v| v.get(name))
            .cloned()
    }
}

#[async_trait]
impl Capabilities for RequestScope {
    async fn get(&self, name: &str, _type_hint: Option<&str>) -> Result<Value, AppError> {
        // Precedence: items → memory → session → output → param → header →
        // file → info. The first defined value wins.
        if let Some(v) = self.current_item_field(name) {
            return Ok(v);
        }
        if let Some(v) = self.memory.lock().expect("memory lock").get(name) {
            return Ok(v.clone());
        }
        if let Some(v) = self
            .session_store
            .get(&self.session_id, name)
            .await
            .map_err(storage_error)?
        {
            return Ok(v);
        }
        if let Some(v) = self.outputs.lock().expect("outputs lock").get(name) {
            return Ok(v.clone());
        }
        if let Some(v) = self.query.get(name) {
            return Ok(v.clone());
        }
        if let Some(v) = self.headers.get(name) {
            return Ok(Value::String(v.clone()));
        }
        if let Ok(content) = tokio::fs::read_to_string(name).await {
            return Ok(Value::String(content));
        }
        Ok(self.info.get(name).cloned().unwrap_or(Value::Null))
    }

    async fn set(&self, key: &str, value: Value, storage: StorageTarget) -> Result<(), AppError> {
        match storage {
            StorageTarget::Memory => {
                self.set_memory(key, value);
                Ok(())
            }
            StorageTarget::Session => self
                .session_store
                .set(&self.session_id, key, value, self.session_ttl)
                .await
                .map_err(storage_error),
        }
    }

    async fn file(&self, pattern: &str, selector: Option<&str>) -> Result<Value, AppError> {
        let paths = glob::glob(pattern)
            .map_err(|e| {
                AppError::new(AppCode::ExpressionError, "invalid file pattern").with_error(e)
            })?
            .filter_map(Result::ok)
            .collect::<Vec<_>>();
        let chosen = match selector {
            Some(sel) => paths.iter().find(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy() == sel)
                    .unwrap_or(false)
            }),
            None => paths.first(),
        };
        match chosen {
            Some(path) => {
                let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                    AppError::new(
                        AppCode::ExpressionError,
                        format!("read file {}", path.display()),
                    )
                    .with_error(e)
                })?;
                Ok(Value::String(content))
            }
            None => Ok(Value::Null),
        }
    }

    async fn info(&self, field: &str) -> Result<Value, AppError> {
        Ok(self.info.get(field).cloned().unwrap_or(Value::Null))
    }

    async fn input(&self, name: &str, _type_hint: Option<&str>) -> Result<Value, AppError> {
        // Precedence: query → header → body.
        if let Some(v) = self.query.get(name) {
            return Ok(v.clone());
        }
        if let Some(v) = self.headers.get(name) {
            return Ok(Value::String(v.clone()));
        }
        Ok(self.body.get(name).cloned().unwrap_or(Value::Null))
    }

    async fn output(&self, resource_id: &str) -> Result<Value, AppError> {
        Ok(self
            .outputs
            .lock()
            .expect("outputs lock")
            .get(resource_id)
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn item(&self, which: ItemField) -> Result<Value, AppError> {
        let guard = self.item.lock().expect("item lock");
        let Some(scope) = guard.as_ref() else {
            return Ok(Value::Null);
        };
        Ok(match which {
            ItemField::Current => scope.items.get(scope.index).cloned().unwrap_or(Value::Null),
            ItemField::Prev => match scope.index.checked_sub(1) {
                Some(i) => scope.items.get(i).cloned().unwrap_or(Value::Null),
                None => Value::Null,
            },
            ItemField::Next => scope
                .items
                .get(scope.index + 1)
                .cloned()
                .unwrap_or(Value::Null),
            ItemField::Index => Value::from(scope.index),
            ItemField::Count => Value::from(scope.items.len()),
        })
    }

    async fn session(&self) -> Result<Value, AppError> {
        let snapshot = self
            .session_store
            .snapshot(&self.session_id)
            .await
            .map_err(storage_error)?;
        Ok(Value::Object(snapshot))
    }

    async fn env(&self, name: &str) -> Result<Value, AppError> {
        Ok(std::env::var(name)
            .map(Value::String)
            .unwrap_or(Value::Null))
    }
}

fn storage_error(e: crate::session::SessionError) -> AppError {
    AppError::new(AppCode::InternalError, "session storage failed").with_error(e)
}
