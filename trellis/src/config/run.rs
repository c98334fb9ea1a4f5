//! The invocation spec of a resource: restrictions, control expressions,
//! expression blocks, inline sub-resources, the primary action, and the
//! error policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::api_response::ApiResponseConfig;
use crate::config::chat::ChatConfig;
use crate::config::decode;
use crate::config::http::HttpClientConfig;
use crate::config::process::{ExecConfig, PythonConfig};
use crate::config::sql::SqlConfig;
use crate::config::validation::ValidationRules;
use crate::error::{Error, ErrorCode};
use crate::expr::Expression;

/// What the engine does when a resource step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnErrorAction {
    /// Treat the resource as completed with the fallback output.
    Continue,
    /// Propagate the error and halt dependents (the default).
    #[default]
    Fail,
    /// Re-enter the resource after `retryDelay`, up to `maxRetries` times.
    Retry,
}

/// Per-resource error policy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnErrorConfig {
    #[serde(skip_serializing_if = "is_default_action")]
    pub action: OnErrorAction,
    #[serde(deserialize_with = "decode::flex_u32_opt", skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(
        deserialize_with = "decode::flex_duration_opt",
        serialize_with = "decode::duration_opt_to_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub retry_delay: Option<Duration>,
    /// Output substituted when `action` is `continue`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<serde_json::Value>,
    /// Expressions run when the handler matches (after the fallback applies).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expr: Vec<Expression>,
    /// Predicates over the in-scope `error`; empty matches every error.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<Expression>,
}

fn is_default_action(a: &OnErrorAction) -> bool {
    *a == OnErrorAction::Fail
}

impl OnErrorConfig {
    /// Retry budget, defaulting to 3.
    pub fn get_max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(3)
    }
}

/// Status and message attached when a preflight validation fails.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreflightError {
    #[serde(deserialize_with = "decode::flex_u16", skip_serializing_if = "is_zero_u16")]
    pub code: u16,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

fn is_zero_u16(v: &u16) -> bool {
    *v == 0
}

/// Gate run before anything else: every validation must be truthy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreflightCheck {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validations: Vec<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PreflightError>,
}

/// An inline sub-resource in `before[]` / `after[]`: exactly one action,
/// no nested blocks.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InlineResource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<ChatConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_client: Option<HttpClientConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<SqlConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python: Option<PythonConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecConfig>,
}

impl InlineResource {
    fn set_count(&self) -> usize {
        [
            self.chat.is_some(),
            self.http_client.is_some(),
            self.sql.is_some(),
            self.python.is_some(),
            self.exec.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count()
    }

    /// Exactly one action must be set.
    pub fn validate(&self) -> Result<(), Error> {
        match self.set_count() {
            1 => Ok(()),
            0 => Err(Error::new(
                ErrorCode::InvalidResource,
                "inline resource declares no action",
            )),
            n => Err(Error::new(
                ErrorCode::InvalidResource,
                format!("inline resource declares {} actions, expected exactly one", n),
            )),
        }
    }
}

/// The full invocation spec.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    // Request restrictions.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub restrict_to_http_methods: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub restrict_to_routes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_headers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_params: Vec<String>,

    // Control expressions.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skip_condition: Vec<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preflight_check: Option<PreflightCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRules>,

    // Expression blocks. `expr` and `exprAfter` both run after the primary;
    // `expr` first for determinism.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expr_before: Vec<Expression>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expr: Vec<Expression>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expr_after: Vec<Expression>,

    // Inline sub-resources.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub before: Vec<InlineResource>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<InlineResource>,

    // Primary action (at most one), optionally combined with apiResponse.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<ChatConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_client: Option<HttpClientConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<SqlConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python: Option<PythonConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_response: Option<ApiResponseConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnErrorConfig>,
}

/// A borrowed view of whichever primary action is set.
#[derive(Debug, Clone, Copy)]
pub enum PrimaryAction<'a> {
    Chat(&'a ChatConfig),
    HttpClient(&'a HttpClientConfig),
    Sql(&'a SqlConfig),
    Python(&'a PythonConfig),
    Exec(&'a ExecConfig),
}

impl RunConfig {
    fn primary_count(&self) -> usize {
        [
            self.chat.is_some(),
            self.http_client.is_some(),
            self.sql.is_some(),
            self.python.is_some(),
            self.exec.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count()
    }

    /// The primary action, when one is declared.
    pub fn primary(&self) -> Option<PrimaryAction<'_>> {
        if let Some(c) = &self.chat {
            return Some(PrimaryAction::Chat(c));
        }
        if let Some(c) = &self.http_client {
            return Some(PrimaryAction::HttpClient(c));
        }
        if let Some(c) = &self.sql {
            return Some(PrimaryAction::Sql(c));
        }
        if let Some(c) = &self.python {
            return Some(PrimaryAction::Python(c));
        }
        if let Some(c) = &self.exec {
            return Some(PrimaryAction::Exec(c));
        }
        None
    }

    /// The per-invocation timeout of whichever primary action is set.
    pub fn timeout(&self) -> Option<Duration> {
        match self.primary()? {
            PrimaryAction::Chat(c) => c.timeout_duration,
            PrimaryAction::HttpClient(c) => c.timeout_duration,
            PrimaryAction::Sql(c) => c.timeout_duration,
            PrimaryAction::Python(c) => c.timeout_duration,
            PrimaryAction::Exec(c) => c.timeout_duration,
        }
    }

    /// At most one primary action may be set (`apiResponse` may accompany it);
    /// every inline sub-resource must carry exactly one action.
    pub fn validate(&self) -> Result<(), Error> {
        let n = self.primary_count();
        if n > 1 {
            return Err(Error::new(
                ErrorCode::InvalidResource,
                format!("{} primary actions declared, expected at most one", n),
            ));
        }
        for inline in self.before.iter().chain(self.after.iter()) {
            inline.validate()?;
        }
        Ok(())
    }
}
