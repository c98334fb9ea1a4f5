//! Expression host: raw expression text, kind classification, and the
//! capability surface an evaluator must provide.
//!
//! The config model stores expressions as opaque text ([`Expression`]); nothing
//! is evaluated at load time. At run time the scheduler hands expressions to an
//! evaluator together with a [`Capabilities`] implementation scoped to the
//! current request and resource.

mod capability;
mod eval;

pub use capability::{Capabilities, ItemField, StorageTarget};
pub use eval::{interpolate, truthy, Evaluator};

use serde::{Deserialize, Serialize};

/// Raw expression text captured at parse time.
///
/// Decodes transparently from any YAML/JSON string, so config fields can be
/// `Vec<Expression>` without ceremony.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Expression(String);

/// Shape of an expression's raw text, decided without evaluating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprKind {
    /// Plain text with no evaluatable structure.
    Literal,
    /// A single expression (`get('role') == 'admin'`, `output('fetch').x`).
    Direct,
    /// Literal text containing `{{ ... }}` spans.
    Interpolated,
    /// Mustache-style sections (`{{#items}}...{{/items}}`); preserved, not evaluated.
    Mustache,
}

impl Expression {
    /// Wraps raw expression text.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw source text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Classifies the raw text. Mustache sections win over plain interpolation;
    /// text that parses as a single non-literal expression is `Direct`; anything
    /// else is `Literal`.
    pub fn kind(&self) -> ExprKind {
        let s = self.0.as_str();
        if s.contains("{{#") || s.contains("{{^") || s.contains("{{/") {
            return ExprKind::Mustache;
        }
        if s.contains("{{") {
            return ExprKind::Interpolated;
        }
        if eval::parses_as_direct(s) || eval::looks_like_call(s) {
            return ExprKind::Direct;
        }
        ExprKind::Literal
    }
}

impl From<&str> for Expression {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Expression {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
