//! Field-rule and custom-expression validation of request and resource inputs.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::config::{FieldRule, FieldType, ValidationRules};
use crate::expr::{Capabilities, Evaluator};

/// One failed field.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("validation error on field '{field}': {message}")]
pub struct ValidationError {
    pub field: String,
    /// The rule that fired: `required`, a type name, `min`, `enum`, ...
    pub rule: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, rule: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            rule: rule.to_string(),
            message: message.into(),
        }
    }
}

/// All failures of one validation pass, in declaration order
/// (required first, then field rules, then custom rules).
#[derive(Debug, Clone, PartialEq)]
pub struct MultipleValidationError {
    pub errors: Vec<ValidationError>,
}

impl std::fmt::Display for MultipleValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.errors.as_slice() {
            [single] => write!(f, "{}", single),
            many => write!(f, "{} validation errors occurred", many.len()),
        }
    }
}

impl std::error::Error for MultipleValidationError {}

impl MultipleValidationError {
    /// JSON view for error-body `details`.
    pub fn to_details(&self) -> Value {
        Value::Array(
            self.errors
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "field": e.field,
                        "rule": e.rule,
                        "message": e.message.clone(),
                    })
                })
                .collect(),
        )
    }
}

/// Runs a rule set against a flat field→value mapping.
///
/// Custom rules evaluate through the expression host, so the caller provides
/// the current capability scope.
pub async fn check(
    rules: &ValidationRules,
    input: &BTreeMap<String, Value>,
    caps: &dyn Capabilities,
) -> Result<(), MultipleValidationError> {
    let mut errors = Vec::new();

    for name in &rules.required {
        if !input.contains_key(name) {
            errors.push(ValidationError::new(
                name,
                "required",
                format!("field '{}' is required", name),
            ));
        }
    }

    for rule in &rules.rules {
        let Some(value) = input.get(&rule.field) else {
            // Absent and not required: nothing to check.
            continue;
        };
        if let Some(err) = check_field(rule, value) {
            errors.push(err);
        }
    }

    for custom in &rules.custom_rules {
        match Evaluator.eval(&custom.expr, caps).await {
            Ok(Value::Bool(true)) => {}
            Ok(_) => {
                errors.push(ValidationError::new("", "custom", custom.message.clone()));
            }
            Err(e) => {
                errors.push(ValidationError::new(
                    "",
                    "EXPRESSION_ERROR",
                    e.message().to_string(),
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(MultipleValidationError { errors })
    }
}

/// Applies one rule to one present value. The first failing constraint wins.
fn check_field(rule: &FieldRule, value: &Value) -> Option<ValidationError> {
    let field = rule.field.as_str();
    let fail = |kind: &str, default_msg: String| {
        Some(ValidationError::new(
            field,
            kind,
            rule.message.clone().unwrap_or(default_msg),
        ))
    };

    if let Some(ty) = rule.field_type {
        if let Some(msg) = type_violation(ty, value) {
            return fail(type_rule_name(ty), msg);
        }
    }

    if let Some(s) = value.as_str() {
        if let Some(min) = rule.min_length {
            if (s.chars().count() as u32) < min {
                return fail("minLength", format!("must be at least {} characters", min));
            }
        }
        if let Some(max) = rule.max_length {
            if (s.chars().count() as u32) > max {
                return fail("maxLength", format!("must be at most {} characters", max));
            }
        }
        if let Some(pattern) = &rule.pattern {
            match regex::Regex::new(pattern) {
                Ok(re) if re.is_match(s) => {}
                Ok(_) => return fail("pattern", format!("must match pattern {}", pattern)),
                Err(_) => return fail("pattern", format!("invalid pattern {}", pattern)),
            }
        }
    }

    if let Some(n) = coerce_number(value) {
        if let Some(min) = rule.min {
            if n < min {
                return fail("min", format!("must be at least {}", min));
            }
        }
        if let Some(max) = rule.max {
            if n > max {
                return fail("max", format!("must be at most {}", max));
            }
        }
    }

    if let Some(items) = value.as_array() {
        if let Some(min) = rule.min_items {
            if (items.len() as u32) < min {
                return fail("minItems", format!("must have at least {} items", min));
            }
        }
        if let Some(max) = rule.max_items {
            if (items.len() as u32) > max {
                return fail("maxItems", format!("must have at most {} items", max));
            }
        }
    }

    if !rule.allowed.is_empty() && !rule.allowed.contains(value) {
        return fail("enum", "must be one of the allowed values".to_string());
    }

    None
}

fn type_rule_name(ty: FieldType) -> &'static str {
    match ty {
        FieldType::String => "string",
        FieldType::Integer => "integer",
        FieldType::Number => "number",
        FieldType::Boolean => "boolean",
        FieldType::Array => "array",
        FieldType::Object => "object",
        FieldType::Email => "email",
        FieldType::Url => "url",
        FieldType::Uuid => "uuid",
        FieldType::Date => "date",
    }
}

/// Numbers arriving as query/header strings still count for numeric checks.
fn coerce_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn type_violation(ty: FieldType, value: &Value) -> Option<String> {
    let ok = match ty {
        FieldType::String => value.is_string(),
        FieldType::Integer => match value {
            Value::Number(n) => n.is_i64() || n.is_u64(),
            Value::String(s) => s.trim().parse::<i64>().is_ok(),
            _ => false,
        },
        FieldType::Number => coerce_number(value).is_some(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Array => value.is_array(),
        FieldType::Object => value.is_object(),
        FieldType::Email => value
            .as_str()
            .map(is_email)
            .unwrap_or(false),
        FieldType::Url => value
            .as_str()
            .map(|s| url::Url::parse(s).is_ok())
            .unwrap_or(false),
        FieldType::Uuid => value
            .as_str()
            .map(|s| uuid::Uuid::parse_str(s).is_ok())
            .unwrap_or(false),
        FieldType::Date => value.as_str().map(is_iso_date).unwrap_or(false),
    };
    if ok {
        None
    } else {
        Some(format!("must be a valid {}", type_rule_name(ty)))
    }
}

fn is_email(s: &str) -> bool {
    // One '@', non-empty local part, dotted domain; full RFC addressing is
    // out of scope.
    static PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";
    regex::Regex::new(PATTERN)
        .map(|re| re.is_match(s))
        .unwrap_or(false)
}

fn is_iso_date(s: &str) -> bool {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        || chrono::DateTime::parse_from_rfc3339(s).is_ok()
}
