//! Terminal API response shaping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::decode::{self, BoolOrExpr};

/// Response metadata: extra headers and an explicit status override.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiResponseMeta {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Overrides the default 200 (and the dispatcher's error mapping). 0 = unset.
    #[serde(deserialize_with = "decode::flex_u16", skip_serializing_if = "is_zero_u16")]
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

fn is_zero_u16(v: &u16) -> bool {
    *v == 0
}

/// The `apiResponse` block of a run config: evaluated at response time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiResponseConfig {
    /// Literal bool or an expression evaluated for truthiness.
    #[serde(skip_serializing_if = "is_default_success")]
    pub success: BoolOrExpr,
    /// Response body; string leaves are expression-expanded before serialization.
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub response: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ApiResponseMeta>,
}

fn is_default_success(v: &BoolOrExpr) -> bool {
    *v == BoolOrExpr::Bool(true)
}

impl ApiResponseConfig {
    /// The status for a successful response: explicit `meta.statusCode` or 200.
    pub fn success_status(&self) -> u16 {
        match &self.meta {
            Some(m) if m.status_code != 0 => m.status_code,
            _ => 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_literal_and_expression() {
        let c: ApiResponseConfig = serde_yaml::from_str("success: true").unwrap();
        assert_eq!(c.success, BoolOrExpr::Bool(true));
        let c: ApiResponseConfig =
            serde_yaml::from_str("success: \"output('check').ok\"").unwrap();
        assert!(matches!(c.success, BoolOrExpr::Expr(_)));
    }

    /// **Scenario**: `meta.statusCode` (string form allowed) overrides the default 200.
    #[test]
    fn status_override() {
        let c = ApiResponseConfig::default();
        assert_eq!(c.success_status(), 200);
        let c: ApiResponseConfig =
            serde_yaml::from_str("meta:\n  statusCode: \"201\"").unwrap();
        assert_eq!(c.success_status(), 201);
    }

    #[test]
    fn response_body_passthrough() {
        let c: ApiResponseConfig = serde_yaml::from_str(
            "response:\n  message: \"{{ output('chat') }}\"\n  static: 1",
        )
        .unwrap();
        assert_eq!(c.response["static"], serde_json::json!(1));
    }
}
