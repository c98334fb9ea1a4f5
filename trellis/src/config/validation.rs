//! Declared validation rules for request and resource inputs.
//!
//! Field rules arrive in three shapes: a `rules` array, a `fields` map, or a
//! `properties` map (JSON-Schema convention). All three decode into the
//! canonical `rules` vector; `properties` wins when both maps are present.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::decode;
use crate::expr::Expression;

/// Value types a field rule can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Email,
    Url,
    Uuid,
    Date,
}

/// One field's constraints. `min`/`max` are canonical; the JSON-Schema
/// spellings `minimum`/`maximum` win when both are present.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawFieldRule")]
pub struct FieldRule {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub field: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_items: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u32>,
    #[serde(rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFieldRule {
    #[serde(default)]
    field: String,
    #[serde(default, rename = "type")]
    field_type: Option<FieldType>,
    #[serde(default, deserialize_with = "decode::flex_u32_opt")]
    min_length: Option<u32>,
    #[serde(default, deserialize_with = "decode::flex_u32_opt")]
    max_length: Option<u32>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default, deserialize_with = "decode::flex_f64_opt")]
    min: Option<f64>,
    #[serde(default, deserialize_with = "decode::flex_f64_opt")]
    max: Option<f64>,
    #[serde(default, deserialize_with = "decode::flex_f64_opt")]
    minimum: Option<f64>,
    #[serde(default, deserialize_with = "decode::flex_f64_opt")]
    maximum: Option<f64>,
    #[serde(default, deserialize_with = "decode::flex_u32_opt")]
    min_items: Option<u32>,
    #[serde(default, deserialize_with = "decode::flex_u32_opt")]
    max_items: Option<u32>,
    #[serde(default, rename = "enum")]
    allowed: Vec<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

impl From<RawFieldRule> for FieldRule {
    fn from(raw: RawFieldRule) -> Self {
        FieldRule {
            field: raw.field,
            field_type: raw.field_type,
            min_length: raw.min_length,
            max_length: raw.max_length,
            pattern: raw.pattern,
            // The long JSON-Schema spelling wins over the short one.
            min: raw.minimum.or(raw.min),
            max: raw.maximum.or(raw.max),
            min_items: raw.min_items,
            max_items: raw.max_items,
            allowed: raw.allowed,
            message: raw.message,
        }
    }
}

/// A custom rule: expression plus the message emitted when it is falsy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomRule {
    pub expr: Expression,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// The full rule set applied to one input mapping.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawValidationRules")]
pub struct ValidationRules {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<FieldRule>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub custom_rules: Vec<CustomRule>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawValidationRules {
    #[serde(default)]
    required: Vec<String>,
    #[serde(default)]
    rules: Vec<FieldRule>,
    #[serde(default)]
    fields: Option<BTreeMap<String, FieldRule>>,
    #[serde(default)]
    properties: Option<BTreeMap<String, FieldRule>>,
    #[serde(default)]
    custom_rules: Vec<CustomRule>,
}

impl From<RawValidationRules> for ValidationRules {
    fn from(raw: RawValidationRules) -> Self {
        let mut rules = raw.rules;
        // Map shapes append after the array shape; `properties` wins over `fields`.
        let map = raw.properties.or(raw.fields);
        if let Some(map) = map {
            for (name, mut rule) in map {
                if rule.field.is_empty() {
                    rule.field = name;
                }
                rules.push(rule);
            }
        }
        ValidationRules {
            required: raw.required,
            rules,
            custom_rules: raw.custom_rules,
        }
    }
}

impl ValidationRules {
    /// True when no constraint of any kind is declared.
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.rules.is_empty() && self.custom_rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_array_shape() {
        let v: ValidationRules = serde_yaml::from_str(
            "required: [email]\nrules:\n  - field: email\n    type: email\n  - field: age\n    type: integer\n    min: 18",
        )
        .unwrap();
        assert_eq!(v.required, vec!["email"]);
        assert_eq!(v.rules.len(), 2);
        assert_eq!(v.rules[1].min, Some(18.0));
    }

    /// **Scenario**: the `fields` map shape fills each rule's field name from its key.
    #[test]
    fn fields_map_shape() {
        let v: ValidationRules = serde_yaml::from_str(
            "fields:\n  name:\n    type: string\n    minLength: 2",
        )
        .unwrap();
        assert_eq!(v.rules.len(), 1);
        assert_eq!(v.rules[0].field, "name");
        assert_eq!(v.rules[0].min_length, Some(2));
    }

    /// **Scenario**: `properties` wins when both map shapes are present.
    #[test]
    fn properties_wins_over_fields() {
        let v: ValidationRules = serde_yaml::from_str(
            "fields:\n  a:\n    type: string\nproperties:\n  b:\n    type: integer",
        )
        .unwrap();
        assert_eq!(v.rules.len(), 1);
        assert_eq!(v.rules[0].field, "b");
        assert_eq!(v.rules[0].field_type, Some(FieldType::Integer));
    }

    /// **Scenario**: `minimum` wins over `min` when both are set; same for `maximum`.
    #[test]
    fn long_bound_spelling_wins() {
        let r: FieldRule =
            serde_yaml::from_str("field: age\nmin: 1\nminimum: 21\nmax: 99\nmaximum: 65").unwrap();
        assert_eq!(r.min, Some(21.0));
        assert_eq!(r.max, Some(65.0));
    }

    /// **Scenario**: `{}` decodes with no errors and all fields zero.
    #[test]
    fn empty_document() {
        let v: ValidationRules = serde_yaml::from_str("{}").unwrap();
        assert!(v.is_empty());
        assert_eq!(v, ValidationRules::default());
    }

    #[test]
    fn roundtrip_canonicalizes() {
        let v: ValidationRules = serde_yaml::from_str(
            "fields:\n  age:\n    type: integer\n    minimum: \"18\"",
        )
        .unwrap();
        let y = serde_yaml::to_string(&v).unwrap();
        // Canonical output uses the rules array and short bound names.
        assert!(y.contains("rules"));
        assert!(y.contains("min"));
        let back: ValidationRules = serde_yaml::from_str(&y).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn custom_rules_decode() {
        let v: ValidationRules = serde_yaml::from_str(
            "customRules:\n  - expr: \"input('age') >= 18\"\n    message: must be adult",
        )
        .unwrap();
        assert_eq!(v.custom_rules.len(), 1);
        assert_eq!(v.custom_rules[0].message, "must be adult");
    }
}
