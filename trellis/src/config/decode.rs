//! Permissive scalar decoding shared by every config entity.
//!
//! Users write YAML loosely: `enabled: "yes"`, `portNum: "8080"`, `ttl: 30m`.
//! Every bool/int/float field that commonly arrives as a string decodes through
//! the helpers here. Unparseable scalars are non-fatal: the field keeps its
//! zero value (or stays unset for `Option` fields) and decoding continues.
//! Structurally invalid documents (a mapping where a scalar belongs, and vice
//! versa at the document level) still fail the top-level call.

use std::fmt;
use std::time::Duration;

use serde::de::{Deserializer, Error as _};
use serde::{Deserialize, Serializer};

/// A scalar as it may appear on the wire: native type or its string spelling.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum FlexScalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Null,
}

/// String → bool table: `true/yes/1/on` and `false/no/0/off/""` (case-insensitive).
/// Returns `None` for any other string.
pub(crate) fn parse_bool_str(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Whole-number string → i64; empty string is 0. Whitespace is trimmed.
pub(crate) fn parse_int_str(s: &str) -> Option<i64> {
    let t = s.trim();
    if t.is_empty() {
        return Some(0);
    }
    t.parse::<i64>().ok()
}

fn parse_float_str(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return Some(0.0);
    }
    t.parse::<f64>().ok()
}

impl FlexScalar {
    fn as_bool(&self) -> Option<bool> {
        match self {
            FlexScalar::Bool(b) => Some(*b),
            FlexScalar::Int(i) => match *i {
                0 => Some(false),
                1 => Some(true),
                _ => None,
            },
            FlexScalar::Str(s) => parse_bool_str(s),
            FlexScalar::Float(_) | FlexScalar::Null => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            FlexScalar::Int(i) => Some(*i),
            FlexScalar::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            FlexScalar::Str(s) => parse_int_str(s),
            FlexScalar::Bool(_) | FlexScalar::Float(_) | FlexScalar::Null => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            FlexScalar::Int(i) => Some(*i as f64),
            FlexScalar::Float(f) => Some(*f),
            FlexScalar::Str(s) => parse_float_str(s),
            FlexScalar::Bool(_) | FlexScalar::Null => None,
        }
    }
}

/// Bool that also accepts its string spellings. Unparseable → `false`.
pub(crate) fn flex_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let Ok(raw) = FlexScalar::deserialize(d) else {
        return Ok(false);
    };
    Ok(raw.as_bool().unwrap_or(false))
}

/// `Option<bool>` variant: null/absent/unparseable → `None`.
pub(crate) fn flex_bool_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    let Ok(raw) = FlexScalar::deserialize(d) else {
        return Ok(None);
    };
    Ok(raw.as_bool())
}

/// `u16` (ports, HTTP status codes) with string forms. Out-of-range or unparseable → 0.
pub(crate) fn flex_u16<'de, D: Deserializer<'de>>(d: D) -> Result<u16, D::Error> {
    let Ok(raw) = FlexScalar::deserialize(d) else {
        return Ok(0);
    };
    Ok(raw
        .as_i64()
        .and_then(|i| u16::try_from(i).ok())
        .unwrap_or(0))
}

/// `u32` (retry counts, pool sizes, row caps) with string forms.
pub(crate) fn flex_u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let Ok(raw) = FlexScalar::deserialize(d) else {
        return Ok(0);
    };
    Ok(raw
        .as_i64()
        .and_then(|i| u32::try_from(i).ok())
        .unwrap_or(0))
}

/// `Option<u32>` variant.
pub(crate) fn flex_u32_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    let Ok(raw) = FlexScalar::deserialize(d) else {
        return Ok(None);
    };
    Ok(raw.as_i64().and_then(|i| u32::try_from(i).ok()))
}

/// `Option<f64>` (temperature, penalties, rule bounds) with string forms.
pub(crate) fn flex_f64_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let Ok(raw) = FlexScalar::deserialize(d) else {
        return Ok(None);
    };
    Ok(raw.as_f64())
}

/// Parses a duration string: `250ms`, `30s`, `5m`, `1h`, or a bare integer
/// (seconds). Returns `None` for malformed input.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(secs) = t.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let split = t.find(|c: char| !c.is_ascii_digit() && c != '.')?;
    let (num, unit) = t.split_at(split);
    let value: f64 = num.parse().ok()?;
    let seconds = match unit.trim() {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return None,
    };
    Some(Duration::from_secs_f64(seconds))
}

/// Canonical compact form: `250ms` under a second, then `30s` / `5m` / `2h`
/// when the value divides evenly, largest unit first.
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis == 0 {
        return "0s".to_string();
    }
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }
    let secs = d.as_secs();
    if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// `Option<Duration>` from a duration string or bare seconds integer.
/// Non-string, non-integer values (and malformed strings) are ignored silently.
pub(crate) fn flex_duration_opt<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<Duration>, D::Error> {
    let Ok(raw) = FlexScalar::deserialize(d) else {
        return Ok(None);
    };
    Ok(match raw {
        FlexScalar::Str(s) => parse_duration(&s),
        FlexScalar::Int(i) if i >= 0 => Some(Duration::from_secs(i as u64)),
        _ => None,
    })
}

/// Serializes `Option<Duration>` in the canonical compact form.
pub(crate) fn duration_opt_to_str<S: Serializer>(
    v: &Option<Duration>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match v {
        Some(d) => s.serialize_str(&format_duration(*d)),
        None => s.serialize_none(),
    }
}

/// Wire type for fields that take either a literal or an expression string
/// (e.g. `apiResponse.success`).
#[derive(Debug, Clone, PartialEq, Deserialize, serde::Serialize)]
#[serde(untagged)]
pub enum BoolOrExpr {
    /// A plain boolean.
    Bool(bool),
    /// Raw expression text, resolved at response time.
    Expr(String),
}

impl Default for BoolOrExpr {
    fn default() -> Self {
        BoolOrExpr::Bool(true)
    }
}

impl fmt::Display for BoolOrExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoolOrExpr::Bool(b) => write!(f, "{}", b),
            BoolOrExpr::Expr(e) => write!(f, "{}", e),
        }
    }
}

/// Decode helper for map-shaped fields that users sometimes write as a scalar:
/// a non-mapping value decodes as `None` without error.
pub(crate) fn lenient_map_opt<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = serde_json::Value::deserialize(d).map_err(D::Error::custom)?;
    if !value.is_object() {
        return Ok(None);
    }
    Ok(serde_json::from_value(value).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize)]
    struct Flags {
        #[serde(default, deserialize_with = "flex_bool")]
        enabled: bool,
        #[serde(default, deserialize_with = "flex_u16")]
        port: u16,
        #[serde(default, deserialize_with = "flex_f64_opt")]
        ratio: Option<f64>,
    }

    /// **Scenario**: each recognized bool spelling decodes to the matching value.
    #[test]
    fn bool_string_table() {
        for (s, want) in [
            ("true", true),
            ("yes", true),
            ("1", true),
            ("on", true),
            ("false", false),
            ("no", false),
            ("0", false),
            ("off", false),
            ("", false),
        ] {
            let f: Flags = serde_yaml::from_str(&format!("enabled: \"{}\"", s)).unwrap();
            assert_eq!(f.enabled, want, "input {:?}", s);
        }
    }

    /// **Scenario**: a string outside the table leaves the field at its zero value
    /// without failing the document.
    #[test]
    fn bool_unknown_string_is_zero_value() {
        let f: Flags = serde_yaml::from_str("enabled: \"maybe\"\nport: \"8080\"").unwrap();
        assert!(!f.enabled);
        assert_eq!(f.port, 8080);
    }

    #[test]
    fn int_strings_and_whitespace() {
        let f: Flags = serde_yaml::from_str("port: \" 443 \"").unwrap();
        assert_eq!(f.port, 443);
        let f: Flags = serde_yaml::from_str("port: \"\"").unwrap();
        assert_eq!(f.port, 0);
        let f: Flags = serde_yaml::from_str("port: \"12x\"").unwrap();
        assert_eq!(f.port, 0);
    }

    #[test]
    fn float_scientific_notation() {
        let f: Flags = serde_yaml::from_str("ratio: \"1.5e1\"").unwrap();
        assert_eq!(f.ratio, Some(15.0));
        let f: Flags = serde_yaml::from_str("ratio: \"oops\"").unwrap();
        assert_eq!(f.ratio, None);
    }

    #[test]
    fn duration_parse_units() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("1d"), None);
        assert_eq!(parse_duration(""), None);
    }

    /// **Scenario**: canonical formatting round-trips through the parser.
    #[test]
    fn duration_format_roundtrip() {
        for d in [
            Duration::from_millis(250),
            Duration::from_secs(30),
            Duration::from_secs(300),
            Duration::from_secs(7200),
        ] {
            assert_eq!(parse_duration(&format_duration(d)), Some(d));
        }
    }

    #[test]
    fn bool_or_expr_shapes() {
        #[derive(Deserialize)]
        struct W {
            success: BoolOrExpr,
        }
        let w: W = serde_yaml::from_str("success: true").unwrap();
        assert_eq!(w.success, BoolOrExpr::Bool(true));
        let w: W = serde_yaml::from_str("success: \"output('x') == 1\"").unwrap();
        assert_eq!(w.success, BoolOrExpr::Expr("output('x') == 1".into()));
    }
}
