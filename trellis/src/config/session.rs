//! Session store configuration: flat and nested (`storage`) forms.

use std::time::Duration;

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

use crate::config::decode::{self, lenient_map_opt};

/// Default entry lifetime when `ttl` is unset.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);
/// Default sweep interval when `cleanupInterval` is unset.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Session backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    /// Process-local; lost on restart.
    Memory,
    /// Persistent SQLite file at the configured path.
    #[default]
    Sqlite,
}

impl SessionType {
    fn from_str_lenient(s: &str) -> Option<Self> {
        match s {
            "memory" => Some(SessionType::Memory),
            "sqlite" => Some(SessionType::Sqlite),
            _ => None,
        }
    }
}

/// Nested storage block. When present it takes precedence over the flat
/// `type`/`path` fields; a non-mapping value disables it without error.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStorage {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub storage_type: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

/// Session store settings. Decodes both the flat form (`type`, `path` at the
/// top level) and the nested form (`storage: {type, path}`); nested values
/// mirror to the top level at decode, and a `storage` block that carries
/// nothing beyond the flat fields is normalized away so the in-memory model
/// (and its serialization) stays canonical.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawSessionConfig")]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub enabled: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub session_type: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "decode::duration_opt_to_str"
    )]
    pub ttl: Option<Duration>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "decode::duration_opt_to_str"
    )]
    pub cleanup_interval: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<SessionStorage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSessionConfig {
    #[serde(default, deserialize_with = "decode::flex_bool")]
    enabled: bool,
    #[serde(default, rename = "type")]
    session_type: Option<String>,
    #[serde(default)]
    path: String,
    #[serde(default, deserialize_with = "duration_str_only")]
    ttl: Option<Duration>,
    #[serde(default, deserialize_with = "duration_str_only")]
    cleanup_interval: Option<Duration>,
    #[serde(default, deserialize_with = "lenient_map_opt")]
    storage: Option<SessionStorage>,
}

/// TTL-style fields parse duration strings only; non-string values are
/// ignored silently.
fn duration_str_only<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
    let Ok(v) = serde_json::Value::deserialize(d) else {
        return Ok(None);
    };
    Ok(v.as_str().and_then(decode::parse_duration))
}

impl From<RawSessionConfig> for SessionConfig {
    fn from(raw: RawSessionConfig) -> Self {
        let mut cfg = SessionConfig {
            enabled: raw.enabled,
            session_type: raw.session_type,
            path: raw.path,
            ttl: raw.ttl,
            cleanup_interval: raw.cleanup_interval,
            storage: raw.storage,
        };
        // Nested storage mirrors to the flat fields for readers that only
        // look at the top level.
        if let Some(storage) = &cfg.storage {
            if let Some(t) = &storage.storage_type {
                if cfg.session_type.is_none() {
                    cfg.session_type = Some(t.clone());
                }
            }
            if cfg.path.is_empty() {
                cfg.path = storage.path.clone();
            }
        }
        // A block that now only repeats the flat fields is dropped; nested
        // precedence only matters when the two disagree.
        let redundant = cfg.storage.as_ref().is_some_and(|st| {
            let type_covered = match st.storage_type.as_deref() {
                Some(t) => cfg.session_type.as_deref() == Some(t),
                None => true,
            };
            let path_covered = st.path.is_empty() || st.path == cfg.path;
            type_covered && path_covered
        });
        if redundant {
            cfg.storage = None;
        }
        cfg
    }
}

impl SessionConfig {
    /// Backend type: nested `storage.type` over top-level `type` over the
    /// sqlite default. Unrecognized names fall back to the default.
    pub fn get_type(&self) -> SessionType {
        self.storage
            .as_ref()
            .and_then(|s| s.storage_type.as_deref())
            .and_then(SessionType::from_str_lenient)
            .or_else(|| {
                self.session_type
                    .as_deref()
                    .and_then(SessionType::from_str_lenient)
            })
            .unwrap_or_default()
    }

    /// Storage path: nested over top-level.
    pub fn get_path(&self) -> &str {
        match &self.storage {
            Some(s) if !s.path.is_empty() => &s.path,
            _ => &self.path,
        }
    }

    /// Entry lifetime, defaulting to 30 minutes.
    pub fn get_ttl(&self) -> Duration {
        self.ttl.unwrap_or(DEFAULT_SESSION_TTL)
    }

    /// Sweep interval, defaulting to 5 minutes.
    pub fn get_cleanup_interval(&self) -> Duration {
        self.cleanup_interval.unwrap_or(DEFAULT_CLEANUP_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_form() {
        let c: SessionConfig =
            serde_yaml::from_str("enabled: \"yes\"\ntype: memory\nttl: 10m").unwrap();
        assert!(c.enabled);
        assert_eq!(c.get_type(), SessionType::Memory);
        assert_eq!(c.get_ttl(), Duration::from_secs(600));
        assert_eq!(c.get_cleanup_interval(), DEFAULT_CLEANUP_INTERVAL);
    }

    /// **Scenario**: nested `storage.type` wins over the top-level `type`.
    #[test]
    fn nested_storage_wins() {
        let c: SessionConfig = serde_yaml::from_str(
            "type: memory\nstorage:\n  type: sqlite\n  path: /tmp/s.db",
        )
        .unwrap();
        assert_eq!(c.get_type(), SessionType::Sqlite);
        assert_eq!(c.get_path(), "/tmp/s.db");
        // Mirrored to the flat path for compatibility.
        assert_eq!(c.path, "/tmp/s.db");
    }

    /// **Scenario**: a purely-nested document normalizes to the flat form,
    /// so the canonical output carries no `storage` block.
    #[test]
    fn mirrored_only_storage_normalizes_away() {
        let c: SessionConfig =
            serde_yaml::from_str("storage:\n  type: sqlite\n  path: x.db").unwrap();
        assert!(c.storage.is_none());
        assert_eq!(c.get_type(), SessionType::Sqlite);
        assert_eq!(c.get_path(), "x.db");
        let y = serde_yaml::to_string(&c).unwrap();
        assert!(!y.contains("storage"));
        let back: SessionConfig = serde_yaml::from_str(&y).unwrap();
        assert_eq!(back, c);
    }

    /// **Scenario**: a non-mapping `storage` value disables nesting without error.
    #[test]
    fn scalar_storage_ignored() {
        let c: SessionConfig = serde_yaml::from_str("storage: sqlite").unwrap();
        assert!(c.storage.is_none());
        assert_eq!(c.get_type(), SessionType::Sqlite);
    }

    /// **Scenario**: non-string TTL values are ignored silently.
    #[test]
    fn non_string_ttl_ignored() {
        let c: SessionConfig = serde_yaml::from_str("ttl: { bogus: true }").unwrap();
        assert_eq!(c.ttl, None);
        assert_eq!(c.get_ttl(), DEFAULT_SESSION_TTL);
    }

    #[test]
    fn empty_document_is_all_defaults() {
        let c: SessionConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(c, SessionConfig::default());
        assert_eq!(c.get_type(), SessionType::Sqlite);
        assert_eq!(c.get_ttl(), DEFAULT_SESSION_TTL);
    }

    #[test]
    fn roundtrip() {
        let c: SessionConfig =
            serde_yaml::from_str("enabled: true\ntype: sqlite\npath: x.db\nttl: 30s").unwrap();
        let y = serde_yaml::to_string(&c).unwrap();
        let back: SessionConfig = serde_yaml::from_str(&y).unwrap();
        assert_eq!(back, c);
        assert!(y.contains("30s"));
    }
}
