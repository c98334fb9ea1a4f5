//! Request input sources for a workflow.

use serde::{Deserialize, Serialize};

/// Where a workflow accepts input from. `sources` is authoritative; a legacy
/// scalar `source` is promoted to a single-element list when `sources` is empty.
///
/// Recognized sources: `api`, `audio`, `video`, `telephony`. The media configs
/// are opaque to the core and pass through untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawInputConfig")]
pub struct InputConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telephony: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcriber: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInputConfig {
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    audio: Option<serde_json::Value>,
    #[serde(default)]
    video: Option<serde_json::Value>,
    #[serde(default)]
    telephony: Option<serde_json::Value>,
    #[serde(default)]
    transcriber: Option<serde_json::Value>,
    #[serde(default)]
    activation: Option<serde_json::Value>,
}

impl From<RawInputConfig> for InputConfig {
    fn from(raw: RawInputConfig) -> Self {
        let mut sources = raw.sources;
        if sources.is_empty() {
            if let Some(legacy) = raw.source {
                if !legacy.is_empty() {
                    sources.push(legacy);
                }
            }
        }
        InputConfig {
            sources,
            audio: raw.audio,
            video: raw.video,
            telephony: raw.telephony,
            transcriber: raw.transcriber,
            activation: raw.activation,
        }
    }
}

impl InputConfig {
    /// The first non-API source, or `api` when there is none.
    pub fn primary_source(&self) -> &str {
        self.sources
            .iter()
            .find(|s| s.as_str() != "api")
            .map(String::as_str)
            .unwrap_or("api")
    }

    /// Set membership test on `sources`.
    pub fn has_source(&self, source: &str) -> bool {
        self.sources.iter().any(|s| s == source)
    }

    /// Whether any declared source is not `api`.
    pub fn has_non_api_source(&self) -> bool {
        self.sources.iter().any(|s| s != "api")
    }

    /// Whether every declared source is `api` (vacuously true when empty).
    pub fn all_sources_api(&self) -> bool {
        self.sources.iter().all(|s| s == "api")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: legacy scalar `source` promotes to a one-element `sources` list.
    #[test]
    fn legacy_source_promotion() {
        let c: InputConfig = serde_yaml::from_str("source: telephony").unwrap();
        assert_eq!(c.sources, vec!["telephony"]);
        assert_eq!(c.primary_source(), "telephony");

        let c: InputConfig = serde_yaml::from_str("source: api").unwrap();
        assert_eq!(c.sources, vec!["api"]);
        assert_eq!(c.primary_source(), "api");
    }

    #[test]
    fn sources_list_wins_over_legacy_scalar() {
        let c: InputConfig = serde_yaml::from_str("sources: [api, audio]\nsource: video").unwrap();
        assert_eq!(c.sources, vec!["api", "audio"]);
        assert_eq!(c.primary_source(), "audio");
    }

    #[test]
    fn membership_helpers() {
        let c: InputConfig = serde_yaml::from_str("sources: [api]").unwrap();
        assert!(c.has_source("api"));
        assert!(!c.has_non_api_source());
        assert!(c.all_sources_api());

        let c: InputConfig = serde_yaml::from_str("sources: [api, video]").unwrap();
        assert!(c.has_non_api_source());
        assert!(!c.all_sources_api());
    }

    /// **Scenario**: an empty document decodes with no errors and all zero values.
    #[test]
    fn empty_document() {
        let c: InputConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(c, InputConfig::default());
        assert!(c.all_sources_api());
    }

    #[test]
    fn roundtrip_emits_sources_not_source() {
        let c: InputConfig = serde_yaml::from_str("source: audio").unwrap();
        let y = serde_yaml::to_string(&c).unwrap();
        assert!(y.contains("sources"));
        assert!(!y.contains("source:") || y.contains("sources:"));
        let back: InputConfig = serde_yaml::from_str(&y).unwrap();
        assert_eq!(back, c);
    }
}
