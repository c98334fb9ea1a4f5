//! LLM chat action configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::decode;
use crate::expr::Expression;

/// Context window applied when `contextLength` is unset.
pub const DEFAULT_CONTEXT_LENGTH: u32 = 4096;

/// Backends the chat action dispatches to. `ollama` is the local default;
/// the rest are online providers.
pub const RECOGNIZED_BACKENDS: [&str; 10] = [
    "ollama",
    "openai",
    "anthropic",
    "google",
    "cohere",
    "mistral",
    "together",
    "perplexity",
    "groq",
    "deepseek",
];

/// Context lengths the config recognizes as model-native token counts.
pub const RECOGNIZED_CONTEXT_LENGTHS: [u32; 7] =
    [4096, 8192, 16384, 32768, 65536, 131072, 262144];

/// One prior turn prepended to the prompt as dialogue history.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioTurn {
    /// `system`, `user`, or `assistant`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prompt: String,
}

/// Chat action: model, backend, prompt assembly, sampling knobs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(deserialize_with = "decode::flex_u32_opt", skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scenario: Vec<ScenarioTurn>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(deserialize_with = "decode::flex_bool", skip_serializing_if = "std::ops::Not::not")]
    pub json_response: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub json_response_keys: Vec<String>,
    #[serde(
        alias = "timeout",
        deserialize_with = "decode::flex_duration_opt",
        serialize_with = "decode::duration_opt_to_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_duration: Option<Duration>,
    #[serde(deserialize_with = "decode::flex_f64_opt", skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(deserialize_with = "decode::flex_u32_opt", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(deserialize_with = "decode::flex_f64_opt", skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(deserialize_with = "decode::flex_f64_opt", skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(deserialize_with = "decode::flex_f64_opt", skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
}

impl ChatConfig {
    /// The backend name, defaulting to `ollama`.
    pub fn get_backend(&self) -> &str {
        if self.backend.is_empty() {
            "ollama"
        } else {
            &self.backend
        }
    }

    /// Context length, defaulting to 4096.
    pub fn get_context_length(&self) -> u32 {
        self.context_length.unwrap_or(DEFAULT_CONTEXT_LENGTH)
    }

    /// Whether the backend name is one the dispatcher recognizes.
    pub fn backend_recognized(&self) -> bool {
        RECOGNIZED_BACKENDS.contains(&self.get_backend())
    }

    /// The prompt as an expression (it may interpolate prior outputs).
    pub fn prompt_expr(&self) -> Expression {
        Expression::from(self.prompt.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_default_and_recognition() {
        let c = ChatConfig::default();
        assert_eq!(c.get_backend(), "ollama");
        assert!(c.backend_recognized());

        let c: ChatConfig = serde_yaml::from_str("backend: openai").unwrap();
        assert!(c.backend_recognized());
        let c: ChatConfig = serde_yaml::from_str("backend: watson").unwrap();
        assert!(!c.backend_recognized());
    }

    /// **Scenario**: `timeout` is an accepted alias for `timeoutDuration`.
    #[test]
    fn timeout_alias() {
        let c: ChatConfig = serde_yaml::from_str("timeout: 45s").unwrap();
        assert_eq!(c.timeout_duration, Some(Duration::from_secs(45)));
        let c: ChatConfig = serde_yaml::from_str("timeoutDuration: 2m").unwrap();
        assert_eq!(c.timeout_duration, Some(Duration::from_secs(120)));
    }

    #[test]
    fn context_length_string_form() {
        let c: ChatConfig = serde_yaml::from_str("contextLength: \"8192\"").unwrap();
        assert_eq!(c.get_context_length(), 8192);
        assert!(RECOGNIZED_CONTEXT_LENGTHS.contains(&c.get_context_length()));
        let c: ChatConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(c.get_context_length(), DEFAULT_CONTEXT_LENGTH);
    }

    #[test]
    fn sampling_knobs_decode() {
        let c: ChatConfig = serde_yaml::from_str(
            "temperature: \"0.7\"\ntopP: 0.9\nmaxTokens: \"512\"\nfrequencyPenalty: -1.5",
        )
        .unwrap();
        assert_eq!(c.temperature, Some(0.7));
        assert_eq!(c.top_p, Some(0.9));
        assert_eq!(c.max_tokens, Some(512));
        assert_eq!(c.frequency_penalty, Some(-1.5));
    }

    #[test]
    fn roundtrip_emits_timeout_duration() {
        let c: ChatConfig =
            serde_yaml::from_str("model: llama3\ntimeout: 30s\njsonResponse: \"yes\"").unwrap();
        let y = serde_yaml::to_string(&c).unwrap();
        assert!(y.contains("timeoutDuration"));
        let back: ChatConfig = serde_yaml::from_str(&y).unwrap();
        assert_eq!(back, c);
    }
}
