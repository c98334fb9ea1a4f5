//! Chat action backend: provider dispatch over plain HTTP.
//!
//! All recognized providers speak the OpenAI-compatible chat-completions
//! shape except anthropic, which uses the messages API. The API key resolves
//! from the config field first, then from the provider's environment variable.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::app_error::{AppCode, AppError};
use crate::backend::providers::{provider, WireShape};
use crate::backend::{classify_reqwest, with_timeout};
use crate::config::ChatConfig;

/// Executes `chat` actions.
#[derive(Default)]
pub struct ChatBackend {
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct OpenAiCompletion {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicCompletion {
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(default)]
    text: Option<String>,
}

impl ChatBackend {
    /// Creates the backend with a default client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs one resolved chat config. Output is the assistant text, or the
    /// parsed JSON object when `jsonResponse` is set.
    pub async fn run(&self, cfg: &ChatConfig) -> Result<Value, AppError> {
        with_timeout(cfg.timeout_duration, self.execute(cfg)).await
    }

    async fn execute(&self, cfg: &ChatConfig) -> Result<Value, AppError> {
        let backend = cfg.get_backend();
        let p = provider(backend).ok_or_else(|| {
            AppError::new(
                AppCode::BadRequest,
                format!("unrecognized chat backend '{}'", backend),
            )
        })?;
        let base_url = cfg
            .base_url
            .clone()
            .unwrap_or_else(|| p.base_url.to_string());
        let api_key = cfg
            .api_key
            .clone()
            .or_else(|| p.api_key_env.and_then(|v| std::env::var(v).ok()));

        let text = match p.shape {
            WireShape::OpenAi => {
                self.call_openai(cfg, &base_url, api_key.as_deref()).await?
            }
            WireShape::Anthropic => {
                self.call_anthropic(cfg, &base_url, api_key.as_deref())
                    .await?
            }
        };

        if cfg.json_response {
            let parsed: Value = serde_json::from_str(&text).map_err(|e| {
                AppError::new(AppCode::ResourceFailed, "chat response is not valid json")
                    .with_error(e)
            })?;
            for key in &cfg.json_response_keys {
                if parsed.get(key).is_none() {
                    return Err(AppError::new(
                        AppCode::ResourceFailed,
                        format!("chat response is missing key '{}'", key),
                    )
                    .with_details("missingKey", key.clone()));
                }
            }
            return Ok(parsed);
        }
        Ok(Value::String(text))
    }

    async fn call_openai(
        &self,
        cfg: &ChatConfig,
        base_url: &str,
        api_key: Option<&str>,
    ) -> Result<String, AppError> {
        let mut body = json!({
            "model": cfg.model,
            "messages": build_messages(cfg),
        });
        // Unsupported knobs are dropped by the provider, not by us.
        forward(&mut body, "temperature", cfg.temperature.map(Value::from));
        forward(&mut body, "top_p", cfg.top_p.map(Value::from));
        forward(&mut body, "max_tokens", cfg.max_tokens.map(Value::from));
        forward(
            &mut body,
            "frequency_penalty",
            cfg.frequency_penalty.map(Value::from),
        );
        forward(
            &mut body,
            "presence_penalty",
            cfg.presence_penalty.map(Value::from),
        );
        if cfg.json_response {
            body["response_format"] = json!({ "type": "json_object" });
        }
        if !cfg.tools.is_empty() {
            body["tools"] = Value::Array(cfg.tools.clone());
        }

        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(classify_reqwest)?;
        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(classify_reqwest)?;
        if status >= 400 {
            return Err(chat_http_error(status, &text));
        }
        let completion: OpenAiCompletion = serde_json::from_str(&text).map_err(|e| {
            AppError::new(AppCode::ResourceFailed, "parse chat completion").with_error(e)
        })?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::new(AppCode::ResourceFailed, "chat completion has no content"))
    }

    async fn call_anthropic(
        &self,
        cfg: &ChatConfig,
        base_url: &str,
        api_key: Option<&str>,
    ) -> Result<String, AppError> {
        let messages: Vec<Value> = build_messages(cfg)
            .into_iter()
            .filter(|m| m["role"] != "system")
            .collect();
        let system: Vec<String> = build_messages(cfg)
            .into_iter()
            .filter(|m| m["role"] == "system")
            .filter_map(|m| m["content"].as_str().map(str::to_string))
            .collect();
        let mut body = json!({
            "model": cfg.model,
            "max_tokens": cfg.max_tokens.unwrap_or(1024),
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = Value::String(system.join("\n"));
        }
        forward(&mut body, "temperature", cfg.temperature.map(Value::from));
        forward(&mut body, "top_p", cfg.top_p.map(Value::from));

        let url = format!("{}/messages", base_url.trim_end_matches('/'));
        let mut req = self
            .client
            .post(&url)
            .header("anthropic-version", "2023-06-01")
            .json(&body);
        if let Some(key) = api_key {
            req = req.header("x-api-key", key);
        }
        let resp = req.send().await.map_err(classify_reqwest)?;
        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(classify_reqwest)?;
        if status >= 400 {
            return Err(chat_http_error(status, &text));
        }
        let completion: AnthropicCompletion = serde_json::from_str(&text).map_err(|e| {
            AppError::new(AppCode::ResourceFailed, "parse chat completion").with_error(e)
        })?;
        Ok(completion
            .content
            .into_iter()
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

/// The scenario turns are prepended as prior dialogue; `role` becomes the
/// system message; `prompt` is the final user message. A `jsonResponseKeys`
/// request also instructs the model about the exact keys.
fn build_messages(cfg: &ChatConfig) -> Vec<Value> {
    let mut messages = Vec::new();
    if !cfg.role.is_empty() {
        messages.push(json!({ "role": "system", "content": cfg.role }));
    }
    for turn in &cfg.scenario {
        let role = if turn.role.is_empty() { "user" } else { &turn.role };
        messages.push(json!({ "role": role, "content": turn.prompt }));
    }
    let mut prompt = cfg.prompt.clone();
    if cfg.json_response && !cfg.json_response_keys.is_empty() {
        prompt.push_str(&format!(
            "\n\nRespond with a JSON object containing exactly these keys: {}.",
            cfg.json_response_keys.join(", ")
        ));
    }
    messages.push(json!({ "role": "user", "content": prompt }));
    messages
}

fn forward(body: &mut Value, key: &str, value: Option<Value>) {
    if let Some(v) = value {
        body[key] = v;
    }
}

fn chat_http_error(status: u16, body: &str) -> AppError {
    let code = match status {
        401 => AppCode::Unauthorized,
        429 => AppCode::RateLimited,
        500..=599 => AppCode::ServiceUnavailable,
        _ => AppCode::ResourceFailed,
    };
    AppError::new(code, format!("chat provider returned {}", status))
        .with_details("status", status)
        .with_details("body", body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion_body(content: &str) -> Value {
        json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
    }

    fn cfg(base: &str, extra: &str) -> ChatConfig {
        serde_yaml::from_str(&format!(
            "model: test-model\nbackend: openai\nbaseUrl: {}\napiKey: k\n{}",
            base, extra
        ))
        .unwrap()
    }

    /// **Scenario**: role and scenario turns are prepended to the prompt as
    /// prior dialogue.
    #[tokio::test]
    async fn message_assembly() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "messages": [
                    { "role": "system", "content": "You are terse." },
                    { "role": "user", "content": "earlier question" },
                    { "role": "assistant", "content": "earlier answer" },
                    { "role": "user", "content": "Value is 1" },
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("hi")))
            .mount(&server)
            .await;

        let c = cfg(
            &server.uri(),
            "role: You are terse.\nprompt: Value is 1\nscenario:\n  - role: user\n    prompt: earlier question\n  - role: assistant\n    prompt: earlier answer",
        );
        let out = ChatBackend::new().run(&c).await.unwrap();
        assert_eq!(out, json!("hi"));
    }

    #[tokio::test]
    async fn sampling_params_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "temperature": 0.5,
                "max_tokens": 64,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
            .mount(&server)
            .await;
        let c = cfg(&server.uri(), "prompt: p\ntemperature: 0.5\nmaxTokens: 64");
        assert_eq!(ChatBackend::new().run(&c).await.unwrap(), json!("ok"));
    }

    /// **Scenario**: `jsonResponse` with `jsonResponseKeys` rejects a reply
    /// missing a required key.
    #[tokio::test]
    async fn json_response_key_enforcement() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body(r#"{"answer": "yes"}"#)),
            )
            .mount(&server)
            .await;

        let good = cfg(
            &server.uri(),
            "prompt: p\njsonResponse: true\njsonResponseKeys: [answer]",
        );
        assert_eq!(
            ChatBackend::new().run(&good).await.unwrap(),
            json!({"answer": "yes"})
        );

        let bad = cfg(
            &server.uri(),
            "prompt: p\njsonResponse: true\njsonResponseKeys: [answer, score]",
        );
        let err = ChatBackend::new().run(&bad).await.unwrap_err();
        assert_eq!(err.code(), AppCode::ResourceFailed);
        assert_eq!(err.detail("missingKey"), Some(&json!("score")));
    }

    #[tokio::test]
    async fn anthropic_wire_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "sk-test"))
            .and(header("anthropic-version", "2023-06-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{ "type": "text", "text": "claude says" }]
            })))
            .mount(&server)
            .await;
        let c: ChatConfig = serde_yaml::from_str(&format!(
            "model: m\nbackend: anthropic\nbaseUrl: {}\napiKey: sk-test\nprompt: p",
            server.uri()
        ))
        .unwrap();
        assert_eq!(
            ChatBackend::new().run(&c).await.unwrap(),
            json!("claude says")
        );
    }

    #[tokio::test]
    async fn provider_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        let err = ChatBackend::new()
            .run(&cfg(&server.uri(), "prompt: p"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), AppCode::RateLimited);
    }

    #[tokio::test]
    async fn unrecognized_backend_rejected() {
        let c: ChatConfig = serde_yaml::from_str("model: m\nbackend: watson\nprompt: p").unwrap();
        let err = ChatBackend::new().run(&c).await.unwrap_err();
        assert_eq!(err.code(), AppCode::BadRequest);
    }
}
