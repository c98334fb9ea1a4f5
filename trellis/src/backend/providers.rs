//! Chat provider table: base URLs, API-key environment variables, wire shape.

/// How a provider's chat endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireShape {
    /// OpenAI-compatible `/chat/completions`.
    OpenAi,
    /// Anthropic messages API (`x-api-key` + `anthropic-version` headers).
    Anthropic,
}

/// Static description of one chat backend.
#[derive(Debug, Clone, Copy)]
pub struct Provider {
    pub name: &'static str,
    pub base_url: &'static str,
    /// Environment variable consulted when `apiKey` is not configured.
    pub api_key_env: Option<&'static str>,
    pub shape: WireShape,
}

const PROVIDERS: [Provider; 10] = [
    Provider {
        name: "ollama",
        base_url: "http://localhost:11434/v1",
        api_key_env: None,
        shape: WireShape::OpenAi,
    },
    Provider {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        api_key_env: Some("OPENAI_API_KEY"),
        shape: WireShape::OpenAi,
    },
    Provider {
        name: "anthropic",
        base_url: "https://api.anthropic.com/v1",
        api_key_env: Some("ANTHROPIC_API_KEY"),
        shape: WireShape::Anthropic,
    },
    Provider {
        name: "google",
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
        api_key_env: Some("GOOGLE_API_KEY"),
        shape: WireShape::OpenAi,
    },
    Provider {
        name: "cohere",
        base_url: "https://api.cohere.ai/compatibility/v1",
        api_key_env: Some("COHERE_API_KEY"),
        shape: WireShape::OpenAi,
    },
    Provider {
        name: "mistral",
        base_url: "https://api.mistral.ai/v1",
        api_key_env: Some("MISTRAL_API_KEY"),
        shape: WireShape::OpenAi,
    },
    Provider {
        name: "together",
        base_url: "https://api.together.xyz/v1",
        api_key_env: Some("TOGETHER_API_KEY"),
        shape: WireShape::OpenAi,
    },
    Provider {
        name: "perplexity",
        base_url: "https://api.perplexity.ai",
        api_key_env: Some("PERPLEXITY_API_KEY"),
        shape: WireShape::OpenAi,
    },
    Provider {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        api_key_env: Some("GROQ_API_KEY"),
        shape: WireShape::OpenAi,
    },
    Provider {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        api_key_env: Some("DEEPSEEK_API_KEY"),
        shape: WireShape::OpenAi,
    },
];

/// Looks up a provider by backend name.
pub fn provider(name: &str) -> Option<&'static Provider> {
    PROVIDERS.iter().find(|p| p.name == name)
}
