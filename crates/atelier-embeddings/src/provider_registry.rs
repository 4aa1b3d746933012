//! Provider registry: maps embedding provider names to endpoint configurations.
//!
//! Every remote provider speaks the OpenAI `/embeddings` wire shape, so one
//! `OpenAiCompatibleProvider` serves all of them; entries differ only in URL,
//! auth style and where the API key comes from.

/// How to attach auth credentials to requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// No authentication required (local servers).
    None,
}

/// Endpoint configuration for a single provider.
#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub name: &'static str,
    pub base_url: &'static str,
    /// Appended to `base_url` for embedding requests.
    pub embeddings_path: &'static str,
    /// Appended to `base_url` for the liveness check of local servers.
    pub models_path: &'static str,
    /// Environment variables tried in order for the API key.
    pub env_keys: &'static [&'static str],
    pub auth_style: AuthStyle,
    /// Environment variable that overrides the base URL (e.g. OLLAMA_HOST).
    pub base_url_env: Option<&'static str>,
}

// ─── Provider Definitions ────────────────────────────────────────────────────

static PROVIDERS: &[ProviderEndpoint] = &[
    ProviderEndpoint {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        embeddings_path: "/embeddings",
        models_path: "/models",
        env_keys: &["OPENAI_API_KEY"],
        auth_style: AuthStyle::Bearer,
        base_url_env: Some("OPENAI_BASE_URL"),
    },
    ProviderEndpoint {
        name: "cohere",
        base_url: "https://api.cohere.ai/compatibility/v1",
        embeddings_path: "/embeddings",
        models_path: "/models",
        env_keys: &["COHERE_API_KEY", "CO_API_KEY"],
        auth_style: AuthStyle::Bearer,
        base_url_env: None,
    },
    ProviderEndpoint {
        name: "mistral",
        base_url: "https://api.mistral.ai/v1",
        embeddings_path: "/embeddings",
        models_path: "/models",
        env_keys: &["MISTRAL_API_KEY"],
        auth_style: AuthStyle::Bearer,
        base_url_env: None,
    },
    ProviderEndpoint {
        name: "ollama",
        base_url: "http://localhost:11434/v1",
        embeddings_path: "/embeddings",
        models_path: "/models",
        env_keys: &[],
        auth_style: AuthStyle::None,
        base_url_env: Some("OLLAMA_HOST"),
    },
    ProviderEndpoint {
        name: "llamacpp",
        base_url: "http://localhost:8080/v1",
        embeddings_path: "/embeddings",
        models_path: "/models",
        env_keys: &[],
        auth_style: AuthStyle::None,
        base_url_env: Some("LLAMACPP_HOST"),
    },
];

/// Look up a provider endpoint by name or alias.
pub fn get_provider_endpoint(name: &str) -> Option<&'static ProviderEndpoint> {
    let lookup = match name {
        "azure-openai" | "open_ai" => "openai",
        "co" | "cohere-compat" => "cohere",
        "mistralai" => "mistral",
        "llama.cpp" | "llama-cpp" => "llamacpp",
        other => other,
    };
    PROVIDERS.iter().find(|p| p.name == lookup)
}

/// List all registered remote provider names.
pub fn all_provider_names() -> Vec<&'static str> {
    PROVIDERS.iter().map(|p| p.name).collect()
}
