//! Unified OpenAI-compatible embedding provider.
//!
//! Handles `POST {base}/embeddings` for every registered remote provider.
//! Providers are distinguished only by endpoint URL, auth style and API key.

use async_trait::async_trait;
use atelier_core::config::EmbeddingConfig;
use atelier_core::error::{AtelierError, Result};
use atelier_core::models;
use atelier_core::traits::provider::{EmbeddingProvider, ProviderEmbeddings};
use serde_json::{Value, json};

use crate::provider_registry::{AuthStyle, ProviderEndpoint};

pub struct OpenAiCompatibleProvider {
    name: String,
    api_key: String,
    base_url: String,
    embeddings_path: String,
    models_path: String,
    auth_style: AuthStyle,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    /// Create from a registry entry.
    ///
    /// Resolution order:
    /// - API key: `config.api_key` > env vars > empty
    /// - Base URL: `config.endpoint` > env override > registry default
    pub fn from_registry(registry: &ProviderEndpoint, config: &EmbeddingConfig) -> Result<Self> {
        let api_key = if !config.api_key.is_empty() {
            config.api_key.clone()
        } else {
            registry
                .env_keys
                .iter()
                .find_map(|key| std::env::var(key).ok())
                .unwrap_or_default()
        };

        let base_url = if !config.endpoint.is_empty() {
            config.endpoint.trim_end_matches('/').to_string()
        } else {
            registry
                .base_url_env
                .and_then(|env_key| std::env::var(env_key).ok())
                .map(|val| with_v1_suffix(&val))
                .unwrap_or_else(|| registry.base_url.to_string())
        };

        Ok(Self {
            name: registry.name.to_string(),
            api_key,
            base_url,
            embeddings_path: registry.embeddings_path.to_string(),
            models_path: registry.models_path.to_string(),
            auth_style: registry.auth_style,
            client: reqwest::Client::new(),
        })
    }

    /// Create for a custom endpoint (e.g. "custom:https://embed.internal/v1").
    pub fn custom(endpoint: &str, config: &EmbeddingConfig) -> Result<Self> {
        let base_url = endpoint
            .strip_prefix("custom:")
            .unwrap_or(endpoint)
            .trim_end_matches('/')
            .to_string();
        if base_url.is_empty() {
            return Err(AtelierError::Config("custom provider needs a URL".into()));
        }

        let api_key = if !config.api_key.is_empty() {
            config.api_key.clone()
        } else {
            std::env::var("CUSTOM_EMBEDDING_API_KEY").unwrap_or_default()
        };
        let auth_style = if api_key.is_empty() {
            AuthStyle::None
        } else {
            AuthStyle::Bearer
        };

        Ok(Self {
            name: "custom".to_string(),
            api_key,
            base_url,
            embeddings_path: "/embeddings".to_string(),
            models_path: "/models".to_string(),
            auth_style,
            client: reqwest::Client::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_style {
            AuthStyle::Bearer if !self.api_key.is_empty() => {
                req.header("Authorization", format!("Bearer {}", self.api_key))
            }
            _ => req,
        }
    }
}

/// OLLAMA_HOST and friends are usually given without the `/v1` suffix.
fn with_v1_suffix(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

/// Parse an OpenAI-shaped embeddings response, restoring input order.
pub(crate) fn parse_embeddings_response(json: &Value, expected: usize) -> Result<ProviderEmbeddings> {
    let data = json["data"]
        .as_array()
        .ok_or_else(|| AtelierError::Provider("No data in embeddings response".into()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item["index"].as_u64().map(|i| i as usize).unwrap_or(pos);
        let vector = item["embedding"]
            .as_array()
            .ok_or_else(|| AtelierError::Provider(format!("Item {index} has no embedding")))?
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| AtelierError::Provider(format!("Item {index} has non-numeric values")))?;
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(i, _)| *i);

    if indexed.len() != expected {
        return Err(AtelierError::Provider(format!(
            "Expected {expected} embeddings, got {}",
            indexed.len()
        )));
    }

    let tokens_used = json["usage"]["prompt_tokens"]
        .as_u64()
        .or_else(|| json["usage"]["total_tokens"].as_u64())
        .unwrap_or(0) as usize;

    Ok(ProviderEmbeddings {
        vectors: indexed.into_iter().map(|(_, v)| v).collect(),
        tokens_used,
    })
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_model(&self, model: &str) -> bool {
        // Custom and llama.cpp endpoints serve whatever they were started with.
        if models::models_for_provider(&self.name).is_empty() {
            return true;
        }
        models::get_model(model).is_none_or(|m| m.provider == self.name)
    }

    async fn embed(&self, texts: &[String], model: &str) -> Result<ProviderEmbeddings> {
        if self.auth_style != AuthStyle::None && self.api_key.is_empty() {
            return Err(AtelierError::ApiKeyMissing(self.name.clone()));
        }
        if texts.is_empty() {
            return Ok(ProviderEmbeddings::default());
        }

        let body = json!({
            "model": model,
            "input": texts,
            "encoding_format": "float",
        });

        let url = format!("{}{}", self.base_url, self.embeddings_path);
        let req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        let req = self.apply_auth(req);

        let resp = req.send().await.map_err(|e| {
            AtelierError::Http(format!("{} connection failed ({}): {}", self.name, url, e))
        })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            // Rate limits and server faults are transient; anything else is the caller's problem.
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                AtelierError::Provider(format!("{} API error {}: {}", self.name, status, text))
            } else if status.as_u16() == 401 || status.as_u16() == 403 {
                AtelierError::ApiKeyMissing(format!("{} rejected credentials: {}", self.name, text))
            } else {
                AtelierError::InvalidInput(format!("{} API error {}: {}", self.name, status, text))
            });
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| AtelierError::Http(e.to_string()))?;

        tracing::debug!("📐 {} embedded {} texts with {}", self.name, texts.len(), model);
        parse_embeddings_response(&json, texts.len())
    }

    async fn health_check(&self) -> bool {
        if self.auth_style != AuthStyle::None {
            // Cloud providers: a configured key is the best cheap signal.
            return !self.api_key.is_empty();
        }

        let url = format!("{}{}", self.base_url, self.models_path);
        matches!(self.client.get(&url).send().await, Ok(r) if r.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider_registry::get_provider_endpoint;

    #[test]
    fn test_parse_restores_order() {
        let json = json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ],
            "usage": {"prompt_tokens": 7, "total_tokens": 7}
        });
        let parsed = parse_embeddings_response(&json, 2).unwrap();
        assert_eq!(parsed.vectors[0], vec![1.0, 0.0]);
        assert_eq!(parsed.vectors[1], vec![0.0, 1.0]);
        assert_eq!(parsed.tokens_used, 7);
    }

    #[test]
    fn test_parse_rejects_short_response() {
        let json = json!({"data": [{"index": 0, "embedding": [1.0]}]});
        assert!(matches!(
            parse_embeddings_response(&json, 2),
            Err(AtelierError::Provider(_))
        ));
    }

    #[test]
    fn test_custom_endpoint() {
        let p = OpenAiCompatibleProvider::custom(
            "custom:http://embed.local:9000/v1/",
            &EmbeddingConfig::default(),
        )
        .unwrap();
        assert_eq!(p.name(), "custom");
        assert_eq!(p.base_url(), "http://embed.local:9000/v1");
        assert!(p.supports_model("nomic-embed-text"));
    }

    #[test]
    fn test_registry_provider_serves_own_models() {
        let config = EmbeddingConfig::default();
        let ollama = get_provider_endpoint("ollama").unwrap();
        let p = OpenAiCompatibleProvider::from_registry(ollama, &config).unwrap();
        assert!(p.supports_model("nomic-embed-text"));
        assert!(!p.supports_model("text-embedding-3-small"));
        assert!(!p.supports_model("local-hash-1024"));

        let llamacpp = get_provider_endpoint("llamacpp").unwrap();
        let p = OpenAiCompatibleProvider::from_registry(llamacpp, &config).unwrap();
        assert!(p.supports_model("nomic-embed-text"));
    }

    #[test]
    fn test_config_endpoint_overrides_registry() {
        let config = EmbeddingConfig {
            endpoint: "http://gpu-box:11434/v1".into(),
            ..Default::default()
        };
        let p = OpenAiCompatibleProvider::from_registry(
            get_provider_endpoint("ollama").unwrap(),
            &config,
        )
        .unwrap();
        assert_eq!(p.base_url(), "http://gpu-box:11434/v1");
    }

    #[test]
    fn test_v1_suffix() {
        assert_eq!(with_v1_suffix("http://localhost:11434"), "http://localhost:11434/v1");
        assert_eq!(with_v1_suffix("http://localhost:11434/v1/"), "http://localhost:11434/v1");
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_request() {
        let config = EmbeddingConfig {
            api_key: String::new(),
            ..Default::default()
        };
        let mut p = OpenAiCompatibleProvider::from_registry(
            get_provider_endpoint("cohere").unwrap(),
            &config,
        )
        .unwrap();
        p.api_key.clear();
        let err = p
            .embed(&["hi".to_string()], "embed-english-v3.0")
            .await
            .unwrap_err();
        assert!(matches!(err, AtelierError::ApiKeyMissing(_)));
        assert!(!p.health_check().await);
    }
}
