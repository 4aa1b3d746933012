//! # Atelier Embeddings
//!
//! Turns text into vectors for the retrieval pipeline.
//!
//! Every remote provider (OpenAI, Cohere, Mistral, Ollama, llama.cpp) speaks
//! the OpenAI `/embeddings` shape and is served by one `OpenAiCompatibleProvider`.
//! The `HashingProvider` runs fully offline and serves only its own models.
//! A comma-separated provider list builds a `FailoverProvider` chain, which
//! is refused unless every member serves the configured models.

pub mod cache;
pub mod failover;
pub mod generator;
pub mod hashing;
pub mod language;
pub mod openai_compatible;
pub mod provider_registry;

pub use cache::{EmbeddingCache, FifoCache, LruCache};
pub use generator::{BatchOptions, BatchProgress, EmbeddingGenerator, EmbeddingResult, GenerateOptions};

use atelier_core::config::EmbeddingConfig;
use atelier_core::error::{AtelierError, Result};
use atelier_core::traits::EmbeddingProvider;

/// Create a provider from configuration.
///
/// `config.provider` may be:
/// - `hashing` / `local`: offline feature hashing
/// - `custom:<url>`: any OpenAI-compatible endpoint
/// - a registry name or alias (`openai`, `ollama`, ...)
/// - a comma-separated list of the above, tried in order; every member must
///   serve `config.model` (and `config.multilingual_model` when set)
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    let name = config.provider.trim();
    if name.contains(',') {
        let chain = name
            .split(',')
            .map(|part| {
                let single = EmbeddingConfig {
                    provider: part.trim().to_string(),
                    ..config.clone()
                };
                create_provider(&single)
            })
            .collect::<Result<Vec<_>>>()?;
        let chain = failover::FailoverProvider::new(chain)?;
        chain.ensure_serves(&config.model)?;
        if let Some(multilingual) = &config.multilingual_model {
            chain.ensure_serves(multilingual)?;
        }
        return Ok(Box::new(chain));
    }

    match name {
        "hashing" | "local" => Ok(Box::new(hashing::HashingProvider::new())),

        other if other.starts_with("custom:") => Ok(Box::new(
            openai_compatible::OpenAiCompatibleProvider::custom(other, config)?,
        )),

        _ => {
            let registry = provider_registry::get_provider_endpoint(name)
                .ok_or_else(|| AtelierError::Config(format!("Unknown embedding provider: {name}")))?;
            Ok(Box::new(
                openai_compatible::OpenAiCompatibleProvider::from_registry(registry, config)?,
            ))
        }
    }
}

/// List all available provider names.
pub fn available_providers() -> Vec<&'static str> {
    let mut names = provider_registry::all_provider_names();
    names.push("hashing");
    names.push("custom");
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_known_providers() {
        assert_eq!(create_provider(&config("hashing")).unwrap().name(), "hashing");
        assert_eq!(create_provider(&config("ollama")).unwrap().name(), "ollama");
        assert_eq!(
            create_provider(&config("custom:http://localhost:9000/v1")).unwrap().name(),
            "custom"
        );
    }

    #[test]
    fn test_unknown_provider() {
        assert!(matches!(
            create_provider(&config("word2vec")),
            Err(AtelierError::Config(_))
        ));
    }

    #[test]
    fn test_failover_chain_from_list() {
        let chain = EmbeddingConfig {
            model: "nomic-embed-text".into(),
            ..config("ollama, custom:http://ollama-2:11434/v1")
        };
        let p = create_provider(&chain).unwrap();
        assert_eq!(p.name(), "ollama");
        assert!(p.supports_model("nomic-embed-text"));
    }

    #[test]
    fn test_failover_chain_refuses_mixed_models() {
        let mixed = EmbeddingConfig {
            model: "nomic-embed-text".into(),
            ..config("ollama, hashing")
        };
        assert!(matches!(create_provider(&mixed), Err(AtelierError::Config(_))));

        let multilingual = EmbeddingConfig {
            model: "nomic-embed-text".into(),
            multilingual_model: Some("embed-multilingual-v3.0".into()),
            ..config("ollama, custom:http://ollama-2:11434/v1")
        };
        assert!(matches!(create_provider(&multilingual), Err(AtelierError::Config(_))));
    }

    #[test]
    fn test_available_providers() {
        let names = available_providers();
        assert!(names.contains(&"openai"));
        assert!(names.contains(&"hashing"));
    }
}
