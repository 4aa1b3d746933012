//! Embedding model registry: static descriptors for every supported model.
//!
//! Dimensionality is fixed per model and must match the vector column width
//! of any store that holds its vectors.

use serde::Serialize;

use crate::error::{AtelierError, Result};
use crate::types::estimate_tokens;

/// Immutable description of one embedding model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingModel {
    /// Model identifier sent to the provider.
    pub name: &'static str,
    /// Provider that serves it (matches the provider endpoint registry).
    pub provider: &'static str,
    pub dimensions: usize,
    pub max_input_tokens: usize,
    /// USD per 1,000 input tokens.
    pub cost_per_1k_tokens: f64,
    /// ISO 639-1 tags the model is trained for.
    pub languages: &'static [&'static str],
}

impl EmbeddingModel {
    pub fn supports_language(&self, language: &str) -> bool {
        self.languages.contains(&language)
    }

    pub fn cost_for_tokens(&self, tokens: usize) -> f64 {
        tokens as f64 / 1000.0 * self.cost_per_1k_tokens
    }
}

/// Token and cost estimate for a set of texts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostEstimate {
    pub model: String,
    pub tokens: usize,
    pub cost: f64,
}

// ─── Model Definitions ───────────────────────────────────────────────────────

const MULTILINGUAL: &[&str] = &[
    "en", "de", "fr", "es", "it", "pt", "nl", "pl", "sv", "da", "no", "fi", "tr", "ru", "uk", "ar",
    "he", "hi", "zh", "ja", "ko", "vi", "th", "el", "cs", "ro", "hu", "id",
];

const ENGLISH_ONLY: &[&str] = &["en"];

const EUROPEAN: &[&str] = &["en", "de", "fr", "es", "it", "pt", "nl"];

static MODELS: &[EmbeddingModel] = &[
    EmbeddingModel {
        name: "text-embedding-3-small",
        provider: "openai",
        dimensions: 1536,
        max_input_tokens: 8191,
        cost_per_1k_tokens: 0.00002,
        languages: MULTILINGUAL,
    },
    EmbeddingModel {
        name: "text-embedding-3-large",
        provider: "openai",
        dimensions: 3072,
        max_input_tokens: 8191,
        cost_per_1k_tokens: 0.00013,
        languages: MULTILINGUAL,
    },
    EmbeddingModel {
        name: "text-embedding-ada-002",
        provider: "openai",
        dimensions: 1536,
        max_input_tokens: 8191,
        cost_per_1k_tokens: 0.0001,
        languages: ENGLISH_ONLY,
    },
    EmbeddingModel {
        name: "embed-multilingual-v3.0",
        provider: "cohere",
        dimensions: 1024,
        max_input_tokens: 512,
        cost_per_1k_tokens: 0.0001,
        languages: MULTILINGUAL,
    },
    EmbeddingModel {
        name: "embed-english-v3.0",
        provider: "cohere",
        dimensions: 1024,
        max_input_tokens: 512,
        cost_per_1k_tokens: 0.0001,
        languages: ENGLISH_ONLY,
    },
    EmbeddingModel {
        name: "mistral-embed",
        provider: "mistral",
        dimensions: 1024,
        max_input_tokens: 8192,
        cost_per_1k_tokens: 0.0001,
        languages: EUROPEAN,
    },
    EmbeddingModel {
        name: "nomic-embed-text",
        provider: "ollama",
        dimensions: 768,
        max_input_tokens: 8192,
        cost_per_1k_tokens: 0.0,
        languages: ENGLISH_ONLY,
    },
    EmbeddingModel {
        name: "local-hash-1024",
        provider: "hashing",
        dimensions: 1024,
        max_input_tokens: 8192,
        cost_per_1k_tokens: 0.0,
        languages: MULTILINGUAL,
    },
];

/// Look up a model descriptor by name.
pub fn get_model(name: &str) -> Option<&'static EmbeddingModel> {
    MODELS.iter().find(|m| m.name == name)
}

/// Look up a model or fail with `UnsupportedModel`.
pub fn require_model(name: &str) -> Result<&'static EmbeddingModel> {
    get_model(name).ok_or_else(|| AtelierError::UnsupportedModel(name.to_string()))
}

/// All registered models.
pub fn all_models() -> &'static [EmbeddingModel] {
    MODELS
}

/// Models served by the given provider.
pub fn models_for_provider(provider: &str) -> Vec<&'static EmbeddingModel> {
    MODELS.iter().filter(|m| m.provider == provider).collect()
}

/// Estimate tokens and cost for embedding `texts` with `model`.
pub fn calculate_cost<S: AsRef<str>>(texts: &[S], model: &str) -> Result<CostEstimate> {
    let descriptor = require_model(model)?;
    let tokens: usize = texts.iter().map(|t| estimate_tokens(t.as_ref())).sum();
    Ok(CostEstimate {
        model: descriptor.name.to_string(),
        tokens,
        cost: descriptor.cost_for_tokens(tokens),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_cost_small_model() {
        let estimate = calculate_cost(&["hello"], "text-embedding-3-small").unwrap();
        assert_eq!(estimate.tokens, 2);
        assert!((estimate.cost - 2.0 / 1000.0 * 0.00002).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_model() {
        assert!(matches!(
            calculate_cost(&["hello"], "gpt-embed-99"),
            Err(AtelierError::UnsupportedModel(_))
        ));
    }

    #[test]
    fn test_registry_lookup() {
        let m = get_model("text-embedding-3-large").unwrap();
        assert_eq!(m.dimensions, 3072);
        assert!(m.supports_language("ja"));
        assert!(!get_model("text-embedding-ada-002").unwrap().supports_language("de"));
        assert_eq!(models_for_provider("cohere").len(), 2);
    }

    #[test]
    fn test_unique_names() {
        let mut names: Vec<_> = all_models().iter().map(|m| m.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), all_models().len());
    }
}
