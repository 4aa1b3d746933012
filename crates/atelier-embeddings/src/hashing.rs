//! Offline hashing provider: deterministic bag-of-words feature hashing.
//!
//! No network, no model weights. Words are lowercased, stop words dropped,
//! then each word is hashed (FNV-1a) into a signed bucket. The vector is
//! L2-normalised, so cosine similarity reduces to shared-vocabulary overlap.
//! Good enough for local operation, demos and deterministic tests.

use async_trait::async_trait;
use atelier_core::error::{AtelierError, Result};
use atelier_core::models::get_model;
use atelier_core::traits::provider::{EmbeddingProvider, ProviderEmbeddings};
use atelier_core::types::estimate_tokens;

pub const DEFAULT_DIMENSIONS: usize = 1024;

/// Registry provider name of the models this provider serves.
pub const PROVIDER_NAME: &str = "hashing";

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "for", "from", "had", "has", "have",
    "i", "in", "is", "it", "its", "me", "my", "of", "on", "or", "our", "so", "that", "the",
    "their", "this", "to", "too", "very", "was", "we", "were", "what", "with", "you",
];

/// Serves only the registry's `hashing` models; hashed vectors never stand
/// in for another model's.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashingProvider;

impl HashingProvider {
    pub fn new() -> Self {
        Self
    }

    /// Output width for `model`, or `UnsupportedModel` for anything that is
    /// not a hashing model.
    fn dimensions_for(&self, model: &str) -> Result<usize> {
        get_model(model)
            .filter(|m| m.provider == PROVIDER_NAME)
            .map(|m| m.dimensions)
            .ok_or_else(|| AtelierError::UnsupportedModel(format!("{model} (not a hashing model)")))
    }

    /// Embed one text into `dimensions` buckets.
    pub fn embed_text(&self, text: &str, dimensions: usize) -> Vec<f32> {
        let mut vector = vec![0.0f32; dimensions];
        for token in tokenize(text) {
            let h = fnv1a(&token);
            let bucket = (h % dimensions as u64) as usize;
            let sign = if h >> 63 == 1 { -1.0 } else { 1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(FNV_OFFSET, |h, b| (h ^ b as u64).wrapping_mul(FNV_PRIME))
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x3040..=0x30FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xAC00..=0xD7AF)
}

/// Lowercased content words. CJK runs are split per character.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        if word.chars().any(is_cjk) {
            tokens.extend(word.chars().map(|c| c.to_string()));
            continue;
        }
        let lower = word.to_lowercase();
        if !STOP_WORDS.contains(&lower.as_str()) {
            tokens.push(lower);
        }
    }
    tokens
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn name(&self) -> &str {
        "hashing"
    }

    fn supports_model(&self, model: &str) -> bool {
        self.dimensions_for(model).is_ok()
    }

    async fn embed(&self, texts: &[String], model: &str) -> Result<ProviderEmbeddings> {
        let dimensions = self.dimensions_for(model)?;
        Ok(ProviderEmbeddings {
            vectors: texts.iter().map(|t| self.embed_text(t, dimensions)).collect(),
            tokens_used: texts.iter().map(|t| estimate_tokens(t)).sum(),
        })
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_tokenize_drops_stop_words() {
        assert_eq!(
            tokenize("I loved the workshop pacing!"),
            vec!["loved", "workshop", "pacing"]
        );
        assert_eq!(tokenize("日本"), vec!["日", "本"]);
    }

    #[test]
    fn test_vectors_are_unit_length() {
        let p = HashingProvider::new();
        let v = p.embed_text("workshop feedback about pacing", 1024);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_words_raise_similarity() {
        let p = HashingProvider::new();
        let q = p.embed_text("workshop feedback about pacing", 1024);
        let a = p.embed_text("I loved the workshop pacing", 1024);
        let b = p.embed_text("The venue was too noisy", 1024);
        assert!((cosine(&q, &a) - 2.0 / 3.0).abs() < 1e-5);
        assert!(cosine(&q, &b).abs() < 1e-5);
    }

    #[test]
    fn test_stop_words_only_gives_zero_vector() {
        let v = HashingProvider::new().embed_text("the and of", 16);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_serves_hashing_models_only() {
        let p = HashingProvider::new();
        let out = p.embed(&["hello".to_string()], "local-hash-1024").await.unwrap();
        assert_eq!(out.vectors[0].len(), DEFAULT_DIMENSIONS);
        assert_eq!(out.tokens_used, 2);

        assert!(p.supports_model("local-hash-1024"));
        for model in ["nomic-embed-text", "text-embedding-3-small", "unregistered"] {
            assert!(!p.supports_model(model));
            let err = p.embed(&["hello".to_string()], model).await.unwrap_err();
            assert!(matches!(err, AtelierError::UnsupportedModel(_)), "{model}: {err}");
        }
    }
}
