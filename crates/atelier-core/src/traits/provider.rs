//! Embedding provider trait: a remote (or local) text-to-vector API.

use async_trait::async_trait;

use crate::error::Result;

/// Raw provider output for one batched call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderEmbeddings {
    /// One vector per input text, in input order.
    pub vectors: Vec<Vec<f32>>,
    /// Tokens billed for the call.
    pub tokens_used: usize,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name (e.g. "openai", "ollama", "hashing").
    fn name(&self) -> &str;

    /// Whether vectors this provider returns for `model` lie in that model's
    /// own space. Providers in a failover chain must agree on this.
    fn supports_model(&self, _model: &str) -> bool {
        true
    }

    /// Embed every text with `model` in a single call.
    async fn embed(&self, texts: &[String], model: &str) -> Result<ProviderEmbeddings>;

    /// Whether the provider looks usable. Never errors for connectivity problems.
    async fn health_check(&self) -> bool;
}
