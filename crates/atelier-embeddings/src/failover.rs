//! Provider failover: try the primary embedding provider, then fallbacks.
//!
//! Each slot counts consecutive failures; a slot over the limit is skipped
//! until its cool-down has elapsed. Vectors from different providers are
//! only interchangeable when they serve the same model: `ensure_serves`
//! refuses a chain with a member outside the model's space, and `embed`
//! never asks such a member.

use async_trait::async_trait;
use atelier_core::error::{AtelierError, Result};
use atelier_core::traits::provider::{EmbeddingProvider, ProviderEmbeddings};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

struct ProviderSlot {
    provider: Box<dyn EmbeddingProvider>,
    /// Consecutive failure count.
    failures: AtomicU32,
    /// Unix secs of the last failure (0 = never).
    last_failure: AtomicU64,
    max_failures: u32,
    cooldown_secs: u64,
}

impl ProviderSlot {
    fn new(provider: Box<dyn EmbeddingProvider>, max_failures: u32, cooldown_secs: u64) -> Self {
        Self {
            provider,
            failures: AtomicU32::new(0),
            last_failure: AtomicU64::new(0),
            max_failures,
            cooldown_secs,
        }
    }

    fn is_healthy_at(&self, now: u64) -> bool {
        if self.failures.load(Ordering::Relaxed) < self.max_failures {
            return true;
        }
        now.saturating_sub(self.last_failure.load(Ordering::Relaxed)) > self.cooldown_secs
    }

    fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.last_failure.store(now_secs(), Ordering::Relaxed);
    }
}

/// Failover chain; the first provider is primary.
pub struct FailoverProvider {
    slots: Vec<ProviderSlot>,
}

impl FailoverProvider {
    pub fn new(providers: Vec<Box<dyn EmbeddingProvider>>) -> Result<Self> {
        Self::with_limits(providers, 3, 60)
    }

    pub fn with_limits(
        providers: Vec<Box<dyn EmbeddingProvider>>,
        max_failures: u32,
        cooldown_secs: u64,
    ) -> Result<Self> {
        if providers.is_empty() {
            return Err(AtelierError::Config(
                "failover chain needs at least one provider".into(),
            ));
        }
        Ok(Self {
            slots: providers
                .into_iter()
                .map(|p| ProviderSlot::new(p, max_failures.max(1), cooldown_secs))
                .collect(),
        })
    }

    /// Fail unless every provider in the chain serves `model`.
    pub fn ensure_serves(&self, model: &str) -> Result<()> {
        match self.slots.iter().find(|s| !s.provider.supports_model(model)) {
            Some(slot) => Err(AtelierError::Config(format!(
                "failover chain would mix vector spaces: {} does not serve {model}",
                slot.provider.name()
            ))),
            None => Ok(()),
        }
    }

    pub fn chain_len(&self) -> usize {
        self.slots.len()
    }

    /// (name, healthy, consecutive failures) per slot.
    pub fn health_status(&self) -> Vec<(&str, bool, u32)> {
        let now = now_secs();
        self.slots
            .iter()
            .map(|s| {
                (
                    s.provider.name(),
                    s.is_healthy_at(now),
                    s.failures.load(Ordering::Relaxed),
                )
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for FailoverProvider {
    fn name(&self) -> &str {
        self.slots
            .first()
            .map(|s| s.provider.name())
            .unwrap_or("failover")
    }

    fn supports_model(&self, model: &str) -> bool {
        self.slots.iter().all(|s| s.provider.supports_model(model))
    }

    async fn embed(&self, texts: &[String], model: &str) -> Result<ProviderEmbeddings> {
        let mut last_error = None;
        let now = now_secs();

        for (idx, slot) in self.slots.iter().enumerate() {
            if !slot.provider.supports_model(model) {
                tracing::debug!(
                    "⏭️ Skipping embedding provider {}: does not serve {model}",
                    slot.provider.name()
                );
                continue;
            }
            if !slot.is_healthy_at(now) {
                tracing::debug!(
                    "⏭️ Skipping unhealthy embedding provider: {} ({} failures)",
                    slot.provider.name(),
                    slot.failures.load(Ordering::Relaxed)
                );
                continue;
            }

            match slot.provider.embed(texts, model).await {
                Ok(out) => {
                    if idx > 0 {
                        tracing::info!(
                            "🔄 Failover: {} → {} (success)",
                            self.name(),
                            slot.provider.name()
                        );
                    }
                    slot.record_success();
                    return Ok(out);
                }
                // Bad input fails the same way everywhere; don't burn the chain on it.
                Err(e) if !e.is_retryable() && !matches!(e, AtelierError::ApiKeyMissing(_)) => {
                    return Err(e);
                }
                Err(e) => {
                    slot.record_failure();
                    tracing::warn!(
                        "⚠️ Embedding provider {} failed ({} in a row): {}",
                        slot.provider.name(),
                        slot.failures.load(Ordering::Relaxed),
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        if last_error.is_none() && !self.slots.iter().any(|s| s.provider.supports_model(model)) {
            return Err(AtelierError::UnsupportedModel(model.to_string()));
        }
        Err(last_error
            .unwrap_or_else(|| AtelierError::Provider("All embedding providers unhealthy".into())))
    }

    async fn health_check(&self) -> bool {
        let now = now_secs();
        for slot in &self.slots {
            if slot.is_healthy_at(now) && slot.provider.health_check().await {
                return true;
            }
        }
        false
    }
}
