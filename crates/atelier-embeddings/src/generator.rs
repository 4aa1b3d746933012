//! Embedding generator: text in, vectors out.
//!
//! Wraps an [`EmbeddingProvider`] with language detection, model selection,
//! a cache consulted before any provider call, batching with per-batch
//! retries and timeouts, and cost and confidence bookkeeping.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use atelier_core::config::EmbeddingConfig;
use atelier_core::error::{AtelierError, Result};
use atelier_core::models::{self, CostEstimate, EmbeddingModel};
use atelier_core::retry::{RetryFailure, RetryPolicy, Sleeper, TokioSleeper, retry};
use atelier_core::traits::provider::EmbeddingProvider;
use atelier_core::types::estimate_tokens;
use serde::Serialize;

use crate::cache::{CacheEntry, CacheKey, CacheStats, EmbeddingCache, create_cache};
use crate::language::{DEFAULT_LANGUAGE, LanguageDetection, detect_language, preprocess};

/// Options for a single embedding.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Registered model name; picked by language when unset.
    pub model: Option<String>,
    /// Known language tag; skips detection when set.
    pub language: Option<String>,
    /// Overrides the configured detection switch.
    pub detect_language: Option<bool>,
}

impl GenerateOptions {
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Default::default()
        }
    }
}

/// Cumulative batch progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
}

pub type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Options for a batch. Unset fields fall back to the generator's config.
#[derive(Clone, Default)]
pub struct BatchOptions {
    pub model: Option<String>,
    pub language: Option<String>,
    pub batch_size: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub timeout: Option<Duration>,
    pub on_progress: Option<ProgressCallback>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingResult {
    pub vector: Vec<f32>,
    pub model: String,
    pub dimensions: usize,
    pub tokens: usize,
    pub cost: f64,
    pub processing_time: Duration,
    /// Heuristic quality signal in 0.0 ..= 1.0.
    pub confidence: f32,
    pub language: String,
    pub language_confidence: f32,
    /// Served from cache without a provider call.
    pub cached: bool,
}

/// One text ready to embed: language resolved, model chosen, key computed.
struct Prepared {
    text: String,
    language: LanguageDetection,
    model: &'static EmbeddingModel,
    key: CacheKey,
    tokens: usize,
}

pub struct EmbeddingGenerator {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Option<Arc<dyn EmbeddingCache>>,
    sleeper: Arc<dyn Sleeper>,
    config: EmbeddingConfig,
}

impl EmbeddingGenerator {
    /// Build with the cache described by `config.cache` and a real clock.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: EmbeddingConfig) -> Self {
        Self {
            provider,
            cache: create_cache(&config.cache),
            sleeper: Arc::new(TokioSleeper),
            config,
        }
    }

    pub fn with_cache(mut self, cache: Option<Arc<dyn EmbeddingCache>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Model used for `language` when the caller names none.
    pub fn select_model(&self, language: &str) -> Result<&'static EmbeddingModel> {
        let default = models::require_model(&self.config.model)?;
        if default.supports_language(language) {
            return Ok(default);
        }
        if let Some(name) = &self.config.multilingual_model {
            let multilingual = models::require_model(name)?;
            if multilingual.supports_language(language) {
                tracing::debug!(
                    "🌐 '{language}' not covered by {}, using {}",
                    default.name,
                    multilingual.name
                );
                return Ok(multilingual);
            }
        }
        Ok(default)
    }

    pub fn detect_language(&self, text: &str) -> LanguageDetection {
        detect_language(text)
    }

    pub fn calculate_cost<S: AsRef<str>>(&self, texts: &[S], model: Option<&str>) -> Result<CostEstimate> {
        models::calculate_cost(texts, model.unwrap_or(&self.config.model))
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    pub async fn health_check(&self) -> bool {
        self.provider.health_check().await
    }

    fn prepare(
        &self,
        text: &str,
        model: Option<&str>,
        language: Option<&str>,
        detect: bool,
    ) -> Result<Prepared> {
        if text.trim().is_empty() {
            return Err(AtelierError::invalid("text to embed must not be empty"));
        }

        let language = match language {
            Some(tag) if !tag.trim().is_empty() => LanguageDetection {
                language: tag.trim().to_ascii_lowercase(),
                confidence: 1.0,
            },
            _ if detect => detect_language(text),
            _ => LanguageDetection {
                language: DEFAULT_LANGUAGE.to_string(),
                confidence: 0.0,
            },
        };

        let model = match model {
            Some(name) => models::require_model(name)?,
            None => self.select_model(&language.language)?,
        };

        let text = preprocess(text, &language.language);
        let tokens = estimate_tokens(&text);
        if tokens > model.max_input_tokens {
            tracing::warn!(
                "⚠️ Input of ~{tokens} tokens exceeds {}'s limit of {}; the provider may truncate it",
                model.name,
                model.max_input_tokens
            );
        }

        let key = CacheKey::new(&text, model.name);
        Ok(Prepared {
            text,
            language,
            model,
            key,
            tokens,
        })
    }

    fn from_cache(&self, item: &Prepared, started: Instant) -> Option<EmbeddingResult> {
        let entry = self.cache.as_ref()?.get(&item.key)?;
        tracing::debug!("💾 Embedding cache hit ({})", item.model.name);
        Some(self.assemble(item, entry.vector, entry.tokens, entry.cost, started, true))
    }

    fn store_in_cache(&self, item: &Prepared, result: &EmbeddingResult) {
        if let Some(cache) = &self.cache {
            let ttl = (self.config.cache.ttl_secs > 0)
                .then(|| chrono::Duration::seconds(self.config.cache.ttl_secs as i64));
            cache.put(
                item.key.clone(),
                CacheEntry::new(result.vector.clone(), result.tokens, result.cost, ttl),
            );
            cache.evict_expired();
        }
    }

    fn assemble(
        &self,
        item: &Prepared,
        vector: Vec<f32>,
        tokens: usize,
        cost: f64,
        started: Instant,
        cached: bool,
    ) -> EmbeddingResult {
        let confidence = confidence_score(&item.text, &vector, item.model, &item.language.language);
        EmbeddingResult {
            dimensions: vector.len(),
            vector,
            model: item.model.name.to_string(),
            tokens,
            cost,
            processing_time: started.elapsed(),
            confidence,
            language: item.language.language.clone(),
            language_confidence: item.language.confidence,
            cached,
        }
    }

    /// One provider call for `texts`, raced against `timeout` and retried per `policy`.
    async fn call_provider(
        &self,
        texts: &[String],
        model: &'static EmbeddingModel,
        policy: &RetryPolicy,
        timeout: Duration,
        label: &str,
    ) -> std::result::Result<(Vec<Vec<f32>>, usize), RetryFailure> {
        let provider = self.provider.clone();
        retry(policy, self.sleeper.as_ref(), label, |_| {
            let provider = provider.clone();
            async move {
                let out = tokio::time::timeout(timeout, provider.embed(texts, model.name))
                    .await
                    .map_err(|_| AtelierError::Timeout(timeout.as_millis() as u64))??;
                if out.vectors.len() != texts.len() {
                    return Err(AtelierError::Provider(format!(
                        "{} returned {} vectors for {} texts",
                        provider.name(),
                        out.vectors.len(),
                        texts.len()
                    )));
                }
                if let Some(bad) = out.vectors.iter().find(|v| v.len() != model.dimensions) {
                    return Err(AtelierError::DimensionMismatch {
                        model: model.name.to_string(),
                        expected: model.dimensions,
                        actual: bad.len(),
                    });
                }
                Ok((out.vectors, out.tokens_used))
            }
        })
        .await
    }

    /// Embed one text. Served from cache when (text, model) was seen before.
    pub async fn generate(&self, text: &str, options: &GenerateOptions) -> Result<EmbeddingResult> {
        let started = Instant::now();
        let detect = options.detect_language.unwrap_or(self.config.detect_language);
        let item = self.prepare(
            text,
            options.model.as_deref(),
            options.language.as_deref(),
            detect,
        )?;

        if let Some(hit) = self.from_cache(&item, started) {
            return Ok(hit);
        }

        let (mut vectors, tokens_used) = self
            .call_provider(
                std::slice::from_ref(&item.text),
                item.model,
                &self.config.retry_policy(),
                self.config.timeout(),
                "embedding",
            )
            .await
            .map_err(|f| {
                if f.error.is_retryable() {
                    batch_failure(f, 0, 1, 0)
                } else {
                    f.error
                }
            })?;

        let vector = vectors.pop().unwrap_or_default();
        let tokens = if tokens_used > 0 { tokens_used } else { item.tokens };
        let cost = item.model.cost_for_tokens(tokens);
        let result = self.assemble(&item, vector, tokens, cost, started, false);
        self.store_in_cache(&item, &result);
        Ok(result)
    }

    /// Embed many texts in fixed-size batches.
    ///
    /// Within a batch only cache misses reach the provider, grouped per model
    /// into single calls. A failing batch is retried as a unit; once retries
    /// are exhausted the error names the batch and earlier batches stay cached.
    pub async fn generate_batch<S: AsRef<str>>(
        &self,
        texts: &[S],
        options: &BatchOptions,
    ) -> Result<Vec<EmbeddingResult>> {
        let total = texts.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        if let Some(idx) = texts.iter().position(|t| t.as_ref().trim().is_empty()) {
            return Err(AtelierError::invalid(format!("text at index {idx} is empty")));
        }

        let batch_size = options.batch_size.unwrap_or(self.config.batch_size).max(1);
        let policy = RetryPolicy::new(
            options.max_retries.unwrap_or(self.config.max_retries),
            options
                .retry_delay
                .unwrap_or(Duration::from_millis(self.config.retry_delay_ms)),
        );
        let timeout = options.timeout.unwrap_or(self.config.timeout());
        let report = |completed: usize| {
            if let Some(cb) = &options.on_progress {
                cb(BatchProgress { completed, total });
            }
        };

        let mut results = Vec::with_capacity(total);
        let mut completed = 0;
        report(0);

        for (batch_index, chunk) in texts.chunks(batch_size).enumerate() {
            if batch_index > 0 {
                self.sleeper.sleep(self.config.inter_batch_delay()).await;
            }
            let started = Instant::now();

            let prepared = chunk
                .iter()
                .map(|t| {
                    self.prepare(
                        t.as_ref(),
                        options.model.as_deref(),
                        options.language.as_deref(),
                        self.config.detect_language,
                    )
                })
                .collect::<Result<Vec<_>>>()?;

            let mut slots: Vec<Option<EmbeddingResult>> =
                prepared.iter().map(|p| self.from_cache(p, started)).collect();

            let mut misses: BTreeMap<&'static str, Vec<usize>> = BTreeMap::new();
            for (i, slot) in slots.iter().enumerate() {
                if slot.is_none() {
                    misses.entry(prepared[i].model.name).or_default().push(i);
                }
            }

            for indices in misses.values() {
                let model = prepared[indices[0]].model;
                let inputs: Vec<String> = indices.iter().map(|&i| prepared[i].text.clone()).collect();
                let label = format!("embedding batch {batch_index}");
                let (vectors, _) = self
                    .call_provider(&inputs, model, &policy, timeout, &label)
                    .await
                    .map_err(|f| batch_failure(f, batch_index, chunk.len(), completed))?;

                for (&i, vector) in indices.iter().zip(vectors) {
                    let item = &prepared[i];
                    let cost = model.cost_for_tokens(item.tokens);
                    let result = self.assemble(item, vector, item.tokens, cost, started, false);
                    self.store_in_cache(item, &result);
                    slots[i] = Some(result);
                }
            }

            let hits = chunk.len() - misses.values().map(Vec::len).sum::<usize>();
            results.extend(slots.into_iter().flatten());
            completed += chunk.len();
            tracing::debug!(
                "📦 Batch {batch_index}: {} items ({hits} cached), {completed}/{total} done",
                chunk.len()
            );
            report(completed);
        }

        tracing::info!("✅ Embedded {total} texts via {}", self.provider.name());
        Ok(results)
    }
}

/// Exhausted retries become `EmbeddingGenerationFailed`. Anything else keeps
/// its kind inside `BatchFailed` so the caller still learns where to resume.
fn batch_failure(
    failure: RetryFailure,
    batch_index: usize,
    item_count: usize,
    completed: usize,
) -> AtelierError {
    if !failure.error.is_retryable() {
        tracing::warn!("❌ Embedding batch {batch_index} rejected: {}", failure.error);
        return AtelierError::BatchFailed {
            operation: "embedding".into(),
            batch_index,
            item_count,
            completed,
            source: Box::new(failure.error),
        };
    }
    tracing::warn!(
        "❌ Embedding batch {batch_index} failed after {} attempts: {}",
        failure.attempts,
        failure.error
    );
    AtelierError::EmbeddingGenerationFailed {
        batch_index,
        item_count,
        completed,
        attempts: failure.attempts,
        message: failure.error.to_string(),
    }
}

/// Best-effort quality signal: base 0.5, up to +0.2 for longer text,
/// up to +0.2 for a well-spread vector, +0.1 when the model covers the language.
pub fn confidence_score(text: &str, vector: &[f32], model: &EmbeddingModel, language: &str) -> f32 {
    let mut score = 0.5f32;

    let chars = text.chars().count() as f32;
    score += 0.2 * (chars / 500.0).min(1.0);

    if !vector.is_empty() {
        let n = vector.len() as f32;
        let mean = vector.iter().sum::<f32>() / n;
        let variance = vector.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        // A unit vector spread evenly over n dims has variance ≈ 1/n.
        score += 0.2 * (variance * n).min(1.0);
    }

    if model.supports_language(language) {
        score += 0.1;
    }

    score.min(1.0)
}
