//! Atelier configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AtelierError, Result};
use crate::retry::RetryPolicy;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtelierConfig {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

impl AtelierConfig {
    /// Load config from the default path (~/.atelier/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AtelierError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AtelierError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AtelierError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.batch_size == 0 {
            return Err(AtelierError::Config("embedding.batch_size must be > 0".into()));
        }
        if self.store.batch_size == 0 {
            return Err(AtelierError::Config("store.batch_size must be > 0".into()));
        }
        if self.store.index.exact_threshold > self.store.index.hnsw_threshold {
            return Err(AtelierError::Config(
                "store.index.exact_threshold must not exceed hnsw_threshold".into(),
            ));
        }
        if self.rag.max_tokens == 0 {
            return Err(AtelierError::Config("rag.max_tokens must be > 0".into()));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Atelier home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".atelier")
    }
}

fn bool_true() -> bool { true }

// ─── Embedding ───────────────────────────────────────────────────────────────

/// Embedding generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Used when the detected language is outside the default model's set.
    #[serde(default)]
    pub multilingual_model: Option<String>,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,
    #[serde(default = "bool_true")]
    pub detect_language: bool,
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_embedding_provider() -> String { "openai".into() }
fn default_embedding_model() -> String { "text-embedding-3-small".into() }
fn default_embedding_batch_size() -> usize { 100 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 1000 }
fn default_timeout_ms() -> u64 { 30_000 }
fn default_inter_batch_delay_ms() -> u64 { 100 }

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            multilingual_model: None,
            api_key: String::new(),
            endpoint: String::new(),
            batch_size: default_embedding_batch_size(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_ms: default_timeout_ms(),
            inter_batch_delay_ms: default_inter_batch_delay_ms(),
            detect_language: true,
            cache: CacheConfig::default(),
        }
    }
}

impl EmbeddingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }
}

/// In-process embedding cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// Entry lifetime in seconds (0 = never expires).
    #[serde(default)]
    pub ttl_secs: u64,
    /// "fifo" (oldest-inserted first) or "lru".
    #[serde(default = "default_cache_policy")]
    pub policy: String,
}

fn default_cache_capacity() -> usize { 10_000 }
fn default_cache_policy() -> String { "fifo".into() }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_cache_capacity(),
            ttl_secs: 0,
            policy: default_cache_policy(),
        }
    }
}

// ─── Vector store ────────────────────────────────────────────────────────────

/// Vector store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "memory" or "postgres".
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default)]
    pub database_url: String,
    /// Width of the vector column.
    #[serde(default = "default_store_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_store_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub index: IndexPolicyConfig,
}

fn default_store_backend() -> String { "memory".into() }
fn default_store_dimensions() -> usize { 1536 }
fn default_max_connections() -> u32 { 10 }
fn default_store_batch_size() -> usize { 100 }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            database_url: String::new(),
            dimensions: default_store_dimensions(),
            max_connections: default_max_connections(),
            batch_size: default_store_batch_size(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            index: IndexPolicyConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }
}

/// Size thresholds for the advisory index strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPolicyConfig {
    /// Below this row count search stays exact.
    #[serde(default = "default_exact_threshold")]
    pub exact_threshold: usize,
    /// At or above this row count a graph index is used.
    #[serde(default = "default_hnsw_threshold")]
    pub hnsw_threshold: usize,
    #[serde(default = "default_hnsw_m")]
    pub hnsw_m: u32,
    #[serde(default = "default_hnsw_ef_construction")]
    pub hnsw_ef_construction: u32,
    /// Fixed IVFFlat list count; derived from row count when unset.
    #[serde(default)]
    pub ivfflat_lists: Option<u32>,
}

fn default_exact_threshold() -> usize { 1_000 }
fn default_hnsw_threshold() -> usize { 100_000 }
fn default_hnsw_m() -> u32 { 16 }
fn default_hnsw_ef_construction() -> u32 { 64 }

impl Default for IndexPolicyConfig {
    fn default() -> Self {
        Self {
            exact_threshold: default_exact_threshold(),
            hnsw_threshold: default_hnsw_threshold(),
            hnsw_m: default_hnsw_m(),
            hnsw_ef_construction: default_hnsw_ef_construction(),
            ivfflat_lists: None,
        }
    }
}

// ─── RAG ─────────────────────────────────────────────────────────────────────

/// Context builder defaults; every field can be overridden per query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_rag_limit")]
    pub limit: usize,
    #[serde(default = "default_rag_threshold")]
    pub threshold: f32,
    #[serde(default = "default_rag_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_rag_max_documents")]
    pub max_documents: usize,
    #[serde(default = "default_min_chunk_tokens")]
    pub min_chunk_tokens: usize,
    /// "head", "tail", "middle" or "smart".
    #[serde(default = "default_truncation")]
    pub truncation: String,
    /// "bullets", "structured" or "paragraph".
    #[serde(default = "default_prompt_format")]
    pub prompt_format: String,
}

fn default_rag_limit() -> usize { 20 }
fn default_rag_threshold() -> f32 { 0.7 }
fn default_rag_max_tokens() -> usize { 4000 }
fn default_rag_max_documents() -> usize { 10 }
fn default_min_chunk_tokens() -> usize { 100 }
fn default_truncation() -> String { "smart".into() }
fn default_prompt_format() -> String { "structured".into() }

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            limit: default_rag_limit(),
            threshold: default_rag_threshold(),
            max_tokens: default_rag_max_tokens(),
            max_documents: default_rag_max_documents(),
            min_chunk_tokens: default_min_chunk_tokens(),
            truncation: default_truncation(),
            prompt_format: default_prompt_format(),
        }
    }
}

// ─── Search facade ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Candidate pool size as a multiple of the display limit.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    /// Score bonus for documents in the query's language (multilingual search).
    #[serde(default = "default_language_boost")]
    pub language_boost: f32,
    #[serde(default = "default_suggestion_limit")]
    pub suggestion_limit: usize,
    #[serde(default = "default_suggestion_min_chars")]
    pub suggestion_min_chars: usize,
}

fn default_candidate_multiplier() -> usize { 5 }
fn default_language_boost() -> f32 { 0.1 }
fn default_suggestion_limit() -> usize { 5 }
fn default_suggestion_min_chars() -> usize { 2 }

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            candidate_multiplier: default_candidate_multiplier(),
            language_boost: default_language_boost(),
            suggestion_limit: default_suggestion_limit(),
            suggestion_min_chars: default_suggestion_min_chars(),
        }
    }
}

// ─── Analytics ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_analytics_path")]
    pub db_path: String,
}

fn default_analytics_path() -> String { "~/.atelier/analytics.db".into() }

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: default_analytics_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AtelierConfig::default();
        assert_eq!(config.embedding.provider, "openai");
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.store.index.exact_threshold, 1_000);
        assert_eq!(config.store.index.hnsw_threshold, 100_000);
        assert_eq!(config.rag.truncation, "smart");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [embedding]
            provider = "ollama"
            model = "nomic-embed-text"
            batch_size = 16

            [embedding.cache]
            policy = "lru"
            capacity = 500

            [store]
            backend = "postgres"
            database_url = "postgres://localhost/atelier"
            dimensions = 768
        "#;

        let config: AtelierConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.embedding.provider, "ollama");
        assert_eq!(config.embedding.batch_size, 16);
        assert_eq!(config.embedding.cache.policy, "lru");
        assert_eq!(config.store.dimensions, 768);
        assert_eq!(config.rag.max_tokens, 4000);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: AtelierConfig = toml::from_str("").unwrap();
        assert_eq!(config.embedding.max_retries, 3);
        assert_eq!(config.search.candidate_multiplier, 5);
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = AtelierConfig::default();
        config.embedding.batch_size = 0;
        assert!(matches!(config.validate(), Err(AtelierError::Config(_))));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = EmbeddingConfig::default();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
    }

    #[test]
    fn test_home_dir() {
        let home = AtelierConfig::home_dir();
        assert!(home.to_string_lossy().contains("atelier"));
    }
}
