//! RAG engine: query text in, ranked token-bounded context out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use atelier_analytics::{ContextWindowEntry, ContextWindowRecord, QueryLog, SearchQueryRecord};
use atelier_core::config::RagConfig;
use atelier_core::error::{AtelierError, Result};
use atelier_core::types::{DocumentRef, DocumentType, SearchFilters, SimilarityMetric};
use atelier_embeddings::{EmbeddingGenerator, GenerateOptions};
use atelier_vectorstore::{SearchHit, SearchOptions, VectorStore};
use chrono::Utc;
use serde::Serialize;

use crate::context::{
    ContextDocument, ContextOptions, ContextWindow, ContextWindowSummary, TruncationStrategy,
    build_context_window,
};
use crate::ranking::{RankingWeights, rank};

/// Per-query options. `RagOptions::from_config` seeds them from `[rag]`.
#[derive(Debug, Clone)]
pub struct RagOptions {
    /// Candidates fetched from the store.
    pub limit: usize,
    pub threshold: Option<f32>,
    pub metric: SimilarityMetric,
    pub filters: SearchFilters,
    pub max_tokens: usize,
    pub max_documents: usize,
    pub min_chunk_tokens: usize,
    pub truncation: TruncationStrategy,
    /// `None` ranks by similarity alone.
    pub weights: Option<RankingWeights>,
    pub model: Option<String>,
    pub language: Option<String>,
    /// Append a `SearchQueryRecord` to the query log.
    pub track_analytics: bool,
    /// Also store the built context window for audit.
    pub store_context_window: bool,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl Default for RagOptions {
    fn default() -> Self {
        let config = RagConfig::default();
        Self {
            limit: config.limit,
            threshold: Some(config.threshold),
            metric: SimilarityMetric::Cosine,
            filters: SearchFilters::default(),
            max_tokens: config.max_tokens,
            max_documents: config.max_documents,
            min_chunk_tokens: config.min_chunk_tokens,
            truncation: TruncationStrategy::Smart,
            weights: None,
            model: None,
            language: None,
            track_analytics: false,
            store_context_window: false,
            user_id: None,
            session_id: None,
        }
    }
}

impl RagOptions {
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Ok(Self {
            limit: config.limit,
            threshold: Some(config.threshold),
            max_tokens: config.max_tokens,
            max_documents: config.max_documents,
            min_chunk_tokens: config.min_chunk_tokens,
            truncation: config.truncation.parse()?,
            ..Default::default()
        })
    }

    fn context_options(&self) -> ContextOptions {
        ContextOptions {
            max_tokens: self.max_tokens,
            max_documents: self.max_documents,
            min_chunk_tokens: self.min_chunk_tokens,
            truncation: self.truncation,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RagPerformance {
    pub embedding_time: Duration,
    pub search_time: Duration,
    pub total_time: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagResult {
    pub query: String,
    pub query_language: String,
    pub context_documents: Vec<ContextDocument>,
    /// Candidates returned by the store before budgeting.
    pub total_results: usize,
    /// Mean similarity over those candidates; 0 when there are none.
    pub average_similarity: f32,
    pub context_window: ContextWindowSummary,
    pub performance: RagPerformance,
}

fn average_similarity(hits: &[SearchHit]) -> f32 {
    if hits.is_empty() {
        return 0.0;
    }
    hits.iter().map(|h| h.similarity).sum::<f32>() / hits.len() as f32
}

pub struct RagEngine {
    generator: Arc<EmbeddingGenerator>,
    store: Arc<dyn VectorStore>,
    analytics: Option<Arc<dyn QueryLog>>,
}

impl RagEngine {
    pub fn new(generator: Arc<EmbeddingGenerator>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            generator,
            store,
            analytics: None,
        }
    }

    pub fn with_analytics(mut self, analytics: Option<Arc<dyn QueryLog>>) -> Self {
        self.analytics = analytics;
        self
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Embed, search, rank and pack a context window for `text`.
    pub async fn query(&self, text: &str, options: &RagOptions) -> Result<RagResult> {
        let started = Instant::now();
        if options.limit == 0 {
            return Err(AtelierError::invalid("limit must be at least 1"));
        }

        let embedding = self
            .generator
            .generate(
                text,
                &GenerateOptions {
                    model: options.model.clone(),
                    language: options.language.clone(),
                    detect_language: None,
                },
            )
            .await?;
        let embedding_time = started.elapsed();

        let search_started = Instant::now();
        let hits = self
            .store
            .search(
                &embedding.vector,
                &SearchOptions {
                    limit: options.limit,
                    threshold: options.threshold,
                    metric: options.metric,
                    filters: options.filters.clone().within_model_space(&embedding.model),
                    include_metadata: true,
                    include_vectors: false,
                },
            )
            .await?;
        let search_time = search_started.elapsed();

        let total_results = hits.len();
        let average = average_similarity(&hits);
        let ranked = rank(hits, options.weights.as_ref(), Utc::now());
        let window = build_context_window(ranked, &options.context_options());
        if window.truncated {
            tracing::warn!(
                "⚠️ Context window for '{}' hit its budget: {} / {} tokens, {} documents",
                preview(text),
                window.total_tokens,
                window.max_tokens,
                window.documents.len()
            );
        }

        let result = RagResult {
            query: text.to_string(),
            query_language: embedding.language.clone(),
            context_window: window.summary(),
            context_documents: window.documents.clone(),
            total_results,
            average_similarity: average,
            performance: RagPerformance {
                embedding_time,
                search_time,
                total_time: started.elapsed(),
            },
        };

        self.track(text, &embedding.vector, options, &result, &window).await;
        tracing::info!(
            "🔎 RAG '{}': {} candidates, {} in context ({} tokens) in {:?}",
            preview(text),
            total_results,
            result.context_window.count,
            result.context_window.size,
            result.performance.total_time
        );
        Ok(result)
    }

    /// Documents similar to a stored one, excluding itself.
    ///
    /// The stored document's model and language are used unless the options
    /// name others.
    pub async fn find_similar_documents(
        &self,
        document_type: DocumentType,
        document_id: &str,
        options: &RagOptions,
    ) -> Result<RagResult> {
        let source = self
            .store
            .get(document_type, document_id)
            .await?
            .ok_or_else(|| AtelierError::not_found(document_type, document_id))?;

        let mut options = options.clone();
        options
            .filters
            .exclude
            .push(DocumentRef::new(document_type, document_id));
        if options.model.is_none() {
            options.model = Some(source.embedding_model.clone());
        }
        if options.language.is_none() {
            options.language = Some(source.language.clone());
        }
        self.query(&source.content, &options).await
    }

    /// Analytics failures are logged, never surfaced to the caller.
    async fn track(
        &self,
        text: &str,
        vector: &[f32],
        options: &RagOptions,
        result: &RagResult,
        window: &ContextWindow,
    ) {
        let Some(log) = &self.analytics else {
            return;
        };
        if !options.track_analytics && !options.store_context_window {
            return;
        }

        let mut query = SearchQueryRecord::new(text, options.metric);
        query.query_vector = vector.to_vec();
        query.result_count = result.total_results;
        query.average_similarity = result.average_similarity;
        query.latency_ms = result.performance.total_time.as_millis() as u64;
        query.filters = options.filters.clone();
        query.threshold = options.threshold;
        query.user_id = options.user_id.clone();
        query.session_id = options.session_id.clone();

        if options.track_analytics {
            if let Err(e) = log.record_query(&query).await {
                tracing::warn!("⚠️ Failed to record query analytics: {e}");
            }
        }
        if options.store_context_window {
            let mut record = ContextWindowRecord::new(text, window.max_tokens);
            if options.track_analytics {
                record.query_id = Some(query.id.clone());
            }
            record.total_tokens = window.total_tokens;
            record.truncated = window.truncated;
            record.documents = window
                .documents
                .iter()
                .map(|d| ContextWindowEntry {
                    document_type: d.document.document_type,
                    document_id: d.document.document_id.clone(),
                    relevance: d.relevance,
                    tokens: d.tokens,
                    truncated: d.truncated,
                })
                .collect();
            if let Err(e) = log.record_context_window(&record).await {
                tracing::warn!("⚠️ Failed to store context window: {e}");
            }
        }
    }
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(60).collect();
    if text.chars().count() > 60 {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_analytics::MemoryQueryLog;
    use async_trait::async_trait;
    use atelier_core::config::EmbeddingConfig;
    use atelier_core::models;
    use atelier_core::traits::provider::{EmbeddingProvider, ProviderEmbeddings};
    use atelier_embeddings::EmbeddingResult;
    use atelier_embeddings::hashing::HashingProvider;
    use atelier_vectorstore::{MemoryVectorStore, StoreRecord, UpsertOptions};

    /// A remote host serving several models: hashed vectors at each model's width.
    struct MultiModelProvider;

    #[async_trait]
    impl EmbeddingProvider for MultiModelProvider {
        fn name(&self) -> &str {
            "multi"
        }

        async fn embed(&self, texts: &[String], model: &str) -> Result<ProviderEmbeddings> {
            let dimensions = models::require_model(model)?.dimensions;
            let hasher = HashingProvider::new();
            Ok(ProviderEmbeddings {
                vectors: texts.iter().map(|t| hasher.embed_text(t, dimensions)).collect(),
                tokens_used: 0,
            })
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    fn question(id: &str, content: &str, e: EmbeddingResult) -> StoreRecord {
        StoreRecord {
            document_type: DocumentType::Question,
            document_id: id.to_string(),
            content: content.to_string(),
            vector: e.vector,
            language: e.language,
            embedding_model: e.model,
            metadata: Default::default(),
            confidence_score: e.confidence,
            created_at: None,
        }
    }

    async fn engine_with(docs: &[(&str, &str)]) -> (RagEngine, Arc<MemoryQueryLog>) {
        let config = EmbeddingConfig {
            model: "local-hash-1024".into(),
            ..Default::default()
        };
        let generator = Arc::new(EmbeddingGenerator::new(Arc::new(HashingProvider::new()), config));
        let store: Arc<dyn VectorStore> = Arc::new(MemoryVectorStore::new());

        let mut records = Vec::new();
        for (id, content) in docs {
            let e = generator.generate(content, &GenerateOptions::default()).await.unwrap();
            records.push(question(id, content, e));
        }
        store.upsert(&records, &UpsertOptions::default()).await.unwrap();

        let log = Arc::new(MemoryQueryLog::new());
        let engine = RagEngine::new(generator, store).with_analytics(Some(log.clone()));
        (engine, log)
    }

    fn pacing_options() -> RagOptions {
        RagOptions {
            limit: 5,
            threshold: Some(0.5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_pacing_scenario() {
        let (engine, _) = engine_with(&[
            ("q1", "I loved the workshop pacing"),
            ("q2", "The venue was too noisy"),
        ])
        .await;
        let result = engine
            .query("workshop feedback about pacing", &pacing_options())
            .await
            .unwrap();

        assert_eq!(result.context_documents[0].document.document_id, "q1");
        assert!(result.average_similarity >= 0.5);
        assert!(!result.context_window.truncated);
        assert_eq!(result.context_window.count, result.context_documents.len());

        // Without the threshold both are candidates and q1 still leads.
        let options = RagOptions {
            threshold: None,
            ..pacing_options()
        };
        let result = engine
            .query("workshop feedback about pacing", &options)
            .await
            .unwrap();
        let ids: Vec<&str> = result
            .context_documents
            .iter()
            .map(|d| d.document.document_id.as_str())
            .collect();
        assert_eq!(ids, vec!["q1", "q2"]);
        assert!(result.context_documents[0].similarity > result.context_documents[1].similarity);
    }

    #[tokio::test]
    async fn test_query_stays_in_model_space() {
        let config = EmbeddingConfig {
            model: "text-embedding-3-small".into(),
            ..Default::default()
        };
        let generator = Arc::new(EmbeddingGenerator::new(Arc::new(MultiModelProvider), config));
        let store: Arc<dyn VectorStore> = Arc::new(MemoryVectorStore::new());
        let content = "I loved the workshop pacing";
        let mut records = Vec::new();
        // Both models are 1536 wide.
        for (id, model) in [("q1", "text-embedding-3-small"), ("q2", "text-embedding-ada-002")] {
            let e = generator
                .generate(content, &GenerateOptions::with_model(model))
                .await
                .unwrap();
            records.push(question(id, content, e));
        }
        store.upsert(&records, &UpsertOptions::default()).await.unwrap();
        let engine = RagEngine::new(generator, store);

        let ids = |r: &RagResult| {
            r.context_documents
                .iter()
                .map(|d| d.document.document_id.clone())
                .collect::<Vec<_>>()
        };
        let ada = RagOptions {
            threshold: None,
            model: Some("text-embedding-ada-002".into()),
            ..Default::default()
        };
        let result = engine.query("workshop pacing", &ada).await.unwrap();
        assert_eq!(ids(&result), vec!["q2"]);
        assert_eq!(result.total_results, 1);

        let default_model = RagOptions {
            threshold: None,
            ..Default::default()
        };
        let result = engine.query("workshop pacing", &default_model).await.unwrap();
        assert_eq!(ids(&result), vec!["q1"]);
    }

    #[tokio::test]
    async fn test_round_trip_similarity() {
        let (engine, _) = engine_with(&[("q1", "Clear slides and useful exercises")]).await;
        let result = engine
            .query("Clear slides and useful exercises", &RagOptions::default())
            .await
            .unwrap();
        assert_eq!(result.total_results, 1);
        assert!((result.context_documents[0].similarity - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_find_similar_excludes_source() {
        let (engine, _) = engine_with(&[
            ("q1", "workshop pacing was great"),
            ("q2", "great workshop pacing overall"),
        ])
        .await;
        let options = RagOptions {
            threshold: Some(0.1),
            ..Default::default()
        };
        let result = engine
            .find_similar_documents(DocumentType::Question, "q1", &options)
            .await
            .unwrap();
        assert!(result.context_documents.iter().all(|d| d.document.document_id != "q1"));
        assert_eq!(result.context_documents[0].document.document_id, "q2");
    }

    #[tokio::test]
    async fn test_find_similar_missing_document() {
        let (engine, _) = engine_with(&[]).await;
        let err = engine
            .find_similar_documents(DocumentType::Workshop, "w404", &RagOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AtelierError::DocumentNotFound { .. }));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let (engine, _) = engine_with(&[]).await;
        let err = engine.query("  ", &RagOptions::default()).await.unwrap_err();
        assert!(matches!(err, AtelierError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_budget_respected_end_to_end() {
        let long = "The facilitator explained every step. ".repeat(30);
        let (engine, _) = engine_with(&[("q1", &long), ("q2", "facilitator steps")]).await;
        let options = RagOptions {
            threshold: None,
            max_tokens: 120,
            min_chunk_tokens: 20,
            ..Default::default()
        };
        let result = engine.query("facilitator explained steps", &options).await.unwrap();
        assert!(result.context_window.size <= 120);
        assert!(result.context_window.truncated);
    }

    #[tokio::test]
    async fn test_analytics_tracking() {
        let (engine, log) = engine_with(&[("q1", "I loved the workshop pacing")]).await;
        let options = RagOptions {
            track_analytics: true,
            store_context_window: true,
            session_id: Some("s-1".into()),
            ..pacing_options()
        };
        engine.query("workshop pacing", &options).await.unwrap();
        engine.query("venue noise", &pacing_options()).await.unwrap();

        let queries = log.recent_queries(10).await.unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].session_id.as_deref(), Some("s-1"));
        assert_eq!(queries[0].result_count, 1);

        let windows = log.recent_context_windows(10).await.unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].query_id.as_deref(), Some(queries[0].id.as_str()));
        assert_eq!(windows[0].documents[0].document_id, "q1");
    }
}
