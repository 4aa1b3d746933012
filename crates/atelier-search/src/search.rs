//! Semantic search facade.
//!
//! Query types:
//! - `Semantic`: pure similarity, no caller filters
//! - `Filtered`: similarity under conjunctive filters (at least one required)
//! - `Multilingual`: filters allowed; documents in the query's language get a
//!   score bonus but other languages stay in the results
//!
//! Facets are counted over the whole candidate pool, before the display limit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use atelier_analytics::{QueryLog, SearchQueryRecord, normalize_query};
use atelier_core::config::SearchConfig;
use atelier_core::error::{AtelierError, Result};
use atelier_core::types::{DocumentEmbedding, SearchFilters, SimilarityMetric};
use atelier_embeddings::{EmbeddingGenerator, GenerateOptions};
use atelier_vectorstore::{SearchOptions, VectorStore};
use serde::{Deserialize, Serialize};

use crate::facets::{Facets, compute_facets};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    #[default]
    Semantic,
    Filtered,
    Multilingual,
}

#[derive(Debug, Clone)]
pub struct SemanticSearchOptions {
    pub query_type: QueryType,
    pub limit: usize,
    pub threshold: Option<f32>,
    pub metric: SimilarityMetric,
    pub filters: SearchFilters,
    pub model: Option<String>,
    /// Known query language; detected when unset.
    pub language: Option<String>,
    pub include_facets: bool,
    pub track_analytics: bool,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl Default for SemanticSearchOptions {
    fn default() -> Self {
        Self {
            query_type: QueryType::Semantic,
            limit: 10,
            threshold: None,
            metric: SimilarityMetric::Cosine,
            filters: SearchFilters::default(),
            model: None,
            language: None,
            include_facets: true,
            track_analytics: true,
            user_id: None,
            session_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResultItem {
    pub document: DocumentEmbedding,
    pub similarity: f32,
    /// Similarity plus any language bonus; results are ordered by this.
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemanticSearchResponse {
    pub query: String,
    pub query_type: QueryType,
    pub query_language: String,
    pub results: Vec<SearchResultItem>,
    /// Size of the candidate pool the facets were counted over.
    pub total_candidates: usize,
    pub facets: Option<Facets>,
    pub took: Duration,
}

pub struct SemanticSearch {
    generator: Arc<EmbeddingGenerator>,
    store: Arc<dyn VectorStore>,
    analytics: Option<Arc<dyn QueryLog>>,
    config: SearchConfig,
}

impl SemanticSearch {
    pub fn new(
        generator: Arc<EmbeddingGenerator>,
        store: Arc<dyn VectorStore>,
        config: SearchConfig,
    ) -> Self {
        Self {
            generator,
            store,
            analytics: None,
            config,
        }
    }

    pub fn with_analytics(mut self, analytics: Option<Arc<dyn QueryLog>>) -> Self {
        self.analytics = analytics;
        self
    }

    pub async fn search(&self, text: &str, options: &SemanticSearchOptions) -> Result<SemanticSearchResponse> {
        let started = Instant::now();
        if options.limit == 0 {
            return Err(AtelierError::invalid("limit must be at least 1"));
        }
        let filters = match options.query_type {
            QueryType::Semantic if !options.filters.is_empty() => {
                return Err(AtelierError::invalid(
                    "semantic queries take no filters; use the filtered or multilingual query type",
                ));
            }
            QueryType::Filtered if options.filters.is_empty() => {
                return Err(AtelierError::invalid("filtered query needs at least one filter"));
            }
            _ => options.filters.clone(),
        };

        let language = match &options.language {
            Some(tag) => tag.clone(),
            None => self.generator.detect_language(text).language,
        };
        let embedding = self
            .generator
            .generate(
                text,
                &GenerateOptions {
                    model: options.model.clone(),
                    language: Some(language.clone()),
                    detect_language: None,
                },
            )
            .await?;

        let pool_size = options
            .limit
            .saturating_mul(self.config.candidate_multiplier.max(1));
        let pool = self
            .store
            .search(
                &embedding.vector,
                &SearchOptions {
                    limit: pool_size,
                    threshold: options.threshold,
                    metric: options.metric,
                    filters: filters.within_model_space(&embedding.model),
                    include_metadata: true,
                    include_vectors: false,
                },
            )
            .await?;

        let facets = options
            .include_facets
            .then(|| compute_facets(pool.iter().map(|h| &h.document)));
        let total_candidates = pool.len();

        let boost = match options.query_type {
            QueryType::Multilingual => self.config.language_boost,
            _ => 0.0,
        };
        let mut results: Vec<SearchResultItem> = pool
            .into_iter()
            .map(|hit| {
                let bonus = if hit.document.language == language { boost } else { 0.0 };
                SearchResultItem {
                    score: hit.similarity + bonus,
                    similarity: hit.similarity,
                    document: hit.document,
                }
            })
            .collect();
        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.document.created_at.cmp(&a.document.created_at))
                .then_with(|| a.document.reference().cmp(&b.document.reference()))
        });
        results.truncate(options.limit);

        let response = SemanticSearchResponse {
            query: text.to_string(),
            query_type: options.query_type,
            query_language: language,
            results,
            total_candidates,
            facets,
            took: started.elapsed(),
        };
        if options.track_analytics {
            self.track(&embedding.vector, options, &response).await;
        }
        tracing::debug!(
            "🔍 {:?} search: {} of {} candidates in {:?}",
            response.query_type,
            response.results.len(),
            response.total_candidates,
            response.took
        );
        Ok(response)
    }

    /// Prior queries starting with `partial`, most frequent first.
    /// Empty without a query log or when `partial` is too short.
    pub async fn get_search_suggestions(&self, partial: &str, limit: Option<usize>) -> Result<Vec<String>> {
        let typed = normalize_query(partial);
        if typed.chars().count() < self.config.suggestion_min_chars {
            return Ok(Vec::new());
        }
        let Some(log) = &self.analytics else {
            return Ok(Vec::new());
        };
        let limit = limit.unwrap_or(self.config.suggestion_limit);
        let popular = log.popular_queries(&typed, limit + 1).await?;
        Ok(popular
            .into_iter()
            .filter(|p| normalize_query(&p.query_text) != typed)
            .map(|p| p.query_text)
            .take(limit)
            .collect())
    }

    async fn track(&self, vector: &[f32], options: &SemanticSearchOptions, response: &SemanticSearchResponse) {
        let Some(log) = &self.analytics else {
            return;
        };
        let mut record = SearchQueryRecord::new(&response.query, options.metric);
        record.query_vector = vector.to_vec();
        record.result_count = response.results.len();
        record.average_similarity = if response.results.is_empty() {
            0.0
        } else {
            response.results.iter().map(|r| r.similarity).sum::<f32>() / response.results.len() as f32
        };
        record.latency_ms = response.took.as_millis() as u64;
        record.filters = options.filters.clone();
        record.threshold = options.threshold;
        record.user_id = options.user_id.clone();
        record.session_id = options.session_id.clone();
        if let Err(e) = log.record_query(&record).await {
            tracing::warn!("⚠️ Failed to record search analytics: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use atelier_analytics::MemoryQueryLog;
    use atelier_core::config::EmbeddingConfig;
    use atelier_core::models;
    use atelier_core::traits::provider::{EmbeddingProvider, ProviderEmbeddings};
    use atelier_core::types::DocumentType;
    use atelier_embeddings::hashing::HashingProvider;
    use atelier_vectorstore::{MemoryVectorStore, StoreRecord, UpsertOptions};

    /// Hashed vectors at any registered model's width.
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

    async fn facade(docs: &[(DocumentType, &str, &str, &str)]) -> SemanticSearch {
        let config = EmbeddingConfig {
            model: "local-hash-1024".into(),
            ..Default::default()
        };
        let generator = Arc::new(EmbeddingGenerator::new(Arc::new(HashingProvider::new()), config));
        let store: Arc<dyn VectorStore> = Arc::new(MemoryVectorStore::new());
        let mut records = Vec::new();
        for (document_type, id, language, content) in docs {
            let e = generator
                .generate(
                    content,
                    &GenerateOptions {
                        language: Some(language.to_string()),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            records.push(StoreRecord {
                document_type: *document_type,
                document_id: id.to_string(),
                content: content.to_string(),
                vector: e.vector,
                language: e.language,
                embedding_model: e.model,
                metadata: Default::default(),
                confidence_score: e.confidence,
                created_at: None,
            });
        }
        store.upsert(&records, &UpsertOptions::default()).await.unwrap();
        SemanticSearch::new(generator, store, SearchConfig::default())
            .with_analytics(Some(Arc::new(MemoryQueryLog::new())))
    }

    fn corpus() -> Vec<(DocumentType, &'static str, &'static str, &'static str)> {
        vec![
            (DocumentType::Question, "q1", "en", "workshop pacing was slow"),
            (DocumentType::Question, "q2", "de", "workshop pacing war gut"),
            (DocumentType::Workshop, "w1", "en", "workshop agenda and pacing"),
            (DocumentType::Question, "q3", "en", "venue too noisy"),
        ]
    }

    #[tokio::test]
    async fn test_facets_cover_pool_not_page() {
        let search = facade(&corpus()).await;
        let options = SemanticSearchOptions {
            limit: 1,
            ..Default::default()
        };
        let response = search.search("workshop pacing", &options).await.unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.total_candidates, 4);
        let facets = response.facets.unwrap();
        assert_eq!(facets.by_type["question"], 3);
        assert_eq!(facets.by_type["workshop"], 1);
        assert_eq!(facets.by_language["de"], 1);
    }

    #[tokio::test]
    async fn test_filtered_requires_filters() {
        let search = facade(&corpus()).await;
        let options = SemanticSearchOptions {
            query_type: QueryType::Filtered,
            ..Default::default()
        };
        assert!(matches!(
            search.search("pacing", &options).await,
            Err(AtelierError::InvalidInput(_))
        ));

        let options = SemanticSearchOptions {
            query_type: QueryType::Filtered,
            filters: SearchFilters {
                document_types: vec![DocumentType::Workshop],
                ..Default::default()
            },
            ..Default::default()
        };
        let response = search.search("pacing", &options).await.unwrap();
        assert!(response.results.iter().all(|r| r.document.document_type == DocumentType::Workshop));
    }

    #[tokio::test]
    async fn test_semantic_rejects_filters() {
        let search = facade(&corpus()).await;
        let options = SemanticSearchOptions {
            filters: SearchFilters {
                languages: vec!["en".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(search.search("pacing", &options).await.is_err());
    }

    #[tokio::test]
    async fn test_multilingual_boost_keeps_other_languages() {
        let search = facade(&[
            (DocumentType::Question, "en1", "en", "workshop pacing"),
            (DocumentType::Question, "de1", "de", "workshop pacing"),
        ])
        .await;
        let options = SemanticSearchOptions {
            query_type: QueryType::Multilingual,
            language: Some("de".into()),
            ..Default::default()
        };
        let response = search.search("workshop pacing", &options).await.unwrap();
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].document.document_id, "de1");
        assert!((response.results[0].score - response.results[0].similarity - 0.1).abs() < 1e-6);
        assert_eq!(response.results[1].score, response.results[1].similarity);
    }

    #[tokio::test]
    async fn test_search_stays_in_model_space() {
        let config = EmbeddingConfig {
            model: "text-embedding-3-small".into(),
            ..Default::default()
        };
        let generator = Arc::new(EmbeddingGenerator::new(Arc::new(MultiModelProvider), config));
        let store: Arc<dyn VectorStore> = Arc::new(MemoryVectorStore::new());
        let mut records = Vec::new();
        for (id, model) in [("q1", "text-embedding-3-small"), ("q2", "text-embedding-ada-002")] {
            let e = generator
                .generate("workshop pacing", &GenerateOptions::with_model(model))
                .await
                .unwrap();
            records.push(StoreRecord {
                document_type: DocumentType::Question,
                document_id: id.into(),
                content: "workshop pacing".into(),
                vector: e.vector,
                language: e.language,
                embedding_model: e.model,
                metadata: Default::default(),
                confidence_score: e.confidence,
                created_at: None,
            });
        }
        store.upsert(&records, &UpsertOptions::default()).await.unwrap();
        let search = SemanticSearch::new(generator, store, SearchConfig::default());

        let options = SemanticSearchOptions {
            model: Some("text-embedding-ada-002".into()),
            ..Default::default()
        };
        let response = search.search("workshop pacing", &options).await.unwrap();
        assert_eq!(response.total_candidates, 1);
        assert_eq!(response.results[0].document.document_id, "q2");
        assert_eq!(response.facets.unwrap().by_type["question"], 1);
    }

    #[tokio::test]
    async fn test_suggestions_from_prior_queries() {
        let search = facade(&corpus()).await;
        for q in ["workshop pacing", "Workshop pacing", "workshop agenda", "venue"] {
            search.search(q, &SemanticSearchOptions::default()).await.unwrap();
        }
        let suggestions = search.get_search_suggestions("work", None).await.unwrap();
        // Suggestions read as last typed, not as the lowercased grouping key.
        assert_eq!(suggestions, vec!["Workshop pacing", "workshop agenda"]);
        assert!(search.get_search_suggestions("w", None).await.unwrap().is_empty());
        let exact = search.get_search_suggestions("Workshop  Agenda", None).await.unwrap();
        assert!(exact.is_empty());
    }
}
