//! In-memory vector store for local operation and tests.
//!
//! Brute-force scoring over every row; fine for small collections.
//! A batch is validated in full before the write lock is taken, so it
//! either lands completely or not at all.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use atelier_core::config::IndexPolicyConfig;
use atelier_core::error::{AtelierError, Result};
use atelier_core::types::{DocumentEmbedding, DocumentMetadata, DocumentRef, DocumentType, SimilarityMetric};
use chrono::Utc;

use crate::index::IndexStrategy;
use crate::similarity::similarity;
use crate::store::{SearchHit, SearchOptions, StoreRecord, StoreStatistics, VectorStore, rank_hits};

fn poisoned() -> AtelierError {
    AtelierError::Store("memory store lock poisoned".into())
}

#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    rows: RwLock<HashMap<DocumentRef, DocumentEmbedding>>,
    index: RwLock<IndexStrategy>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write_batch(&self, records: &[StoreRecord], skip_existing: bool) -> Result<usize> {
        for record in records {
            record.validate()?;
        }

        let now = Utc::now();
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        for record in records {
            let key = record.reference();
            let mut row = record.clone().into_embedding(now);
            if skip_existing {
                if let Some(existing) = rows.get(&key) {
                    row.created_at = existing.created_at;
                }
            }
            rows.insert(key, row);
        }
        Ok(records.len())
    }

    async fn search(&self, query: &[f32], options: &SearchOptions) -> Result<Vec<SearchHit>> {
        options.validate(query)?;
        if options.limit == 0 {
            return Ok(Vec::new());
        }

        let rows = self.rows.read().map_err(|_| poisoned())?;
        let mut hits: Vec<SearchHit> = rows
            .values()
            // Vectors from a model of another width are not comparable.
            .filter(|doc| doc.vector.len() == query.len() && options.filters.matches(doc))
            .filter_map(|doc| {
                let score = similarity(options.metric, query, &doc.vector);
                if options.threshold.is_some_and(|t| score < t) {
                    return None;
                }
                let mut document = doc.clone();
                if !options.include_vectors {
                    document.vector = Vec::new();
                }
                if !options.include_metadata {
                    document.metadata = DocumentMetadata::default();
                }
                Some(SearchHit {
                    document,
                    similarity: score,
                })
            })
            .collect();
        drop(rows);

        rank_hits(&mut hits);
        hits.truncate(options.limit);
        Ok(hits)
    }

    async fn get(
        &self,
        document_type: DocumentType,
        document_id: &str,
    ) -> Result<Option<DocumentEmbedding>> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows.get(&DocumentRef::new(document_type, document_id)).cloned())
    }

    async fn delete(&self, document_type: DocumentType, document_id: &str) -> Result<bool> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        Ok(rows.remove(&DocumentRef::new(document_type, document_id)).is_some())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.rows.read().map_err(|_| poisoned())?.len())
    }

    async fn statistics(&self) -> Result<StoreStatistics> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        let mut stats = StoreStatistics {
            total_embeddings: rows.len(),
            ..Default::default()
        };
        let by = |map: &mut BTreeMap<String, usize>, key: &str| {
            *map.entry(key.to_string()).or_insert(0) += 1;
        };
        let mut dims = 0usize;
        for doc in rows.values() {
            by(&mut stats.by_type, doc.document_type.as_str());
            by(&mut stats.by_language, &doc.language);
            by(&mut stats.by_model, &doc.embedding_model);
            dims += doc.vector.len();
            stats.oldest = Some(stats.oldest.map_or(doc.created_at, |o| o.min(doc.created_at)));
            stats.newest = Some(stats.newest.map_or(doc.created_at, |n| n.max(doc.created_at)));
        }
        if !rows.is_empty() {
            stats.average_dimension = dims as f64 / rows.len() as f64;
        }
        Ok(stats)
    }

    async fn health_check(&self) -> bool {
        self.rows.read().is_ok()
    }

    async fn ensure_index(
        &self,
        policy: &IndexPolicyConfig,
        _metric: SimilarityMetric,
    ) -> Result<IndexStrategy> {
        let rows = self.count().await?;
        let strategy = IndexStrategy::for_row_count(rows, policy);
        // Scoring stays brute force; the strategy is recorded for reporting.
        *self.index.write().map_err(|_| poisoned())? = strategy;
        tracing::debug!("🗂️ memory store: {rows} rows → {strategy}");
        Ok(strategy)
    }

    fn current_index_strategy(&self) -> IndexStrategy {
        self.index.read().map(|s| *s).unwrap_or_default()
    }
}
