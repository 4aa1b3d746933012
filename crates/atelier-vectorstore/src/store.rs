//! The `VectorStore` contract shared by every backend.
//!
//! Backends implement single-batch primitives (`write_batch` is
//! all-or-nothing). Batching, validation and per-batch retries live in the
//! provided `upsert` so every backend behaves the same way under failure.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use atelier_core::config::IndexPolicyConfig;
use atelier_core::error::{AtelierError, Result};
use atelier_core::models;
use atelier_core::retry::{RetryPolicy, Sleeper, TokioSleeper, retry};
use atelier_core::types::{
    DocumentEmbedding, DocumentMetadata, DocumentRef, DocumentType, SearchFilters,
    SimilarityMetric,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::index::IndexStrategy;

/// One document to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub document_type: DocumentType,
    pub document_id: String,
    pub content: String,
    pub vector: Vec<f32>,
    pub language: String,
    pub embedding_model: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub confidence_score: f32,
    /// Source timestamp for first insertion; defaults to now.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl StoreRecord {
    pub fn reference(&self) -> DocumentRef {
        DocumentRef::new(self.document_type, self.document_id.clone())
    }

    /// Reject records that would break the store's invariants.
    pub fn validate(&self) -> Result<()> {
        if self.document_id.trim().is_empty() {
            return Err(AtelierError::invalid("document_id must not be empty"));
        }
        if self.content.trim().is_empty() {
            return Err(AtelierError::invalid(format!(
                "{} has empty content",
                self.reference()
            )));
        }
        let model = models::require_model(&self.embedding_model)?;
        if self.vector.len() != model.dimensions {
            return Err(AtelierError::DimensionMismatch {
                model: model.name.to_string(),
                expected: model.dimensions,
                actual: self.vector.len(),
            });
        }
        if self.vector.iter().any(|v| !v.is_finite()) {
            return Err(AtelierError::invalid(format!(
                "{} has non-finite vector components",
                self.reference()
            )));
        }
        self.metadata.validate_for(self.document_type)
    }

    /// Materialise as a stored row at `now`.
    pub fn into_embedding(self, now: DateTime<Utc>) -> DocumentEmbedding {
        DocumentEmbedding {
            document_type: self.document_type,
            document_id: self.document_id,
            content: self.content,
            vector: self.vector,
            language: self.language,
            embedding_model: self.embedding_model,
            metadata: self.metadata,
            confidence_score: self.confidence_score,
            created_at: self.created_at.unwrap_or(now),
            updated_at: now,
        }
    }
}

pub type UpsertProgress = Arc<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Clone)]
pub struct UpsertOptions {
    pub batch_size: usize,
    /// Update an existing (type, id) row in place, keeping its `created_at`.
    /// When false the old row is replaced by a fresh insert.
    pub skip_existing: bool,
    pub retry: RetryPolicy,
    /// Called with (completed, total) after each committed batch.
    pub on_progress: Option<UpsertProgress>,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            skip_existing: true,
            retry: RetryPolicy::default(),
            on_progress: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub written: usize,
    pub batches: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub limit: usize,
    /// Minimum similarity (in the metric's own scale).
    pub threshold: Option<f32>,
    pub metric: SimilarityMetric,
    pub filters: SearchFilters,
    /// When false, hits carry empty `Generic` metadata.
    pub include_metadata: bool,
    /// When false, hits carry an empty vector.
    pub include_vectors: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: None,
            metric: SimilarityMetric::Cosine,
            filters: SearchFilters::default(),
            include_metadata: true,
            include_vectors: false,
        }
    }
}

impl SearchOptions {
    pub fn validate(&self, query: &[f32]) -> Result<()> {
        if query.is_empty() {
            return Err(AtelierError::invalid("query vector must not be empty"));
        }
        if query.iter().any(|v| !v.is_finite()) {
            return Err(AtelierError::invalid("query vector has non-finite components"));
        }
        if self.threshold.is_some_and(|t| !t.is_finite()) {
            return Err(AtelierError::invalid("threshold must be finite"));
        }
        self.filters.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub document: DocumentEmbedding,
    pub similarity: f32,
}

/// Order by similarity, newest first on ties, then identity for stability.
pub fn rank_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| b.document.created_at.cmp(&a.document.created_at))
            .then_with(|| a.document.reference().cmp(&b.document.reference()))
    });
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStatistics {
    pub total_embeddings: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_language: BTreeMap<String, usize>,
    pub by_model: BTreeMap<String, usize>,
    pub average_dimension: f64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &str;

    /// Write one batch atomically: every record lands or none does.
    async fn write_batch(&self, records: &[StoreRecord], skip_existing: bool) -> Result<usize>;

    /// Ranked hits, best first; ties go to the most recent `created_at`.
    async fn search(&self, query: &[f32], options: &SearchOptions) -> Result<Vec<SearchHit>>;

    /// Full stored row including its vector.
    async fn get(&self, document_type: DocumentType, document_id: &str)
    -> Result<Option<DocumentEmbedding>>;

    /// Returns whether a row was removed.
    async fn delete(&self, document_type: DocumentType, document_id: &str) -> Result<bool>;

    async fn count(&self) -> Result<usize>;

    async fn statistics(&self) -> Result<StoreStatistics>;

    /// Never errors; `false` means the backend is unreachable.
    async fn health_check(&self) -> bool;

    /// Re-evaluate the index policy against the current row count and apply it.
    async fn ensure_index(
        &self,
        policy: &IndexPolicyConfig,
        metric: SimilarityMetric,
    ) -> Result<IndexStrategy>;

    /// Strategy applied by the last `ensure_index`.
    fn current_index_strategy(&self) -> IndexStrategy;

    /// Validate, split into batches and write each one with retries.
    async fn upsert(&self, records: &[StoreRecord], options: &UpsertOptions) -> Result<UpsertSummary> {
        upsert_with(self, records, options, &TokioSleeper).await
    }
}

/// Batched upsert against any store, sleeping through `sleeper` between retries.
///
/// Batches commit independently: a failed batch leaves earlier ones in place
/// and surfaces as `VectorStoreOperationFailed` (retries exhausted) or
/// `BatchFailed` (rejected outright), both naming the batch.
pub async fn upsert_with<S: VectorStore + ?Sized>(
    store: &S,
    records: &[StoreRecord],
    options: &UpsertOptions,
    sleeper: &dyn Sleeper,
) -> Result<UpsertSummary> {
    for record in records {
        record.validate()?;
    }

    let total = records.len();
    let mut summary = UpsertSummary::default();
    for (batch_index, batch) in records.chunks(options.batch_size.max(1)).enumerate() {
        let label = format!("{} upsert batch {batch_index}", store.name());
        let written = retry(&options.retry, sleeper, &label, |_| {
            store.write_batch(batch, options.skip_existing)
        })
        .await
        .map_err(|failure| {
            if !failure.error.is_retryable() {
                tracing::warn!("❌ {label} rejected: {}", failure.error);
                return AtelierError::BatchFailed {
                    operation: "upsert".into(),
                    batch_index,
                    item_count: batch.len(),
                    completed: summary.written,
                    source: Box::new(failure.error),
                };
            }
            tracing::warn!(
                "❌ {label} failed after {} attempts: {}",
                failure.attempts,
                failure.error
            );
            AtelierError::VectorStoreOperationFailed {
                operation: "upsert".into(),
                batch_index,
                item_count: batch.len(),
                completed: summary.written,
                attempts: failure.attempts,
                message: failure.error.to_string(),
            }
        })?;

        summary.written += written;
        summary.batches += 1;
        tracing::debug!("📥 {label}: {written} rows, {}/{total}", summary.written);
        if let Some(cb) = &options.on_progress {
            cb(summary.written, total);
        }
    }

    if total > 0 {
        tracing::info!(
            "✅ Upserted {} documents in {} batches into {}",
            summary.written,
            summary.batches,
            store.name()
        );
    }
    Ok(summary)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A `local-hash-1024` record whose vector points along `axis`.
    pub fn record(document_type: DocumentType, id: &str, content: &str, axis: usize) -> StoreRecord {
        let mut vector = vec![0.0f32; 1024];
        vector[axis % 1024] = 1.0;
        StoreRecord {
            document_type,
            document_id: id.into(),
            content: content.into(),
            vector,
            language: "en".into(),
            embedding_model: "local-hash-1024".into(),
            metadata: DocumentMetadata::default(),
            confidence_score: 0.8,
            created_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::record;
    use super::*;
    use crate::memory::MemoryVectorStore;
    use atelier_core::retry::RecordingSleeper;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails every write whose 1-based number satisfies `fails`, else delegates.
    struct FlakyStore {
        inner: MemoryVectorStore,
        writes: AtomicU32,
        fails: fn(u32) -> bool,
        error: fn() -> AtelierError,
    }

    #[async_trait]
    impl VectorStore for FlakyStore {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn write_batch(&self, records: &[StoreRecord], skip_existing: bool) -> Result<usize> {
            let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
            if (self.fails)(n) {
                return Err((self.error)());
            }
            self.inner.write_batch(records, skip_existing).await
        }

        async fn search(&self, query: &[f32], options: &SearchOptions) -> Result<Vec<SearchHit>> {
            self.inner.search(query, options).await
        }

        async fn get(
            &self,
            document_type: DocumentType,
            document_id: &str,
        ) -> Result<Option<DocumentEmbedding>> {
            self.inner.get(document_type, document_id).await
        }

        async fn delete(&self, document_type: DocumentType, document_id: &str) -> Result<bool> {
            self.inner.delete(document_type, document_id).await
        }

        async fn count(&self) -> Result<usize> {
            self.inner.count().await
        }

        async fn statistics(&self) -> Result<StoreStatistics> {
            self.inner.statistics().await
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn ensure_index(
            &self,
            policy: &IndexPolicyConfig,
            metric: SimilarityMetric,
        ) -> Result<IndexStrategy> {
            self.inner.ensure_index(policy, metric).await
        }

        fn current_index_strategy(&self) -> IndexStrategy {
            self.inner.current_index_strategy()
        }
    }

    fn flaky(fails: fn(u32) -> bool) -> FlakyStore {
        FlakyStore {
            inner: MemoryVectorStore::new(),
            writes: AtomicU32::new(0),
            fails,
            error: || AtelierError::Store("connection reset".into()),
        }
    }

    /// Like `flaky`, but the failure is a constraint violation.
    fn rejecting(fails: fn(u32) -> bool) -> FlakyStore {
        FlakyStore {
            error: || AtelierError::invalid("23505 duplicate key value"),
            ..flaky(fails)
        }
    }

    fn options(max_attempts: u32) -> UpsertOptions {
        UpsertOptions {
            batch_size: 2,
            retry: RetryPolicy::new(max_attempts, Duration::from_millis(5)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_retries_batch() {
        let store = flaky(|n| n == 1);
        let sleeper = RecordingSleeper::new();
        let records = vec![
            record(DocumentType::Question, "q1", "one", 1),
            record(DocumentType::Question, "q2", "two", 2),
            record(DocumentType::Question, "q3", "three", 3),
        ];
        let summary = upsert_with(&store, &records, &options(3), &sleeper).await.unwrap();
        assert_eq!(summary, UpsertSummary { written: 3, batches: 2 });
        assert_eq!(store.count().await.unwrap(), 3);
        assert_eq!(sleeper.delays(), vec![Duration::from_millis(5)]);
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_earlier_batches() {
        // Batch 0 commits on write 1; batch 1 fails on every later write.
        let store = flaky(|n| n >= 2);
        let records = vec![
            record(DocumentType::Workshop, "w1", "a", 1),
            record(DocumentType::Workshop, "w2", "b", 2),
            record(DocumentType::Workshop, "w3", "c", 3),
        ];
        let err = upsert_with(&store, &records, &options(2), &RecordingSleeper::new())
            .await
            .unwrap_err();
        match err {
            AtelierError::VectorStoreOperationFailed {
                operation,
                batch_index,
                item_count,
                completed,
                attempts,
                ..
            } => {
                assert_eq!(operation, "upsert");
                assert_eq!((batch_index, item_count, completed, attempts), (1, 1, 2, 2));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.count().await.unwrap(), 2);
        assert!(store.get(DocumentType::Workshop, "w3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejected_batch_reports_position() {
        // Batch 0 commits; batch 1 hits a constraint error and is not retried.
        let store = rejecting(|n| n == 2);
        let records = vec![
            record(DocumentType::Question, "q1", "a", 1),
            record(DocumentType::Question, "q2", "b", 2),
            record(DocumentType::Question, "q3", "c", 3),
            record(DocumentType::Question, "q4", "d", 4),
        ];
        let err = upsert_with(&store, &records, &options(3), &RecordingSleeper::new())
            .await
            .unwrap_err();
        match &err {
            AtelierError::BatchFailed {
                operation,
                batch_index,
                item_count,
                completed,
                ..
            } => {
                assert_eq!(operation, "upsert");
                assert_eq!((*batch_index, *item_count, *completed), (1, 2, 2));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(err.root_cause(), AtelierError::InvalidInput(_)));
        assert_eq!(store.writes.load(Ordering::SeqCst), 2);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_invalid_record_rejected_before_writing() {
        let store = flaky(|_| false);
        let mut bad = record(DocumentType::Question, "q1", "text", 1);
        bad.vector.truncate(10);
        let err = upsert_with(&store, &[bad], &options(3), &RecordingSleeper::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AtelierError::DimensionMismatch { expected: 1024, actual: 10, .. }));
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_progress_reports_committed_counts() {
        let store = flaky(|_| false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let opts = UpsertOptions {
            on_progress: Some(Arc::new(move |done, total| sink.lock().unwrap().push((done, total)))),
            ..options(1)
        };
        let records: Vec<_> = (0..5)
            .map(|i| record(DocumentType::Question, &format!("q{i}"), "text", i))
            .collect();
        upsert_with(&store, &records, &opts, &RecordingSleeper::new()).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(2, 5), (4, 5), (5, 5)]);
    }

    #[test]
    fn test_metadata_kind_checked() {
        let mut r = record(DocumentType::Workshop, "w1", "text", 1);
        r.metadata = DocumentMetadata::Question {
            questionnaire_id: "qn".into(),
            question_type: None,
            required: false,
        };
        assert!(matches!(r.validate(), Err(AtelierError::InvalidInput(_))));
    }

    #[test]
    fn test_unregistered_model_rejected() {
        let mut r = record(DocumentType::Workshop, "w1", "text", 1);
        r.embedding_model = "mystery".into();
        assert!(matches!(r.validate(), Err(AtelierError::UnsupportedModel(_))));
    }
}
