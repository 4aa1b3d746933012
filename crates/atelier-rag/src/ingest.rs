//! Document change feed → embeddings → vector store.
//!
//! The CRUD layer hands over `(id, type, content, language?, metadata?)`
//! tuples whenever source content changes; each run re-embeds them in
//! batches and upserts the results.

use std::collections::BTreeMap;
use std::sync::Arc;

use atelier_core::error::{AtelierError, Result};
use atelier_core::types::{DocumentMetadata, DocumentType};
use atelier_embeddings::{BatchOptions, EmbeddingGenerator};
use atelier_vectorstore::{StoreRecord, UpsertOptions, VectorStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChange {
    pub document_id: String,
    pub document_type: DocumentType,
    pub content: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub metadata: Option<DocumentMetadata>,
    /// Source creation time, used on first insert.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexingSummary {
    pub received: usize,
    pub skipped_empty: usize,
    pub embedded: usize,
    pub cached: usize,
    pub written: usize,
    pub batches: usize,
}

pub struct DocumentIndexer {
    generator: Arc<EmbeddingGenerator>,
    store: Arc<dyn VectorStore>,
    upsert: UpsertOptions,
    model: Option<String>,
}

impl DocumentIndexer {
    pub fn new(generator: Arc<EmbeddingGenerator>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            generator,
            store,
            upsert: UpsertOptions::default(),
            model: None,
        }
    }

    pub fn with_upsert_options(mut self, upsert: UpsertOptions) -> Self {
        self.upsert = upsert;
        self
    }

    /// Pin every document to one model instead of choosing per language.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Embed and upsert `changes`. Documents with blank content are skipped
    /// with a warning; metadata is validated before anything is embedded.
    pub async fn index(&self, changes: &[DocumentChange]) -> Result<IndexingSummary> {
        let mut summary = IndexingSummary {
            received: changes.len(),
            ..Default::default()
        };

        let mut accepted = Vec::with_capacity(changes.len());
        for change in changes {
            if change.document_id.trim().is_empty() {
                return Err(AtelierError::invalid("document_id must not be empty"));
            }
            if change.content.trim().is_empty() {
                tracing::warn!(
                    "⚠️ Skipping {}/{}: empty content",
                    change.document_type,
                    change.document_id
                );
                summary.skipped_empty += 1;
                continue;
            }
            if let Some(metadata) = &change.metadata {
                metadata.validate_for(change.document_type)?;
            }
            accepted.push(change);
        }

        // One batch call per declared language; `None` means detect per item.
        let mut groups: BTreeMap<Option<&str>, Vec<&DocumentChange>> = BTreeMap::new();
        for change in accepted {
            groups.entry(change.language.as_deref()).or_default().push(change);
        }

        let mut records = Vec::with_capacity(summary.received);
        for (language, group) in groups {
            let texts: Vec<&str> = group.iter().map(|c| c.content.as_str()).collect();
            let options = BatchOptions {
                model: self.model.clone(),
                language: language.map(str::to_string),
                ..Default::default()
            };
            let results = self.generator.generate_batch(&texts, &options).await?;
            for (change, result) in group.into_iter().zip(results) {
                summary.embedded += 1;
                if result.cached {
                    summary.cached += 1;
                }
                records.push(StoreRecord {
                    document_type: change.document_type,
                    document_id: change.document_id.clone(),
                    content: change.content.clone(),
                    vector: result.vector,
                    language: result.language,
                    embedding_model: result.model,
                    metadata: change.metadata.clone().unwrap_or_default(),
                    confidence_score: result.confidence,
                    created_at: change.created_at,
                });
            }
        }

        let upserted = self.store.upsert(&records, &self.upsert).await?;
        summary.written = upserted.written;
        summary.batches = upserted.batches;
        tracing::info!(
            "📚 Indexed {} of {} documents ({} cached, {} skipped)",
            summary.written,
            summary.received,
            summary.cached,
            summary.skipped_empty
        );
        Ok(summary)
    }

    /// Drop a document whose source was deleted.
    pub async fn remove(&self, document_type: DocumentType, document_id: &str) -> Result<bool> {
        self.store.delete(document_type, document_id).await
    }
}

/// Parse one change per line; blank lines and `#` comments are ignored.
pub fn parse_jsonl(input: &str) -> Result<Vec<DocumentChange>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let t = line.trim();
            !t.is_empty() && !t.starts_with('#')
        })
        .map(|(n, line)| {
            serde_json::from_str(line)
                .map_err(|e| AtelierError::invalid(format!("line {}: {e}", n + 1)))
        })
        .collect()
}
