//! Append-only analytics records.

use atelier_core::types::{DocumentType, SearchFilters, SimilarityMetric};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One executed search. Never mutated after it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQueryRecord {
    pub id: String,
    pub query_text: String,
    #[serde(default)]
    pub query_vector: Vec<f32>,
    pub result_count: usize,
    pub average_similarity: f32,
    pub latency_ms: u64,
    #[serde(default)]
    pub filters: SearchFilters,
    pub metric: SimilarityMetric,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SearchQueryRecord {
    pub fn new(query_text: impl Into<String>, metric: SimilarityMetric) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            query_text: query_text.into(),
            query_vector: Vec::new(),
            result_count: 0,
            average_similarity: 0.0,
            latency_ms: 0,
            filters: SearchFilters::default(),
            metric,
            threshold: None,
            user_id: None,
            session_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Grouping key for popularity: trimmed, lowercased, single-spaced.
    pub fn normalized_text(&self) -> String {
        normalize_query(&self.query_text)
    }
}

pub fn normalize_query(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A document that made it into a context window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextWindowEntry {
    pub document_type: DocumentType,
    pub document_id: String,
    pub relevance: f32,
    pub tokens: usize,
    pub truncated: bool,
}

/// Audit copy of a context window, stored only when tracking is requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextWindowRecord {
    pub id: String,
    #[serde(default)]
    pub query_id: Option<String>,
    pub query_text: String,
    pub documents: Vec<ContextWindowEntry>,
    pub total_tokens: usize,
    pub max_tokens: usize,
    pub truncated: bool,
    pub timestamp: DateTime<Utc>,
}

impl ContextWindowRecord {
    pub fn new(query_text: impl Into<String>, max_tokens: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            query_id: None,
            query_text: query_text.into(),
            documents: Vec::new(),
            total_tokens: 0,
            max_tokens,
            truncated: false,
            timestamp: Utc::now(),
        }
    }
}

/// Aggregated prior query, used for suggestions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopularQuery {
    pub query_text: String,
    pub count: usize,
    pub last_seen: DateTime<Utc>,
}
