//! Relevance scoring for retrieved candidates.
//!
//! Without weights, relevance is the raw similarity. With weights it is
//! `similarity * w_sim + exp(-age_days / 30) * w_rec + confidence * w_rel`.

use atelier_core::types::DocumentEmbedding;
use atelier_vectorstore::SearchHit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recency half-life scale in days.
pub const RECENCY_SCALE_DAYS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankingWeights {
    pub similarity: f32,
    pub recency: f32,
    pub confidence: f32,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            similarity: 1.0,
            recency: 0.0,
            confidence: 0.0,
        }
    }
}

/// `exp(-age_days / 30)`; documents from the future count as brand new.
pub fn recency_decay(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    let age_days = (now - created_at).num_seconds().max(0) as f64 / 86_400.0;
    (-age_days / RECENCY_SCALE_DAYS).exp() as f32
}

pub fn relevance(
    document: &DocumentEmbedding,
    similarity: f32,
    weights: Option<&RankingWeights>,
    now: DateTime<Utc>,
) -> f32 {
    match weights {
        None => similarity,
        Some(w) => {
            similarity * w.similarity
                + recency_decay(document.created_at, now) * w.recency
                + document.confidence_score * w.confidence
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedDocument {
    pub document: DocumentEmbedding,
    pub similarity: f32,
    pub relevance: f32,
}

/// Score and sort hits by relevance, newest first on ties.
pub fn rank(hits: Vec<SearchHit>, weights: Option<&RankingWeights>, now: DateTime<Utc>) -> Vec<RankedDocument> {
    let mut ranked: Vec<RankedDocument> = hits
        .into_iter()
        .map(|hit| RankedDocument {
            relevance: relevance(&hit.document, hit.similarity, weights, now),
            similarity: hit.similarity,
            document: hit.document,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.relevance
            .total_cmp(&a.relevance)
            .then_with(|| b.document.created_at.cmp(&a.document.created_at))
            .then_with(|| a.document.reference().cmp(&b.document.reference()))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::types::{DocumentMetadata, DocumentType};
    use chrono::Duration;

    fn hit(id: &str, similarity: f32, age_days: i64, confidence: f32, now: DateTime<Utc>) -> SearchHit {
        SearchHit {
            document: DocumentEmbedding {
                document_type: DocumentType::Question,
                document_id: id.into(),
                content: format!("content {id}"),
                vector: Vec::new(),
                language: "en".into(),
                embedding_model: "local-hash-1024".into(),
                metadata: DocumentMetadata::default(),
                confidence_score: confidence,
                created_at: now - Duration::days(age_days),
                updated_at: now,
            },
            similarity,
        }
    }

    #[test]
    fn test_recency_decay() {
        let now = Utc::now();
        assert!((recency_decay(now, now) - 1.0).abs() < 1e-6);
        let month = recency_decay(now - Duration::days(30), now);
        assert!((month - (-1.0f32).exp()).abs() < 1e-4);
        assert!((recency_decay(now + Duration::days(3), now) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_default_is_pure_similarity() {
        let now = Utc::now();
        let ranked = rank(
            vec![hit("old", 0.9, 400, 0.1, now), hit("new", 0.8, 0, 1.0, now)],
            None,
            now,
        );
        assert_eq!(ranked[0].document.document_id, "old");
        assert_eq!(ranked[0].relevance, 0.9);
    }

    #[test]
    fn test_monotonic_in_similarity_with_zero_extra_weights() {
        let now = Utc::now();
        let weights = RankingWeights {
            similarity: 0.5,
            recency: 0.0,
            confidence: 0.0,
        };
        let sims = [0.31, 0.92, 0.55, 0.12, 0.77, 0.56];
        let hits = sims
            .iter()
            .enumerate()
            .map(|(i, s)| hit(&format!("d{i}"), *s, i as i64 * 17, (i as f32) / 10.0, now))
            .collect();
        let ranked = rank(hits, Some(&weights), now);
        for pair in ranked.windows(2) {
            assert!(pair[0].similarity > pair[1].similarity);
            assert!(pair[0].relevance > pair[1].relevance);
        }
    }

    #[test]
    fn test_recency_weight_lifts_newer() {
        let now = Utc::now();
        let weights = RankingWeights {
            similarity: 1.0,
            recency: 0.5,
            confidence: 0.0,
        };
        let ranked = rank(
            vec![hit("old", 0.80, 365, 0.5, now), hit("new", 0.75, 0, 0.5, now)],
            Some(&weights),
            now,
        );
        assert_eq!(ranked[0].document.document_id, "new");
    }

    #[test]
    fn test_ties_prefer_newest() {
        let now = Utc::now();
        let ranked = rank(
            vec![hit("a", 0.5, 10, 0.5, now), hit("b", 0.5, 1, 0.5, now)],
            None,
            now,
        );
        assert_eq!(ranked[0].document.document_id, "b");
    }
}
