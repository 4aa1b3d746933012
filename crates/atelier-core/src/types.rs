//! Domain types shared across the pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AtelierError, Result};

// ─── Document kinds ──────────────────────────────────────────────────────────

/// Closed set of content kinds produced by the CRUD layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Question,
    QuestionnaireResponse,
    Workshop,
    WorkshopContent,
    AnalysisResult,
}

impl DocumentType {
    pub const ALL: [DocumentType; 5] = [
        DocumentType::Question,
        DocumentType::QuestionnaireResponse,
        DocumentType::Workshop,
        DocumentType::WorkshopContent,
        DocumentType::AnalysisResult,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Question => "question",
            DocumentType::QuestionnaireResponse => "questionnaire_response",
            DocumentType::Workshop => "workshop",
            DocumentType::WorkshopContent => "workshop_content",
            DocumentType::AnalysisResult => "analysis_result",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = AtelierError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "question" => Ok(DocumentType::Question),
            "questionnaire_response" | "response" => Ok(DocumentType::QuestionnaireResponse),
            "workshop" => Ok(DocumentType::Workshop),
            "workshop_content" | "content" => Ok(DocumentType::WorkshopContent),
            "analysis_result" | "analysis" => Ok(DocumentType::AnalysisResult),
            other => Err(AtelierError::invalid(format!("unknown document type '{other}'"))),
        }
    }
}

/// Identity of a stored document: unique per (type, id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentRef {
    pub document_type: DocumentType,
    pub document_id: String,
}

impl DocumentRef {
    pub fn new(document_type: DocumentType, document_id: impl Into<String>) -> Self {
        Self {
            document_type,
            document_id: document_id.into(),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.document_type, self.document_id)
    }
}

// ─── Metadata ────────────────────────────────────────────────────────────────

/// An answer captured in a questionnaire response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AnswerValue {
    Text(String),
    Choice(Vec<String>),
    Scale(i32),
    Boolean(bool),
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Text(t) => f.write_str(t),
            AnswerValue::Choice(c) => f.write_str(&c.join(", ")),
            AnswerValue::Scale(v) => write!(f, "{v}"),
            AnswerValue::Boolean(b) => write!(f, "{}", if *b { "yes" } else { "no" }),
        }
    }
}

/// Per-kind metadata payload. The `kind` tag must agree with the record's
/// [`DocumentType`]; `Generic` is accepted for any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentMetadata {
    Question {
        questionnaire_id: String,
        #[serde(default)]
        question_type: Option<String>,
        #[serde(default)]
        required: bool,
    },
    QuestionnaireResponse {
        questionnaire_id: String,
        #[serde(default)]
        question_id: Option<String>,
        #[serde(default)]
        respondent_id: Option<String>,
        #[serde(default)]
        answer: Option<AnswerValue>,
    },
    Workshop {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        status: Option<String>,
    },
    WorkshopContent {
        workshop_id: String,
        #[serde(default)]
        section: Option<String>,
        #[serde(default)]
        position: Option<u32>,
    },
    AnalysisResult {
        #[serde(default)]
        analysis_id: Option<String>,
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        score: Option<f32>,
    },
    Generic {
        #[serde(default)]
        attributes: BTreeMap<String, String>,
    },
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        DocumentMetadata::Generic {
            attributes: BTreeMap::new(),
        }
    }
}

impl DocumentMetadata {
    /// The document type this payload belongs to (`None` for `Generic`).
    pub fn kind(&self) -> Option<DocumentType> {
        match self {
            DocumentMetadata::Question { .. } => Some(DocumentType::Question),
            DocumentMetadata::QuestionnaireResponse { .. } => {
                Some(DocumentType::QuestionnaireResponse)
            }
            DocumentMetadata::Workshop { .. } => Some(DocumentType::Workshop),
            DocumentMetadata::WorkshopContent { .. } => Some(DocumentType::WorkshopContent),
            DocumentMetadata::AnalysisResult { .. } => Some(DocumentType::AnalysisResult),
            DocumentMetadata::Generic { .. } => None,
        }
    }

    /// Check the payload against the record's type and its own required fields.
    pub fn validate_for(&self, document_type: DocumentType) -> Result<()> {
        if let Some(kind) = self.kind() {
            if kind != document_type {
                return Err(AtelierError::invalid(format!(
                    "metadata of kind '{kind}' attached to a '{document_type}' document"
                )));
            }
        }
        match self {
            DocumentMetadata::Question {
                questionnaire_id, ..
            }
            | DocumentMetadata::QuestionnaireResponse {
                questionnaire_id, ..
            } if questionnaire_id.trim().is_empty() => {
                Err(AtelierError::invalid("questionnaire_id must not be empty"))
            }
            DocumentMetadata::WorkshopContent { workshop_id, .. } if workshop_id.trim().is_empty() => {
                Err(AtelierError::invalid("workshop_id must not be empty"))
            }
            DocumentMetadata::AnalysisResult {
                score: Some(score), ..
            } if !score.is_finite() => Err(AtelierError::invalid("analysis score must be finite")),
            _ => Ok(()),
        }
    }

    /// Flat key/value view used for prompt annotations.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let mut push = |k: &str, v: Option<String>| {
            if let Some(v) = v {
                out.push((k.to_string(), v));
            }
        };
        match self {
            DocumentMetadata::Question {
                questionnaire_id,
                question_type,
                required,
            } => {
                push("questionnaire", Some(questionnaire_id.clone()));
                push("question_type", question_type.clone());
                push("required", required.then(|| "yes".to_string()));
            }
            DocumentMetadata::QuestionnaireResponse {
                questionnaire_id,
                question_id,
                respondent_id,
                answer,
            } => {
                push("questionnaire", Some(questionnaire_id.clone()));
                push("question", question_id.clone());
                push("respondent", respondent_id.clone());
                push("answer", answer.as_ref().map(|a| a.to_string()));
            }
            DocumentMetadata::Workshop { title, status } => {
                push("title", title.clone());
                push("status", status.clone());
            }
            DocumentMetadata::WorkshopContent {
                workshop_id,
                section,
                position,
            } => {
                push("workshop", Some(workshop_id.clone()));
                push("section", section.clone());
                push("position", position.map(|p| p.to_string()));
            }
            DocumentMetadata::AnalysisResult {
                analysis_id,
                source,
                score,
            } => {
                push("analysis", analysis_id.clone());
                push("source", source.clone());
                push("score", score.map(|s| format!("{s:.2}")));
            }
            DocumentMetadata::Generic { attributes } => {
                for (k, v) in attributes {
                    push(k.as_str(), Some(v.clone()));
                }
            }
        }
        out
    }
}

// ─── Similarity ──────────────────────────────────────────────────────────────

/// Vector comparison function. Every metric is oriented so higher is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    L2,
    InnerProduct,
}

impl SimilarityMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityMetric::Cosine => "cosine",
            SimilarityMetric::L2 => "l2",
            SimilarityMetric::InnerProduct => "inner_product",
        }
    }
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimilarityMetric {
    type Err = AtelierError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(SimilarityMetric::Cosine),
            "l2" | "euclidean" => Ok(SimilarityMetric::L2),
            "inner_product" | "ip" | "dot" => Ok(SimilarityMetric::InnerProduct),
            other => Err(AtelierError::invalid(format!("unknown similarity metric '{other}'"))),
        }
    }
}

// ─── Filters ─────────────────────────────────────────────────────────────────

/// Conjunctive search filters. Empty lists mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub document_types: Vec<DocumentType>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub embedding_models: Vec<String>,
    #[serde(default)]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_before: Option<DateTime<Utc>>,
    /// Identities to leave out of the result set.
    #[serde(default)]
    pub exclude: Vec<DocumentRef>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.document_types.is_empty()
            && self.languages.is_empty()
            && self.embedding_models.is_empty()
            && self.created_after.is_none()
            && self.created_before.is_none()
            && self.exclude.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(after), Some(before)) = (self.created_after, self.created_before) {
            if after > before {
                return Err(AtelierError::invalid(format!(
                    "created_after ({after}) is later than created_before ({before})"
                )));
            }
        }
        if self.languages.iter().any(|l| l.trim().is_empty()) {
            return Err(AtelierError::invalid("language filter contains an empty tag"));
        }
        if self.embedding_models.iter().any(|m| m.trim().is_empty()) {
            return Err(AtelierError::invalid("model filter contains an empty name"));
        }
        Ok(())
    }

    /// Restrict to vectors from `model` unless a model filter is already set.
    /// Same-width models do not share a vector space.
    pub fn within_model_space(mut self, model: &str) -> Self {
        if self.embedding_models.is_empty() {
            self.embedding_models.push(model.to_string());
        }
        self
    }

    /// Whether a stored document passes every constraint.
    pub fn matches(&self, doc: &DocumentEmbedding) -> bool {
        if !self.document_types.is_empty() && !self.document_types.contains(&doc.document_type) {
            return false;
        }
        if !self.languages.is_empty() && !self.languages.iter().any(|l| l == &doc.language) {
            return false;
        }
        if !self.embedding_models.is_empty()
            && !self.embedding_models.iter().any(|m| m == &doc.embedding_model)
        {
            return false;
        }
        if self.created_after.is_some_and(|after| doc.created_at < after) {
            return false;
        }
        if self.created_before.is_some_and(|before| doc.created_at > before) {
            return false;
        }
        !self
            .exclude
            .iter()
            .any(|r| r.document_type == doc.document_type && r.document_id == doc.document_id)
    }
}

// ─── Stored documents ────────────────────────────────────────────────────────

/// A persisted embedding. Identity is (document_type, document_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEmbedding {
    pub document_type: DocumentType,
    pub document_id: String,
    pub content: String,
    pub vector: Vec<f32>,
    pub language: String,
    pub embedding_model: String,
    pub metadata: DocumentMetadata,
    pub confidence_score: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentEmbedding {
    pub fn reference(&self) -> DocumentRef {
        DocumentRef::new(self.document_type, self.document_id.clone())
    }
}

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
