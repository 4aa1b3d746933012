//! Error taxonomy shared by every Atelier crate.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AtelierError>;

#[derive(Debug, Error)]
pub enum AtelierError {
    /// Empty text, malformed filters, mismatched metadata. Never retried.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported embedding model: {0}")]
    UnsupportedModel(String),

    /// Transient failure reported by an embedding provider (rate limit, 5xx).
    #[error("Provider error: {0}")]
    Provider(String),

    /// Transport-level failure talking to a provider.
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API key missing for provider: {0}")]
    ApiKeyMissing(String),

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    #[error(
        "Embedding generation failed for batch {batch_index} ({item_count} items, \
         {completed} completed before it) after {attempts} attempts: {message}"
    )]
    EmbeddingGenerationFailed {
        batch_index: usize,
        item_count: usize,
        completed: usize,
        attempts: u32,
        message: String,
    },

    /// Transient failure reported by the vector store (connection, transaction).
    #[error("Store error: {0}")]
    Store(String),

    #[error(
        "Vector store {operation} failed for batch {batch_index} ({item_count} items, \
         {completed} committed before it) after {attempts} attempts: {message}"
    )]
    VectorStoreOperationFailed {
        operation: String,
        batch_index: usize,
        item_count: usize,
        completed: usize,
        attempts: u32,
        message: String,
    },

    /// A batch rejected with a non-retryable error. `source` keeps the
    /// original kind; the position tells the caller where to resume.
    #[error(
        "{operation} batch {batch_index} ({item_count} items, {completed} completed before it) \
         rejected: {source}"
    )]
    BatchFailed {
        operation: String,
        batch_index: usize,
        item_count: usize,
        completed: usize,
        #[source]
        source: Box<AtelierError>,
    },

    #[error("Vector for model '{model}' has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        model: String,
        expected: usize,
        actual: usize,
    },

    #[error("Document not found: {document_type}/{document_id}")]
    DocumentNotFound {
        document_type: String,
        document_id: String,
    },

    #[error("Analytics error: {0}")]
    Analytics(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AtelierError {
    /// Whether a retry loop may try the failed operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AtelierError::Provider(_)
                | AtelierError::Http(_)
                | AtelierError::Timeout(_)
                | AtelierError::Store(_)
        )
    }

    /// The underlying error, looking through batch wrappers.
    pub fn root_cause(&self) -> &AtelierError {
        match self {
            AtelierError::BatchFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        AtelierError::InvalidInput(msg.into())
    }

    pub fn not_found(document_type: impl ToString, document_id: impl Into<String>) -> Self {
        AtelierError::DocumentNotFound {
            document_type: document_type.to_string(),
            document_id: document_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(AtelierError::Provider("429".into()).is_retryable());
        assert!(AtelierError::Store("connection reset".into()).is_retryable());
        assert!(AtelierError::Timeout(500).is_retryable());
        assert!(!AtelierError::invalid("empty text").is_retryable());
        assert!(!AtelierError::UnsupportedModel("nope".into()).is_retryable());
        assert!(!AtelierError::not_found("question", "q1").is_retryable());
    }

    #[test]
    fn test_batch_failure_message_carries_context() {
        let err = AtelierError::EmbeddingGenerationFailed {
            batch_index: 2,
            item_count: 50,
            completed: 100,
            attempts: 3,
            message: "rate limited".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("batch 2"));
        assert!(msg.contains("50 items"));
        assert!(msg.contains("3 attempts"));
    }

    #[test]
    fn test_batch_rejection_keeps_kind() {
        let err = AtelierError::BatchFailed {
            operation: "upsert".into(),
            batch_index: 1,
            item_count: 2,
            completed: 2,
            source: Box::new(AtelierError::invalid("duplicate key")),
        };
        assert!(!err.is_retryable());
        assert!(matches!(err.root_cause(), AtelierError::InvalidInput(_)));
        let msg = err.to_string();
        assert!(msg.contains("upsert batch 1"));
        assert!(msg.contains("2 completed before it"));
        assert!(msg.contains("duplicate key"));
    }
}
