//! # Atelier Core
//!
//! Shared building blocks for the retrieval-augmented generation pipeline:
//! configuration, the error taxonomy, the retry policy, document kinds,
//! the embedding-model registry and the provider trait.
//!
//! ## Pipeline
//! ```text
//! text ──► EmbeddingGenerator ──► vector ──► VectorStore.upsert
//!
//! query ─► EmbeddingGenerator ─► VectorStore.search ─► RagEngine ─► context window
//!                                        │
//!                                        └──► SemanticSearch (facets, suggestions)
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod retry;
pub mod traits;
pub mod types;

pub use config::AtelierConfig;
pub use error::{AtelierError, Result};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use traits::EmbeddingProvider;
