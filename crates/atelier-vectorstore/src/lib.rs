//! # Atelier Vector Store
//!
//! Persists document embeddings and answers ranked similarity queries.
//!
//! Backends:
//! - `memory`: brute-force, process-local
//! - `postgres`: pgvector with a size-adaptive ANN index
//!
//! All backends share the batched, retried `upsert` provided by [`VectorStore`].

pub mod index;
pub mod memory;
pub mod postgres;
pub mod similarity;
pub mod store;

pub use index::IndexStrategy;
pub use memory::MemoryVectorStore;
pub use postgres::PgVectorStore;
pub use store::{
    SearchHit, SearchOptions, StoreRecord, StoreStatistics, UpsertOptions, UpsertSummary,
    VectorStore,
};

use std::sync::Arc;

use atelier_core::config::StoreConfig;
use atelier_core::error::{AtelierError, Result};

/// Create a store from configuration. The postgres backend is migrated on open.
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config.backend.trim() {
        "memory" => Ok(Arc::new(MemoryVectorStore::new())),
        "postgres" | "pgvector" => {
            let store = PgVectorStore::connect(config).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        other => Err(AtelierError::Config(format!("Unknown store backend: {other}"))),
    }
}
