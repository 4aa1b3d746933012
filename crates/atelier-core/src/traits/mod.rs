pub mod provider;

pub use provider::{EmbeddingProvider, ProviderEmbeddings};
