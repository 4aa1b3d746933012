//! # Atelier Search
//!
//! User-facing semantic search over the same generator and store the RAG
//! engine uses: query-type dispatch, facets, multilingual bias and
//! suggestions drawn from the query log.

pub mod facets;
pub mod search;

pub use facets::{Facets, compute_facets};
pub use search::{
    QueryType, SearchResultItem, SemanticSearch, SemanticSearchOptions, SemanticSearchResponse,
};
