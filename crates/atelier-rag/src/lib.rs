//! # Atelier RAG
//!
//! Builds grounded context for a downstream language model:
//! embed the query, search the store, rank candidates, pack them into a
//! token-bounded window and, optionally, render an augmented prompt.
//!
//! ```text
//! query ─► embed ─► search ─► rank ─► dedup ─► budget/truncate ─► RagResult
//!                                                                    │
//!                                          generate_augmented_prompt ◄┘
//! ```

pub mod context;
pub mod engine;
pub mod ingest;
pub mod prompt;
pub mod ranking;

pub use context::{
    ContextDocument, ContextOptions, ContextWindow, ContextWindowSummary, TruncationStrategy,
    build_context_window, truncate_text,
};
pub use engine::{RagEngine, RagOptions, RagPerformance, RagResult};
pub use ingest::{DocumentChange, DocumentIndexer, IndexingSummary, parse_jsonl};
pub use prompt::{PromptFormat, PromptOptions, generate_augmented_prompt};
pub use ranking::{RankedDocument, RankingWeights, rank};
