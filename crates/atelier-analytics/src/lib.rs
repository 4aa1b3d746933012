//! # Atelier Analytics
//!
//! Append-only log of executed searches and, on request, the context windows
//! built for them. Popular prior queries feed search suggestions.

pub mod memory;
pub mod records;
pub mod sqlite;

pub use memory::MemoryQueryLog;
pub use records::{
    ContextWindowEntry, ContextWindowRecord, PopularQuery, SearchQueryRecord, normalize_query,
};
pub use sqlite::SqliteQueryLog;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use atelier_core::config::AnalyticsConfig;
use atelier_core::error::Result;

/// Query log backend. Records are never updated once written.
#[async_trait]
pub trait QueryLog: Send + Sync {
    fn name(&self) -> &str;

    async fn record_query(&self, record: &SearchQueryRecord) -> Result<()>;

    async fn record_context_window(&self, record: &ContextWindowRecord) -> Result<()>;

    /// Most frequent prior queries whose normalized text starts with `prefix`.
    async fn popular_queries(&self, prefix: &str, limit: usize) -> Result<Vec<PopularQuery>>;

    /// Newest first.
    async fn recent_queries(&self, limit: usize) -> Result<Vec<SearchQueryRecord>>;

    /// Newest first.
    async fn recent_context_windows(&self, limit: usize) -> Result<Vec<ContextWindowRecord>>;
}

/// Build the configured log; `None` when analytics is disabled.
///
/// `db_path = "memory"` keeps the log in process.
pub fn create_query_log(config: &AnalyticsConfig) -> Result<Option<Arc<dyn QueryLog>>> {
    if !config.enabled {
        return Ok(None);
    }
    let path = config.db_path.trim();
    if path == "memory" || path == ":memory:" {
        return Ok(Some(Arc::new(MemoryQueryLog::new())));
    }
    let expanded = PathBuf::from(shellexpand::tilde(path).as_ref());
    Ok(Some(Arc::new(SqliteQueryLog::open(&expanded)?)))
}
