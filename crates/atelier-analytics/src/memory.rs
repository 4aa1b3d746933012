//! Process-local query log.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use atelier_core::error::{AtelierError, Result};

use crate::QueryLog;
use crate::records::{ContextWindowRecord, PopularQuery, SearchQueryRecord, normalize_query};

fn poisoned() -> AtelierError {
    AtelierError::Analytics("query log lock poisoned".into())
}

#[derive(Debug, Default)]
pub struct MemoryQueryLog {
    queries: RwLock<Vec<SearchQueryRecord>>,
    windows: RwLock<Vec<ContextWindowRecord>>,
}

impl MemoryQueryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Group by normalized text, most frequent first, then most recent.
/// Each group reports the text as it was last typed.
pub(crate) fn aggregate_popular<'a>(
    records: impl Iterator<Item = &'a SearchQueryRecord>,
    prefix: &str,
    limit: usize,
) -> Vec<PopularQuery> {
    let prefix = normalize_query(prefix);
    let mut groups: HashMap<String, (String, PopularQuery)> = HashMap::new();
    for record in records {
        let key = record.normalized_text();
        if key.is_empty() || !key.starts_with(&prefix) {
            continue;
        }
        groups
            .entry(key.clone())
            .and_modify(|(_, p)| {
                p.count += 1;
                if record.timestamp >= p.last_seen {
                    p.last_seen = record.timestamp;
                    p.query_text = record.query_text.trim().to_string();
                }
            })
            .or_insert_with(|| {
                (
                    key,
                    PopularQuery {
                        query_text: record.query_text.trim().to_string(),
                        count: 1,
                        last_seen: record.timestamp,
                    },
                )
            });
    }

    let mut popular: Vec<(String, PopularQuery)> = groups.into_values().collect();
    popular.sort_by(|(ka, a), (kb, b)| {
        b.count
            .cmp(&a.count)
            .then_with(|| b.last_seen.cmp(&a.last_seen))
            .then_with(|| ka.cmp(kb))
    });
    popular.into_iter().take(limit).map(|(_, p)| p).collect()
}

#[async_trait]
impl QueryLog for MemoryQueryLog {
    fn name(&self) -> &str {
        "memory"
    }

    async fn record_query(&self, record: &SearchQueryRecord) -> Result<()> {
        self.queries
            .write()
            .map_err(|_| poisoned())?
            .push(record.clone());
        Ok(())
    }

    async fn record_context_window(&self, record: &ContextWindowRecord) -> Result<()> {
        self.windows
            .write()
            .map_err(|_| poisoned())?
            .push(record.clone());
        Ok(())
    }

    async fn popular_queries(&self, prefix: &str, limit: usize) -> Result<Vec<PopularQuery>> {
        let queries = self.queries.read().map_err(|_| poisoned())?;
        Ok(aggregate_popular(queries.iter(), prefix, limit))
    }

    async fn recent_queries(&self, limit: usize) -> Result<Vec<SearchQueryRecord>> {
        let queries = self.queries.read().map_err(|_| poisoned())?;
        Ok(queries.iter().rev().take(limit).cloned().collect())
    }

    async fn recent_context_windows(&self, limit: usize) -> Result<Vec<ContextWindowRecord>> {
        let windows = self.windows.read().map_err(|_| poisoned())?;
        Ok(windows.iter().rev().take(limit).cloned().collect())
    }
}
