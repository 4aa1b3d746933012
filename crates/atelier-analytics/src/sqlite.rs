//! SQLite query log.
//!
//! Rows are append-only. Timestamps are stored as fixed-width RFC 3339 UTC
//! strings so lexical order matches time order.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use atelier_core::error::{AtelierError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::QueryLog;
use crate::records::{ContextWindowRecord, PopularQuery, SearchQueryRecord, normalize_query};

fn db_err(e: rusqlite::Error) -> AtelierError {
    AtelierError::Analytics(e.to_string())
}

fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

/// Escape LIKE wildcards so the prefix matches literally.
fn like_prefix(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS search_queries (
        id TEXT PRIMARY KEY,
        query_text TEXT NOT NULL,
        normalized_text TEXT NOT NULL,
        query_vector TEXT NOT NULL DEFAULT '[]',
        result_count INTEGER NOT NULL,
        average_similarity REAL NOT NULL,
        latency_ms INTEGER NOT NULL,
        filters TEXT NOT NULL DEFAULT '{}',
        metric TEXT NOT NULL,
        threshold REAL,
        user_id TEXT,
        session_id TEXT,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS search_queries_normalized_idx ON search_queries (normalized_text);
    CREATE INDEX IF NOT EXISTS search_queries_created_idx ON search_queries (created_at);
    CREATE TABLE IF NOT EXISTS context_windows (
        id TEXT PRIMARY KEY,
        query_id TEXT,
        query_text TEXT NOT NULL,
        documents TEXT NOT NULL,
        total_tokens INTEGER NOT NULL,
        max_tokens INTEGER NOT NULL,
        truncated INTEGER NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS context_windows_created_idx ON context_windows (created_at);
";

pub struct SqliteQueryLog {
    conn: Mutex<Connection>,
}

impl SqliteQueryLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(db_err)?;
        tracing::debug!("📊 Analytics database: {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(db_err)?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| AtelierError::Analytics(e.to_string()))
    }

    /// Number of recorded queries.
    pub fn query_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM search_queries", [], |r| r.get(0))
            .map_err(db_err)?;
        Ok(n as usize)
    }

    /// Look up one query by id.
    pub fn get_query(&self, id: &str) -> Result<Option<SearchQueryRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {QUERY_COLUMNS} FROM search_queries WHERE id = ?1"),
                params![id],
                |row| Ok(read_query(row)),
            )
            .optional()
            .map_err(db_err)?;
        row.transpose()
    }
}

const QUERY_COLUMNS: &str = "id, query_text, query_vector, result_count, average_similarity, \
                             latency_ms, filters, metric, threshold, user_id, session_id, created_at";

/// Decode a `search_queries` row. JSON columns that fail to parse are errors.
fn read_query(row: &Row<'_>) -> Result<SearchQueryRecord> {
    let vector: String = row.get(2).map_err(db_err)?;
    let filters: String = row.get(6).map_err(db_err)?;
    let metric: String = row.get(7).map_err(db_err)?;
    let created_at: String = row.get(11).map_err(db_err)?;
    Ok(SearchQueryRecord {
        id: row.get(0).map_err(db_err)?,
        query_text: row.get(1).map_err(db_err)?,
        query_vector: serde_json::from_str(&vector)?,
        result_count: row.get::<_, i64>(3).map_err(db_err)? as usize,
        average_similarity: row.get::<_, f64>(4).map_err(db_err)? as f32,
        latency_ms: row.get::<_, i64>(5).map_err(db_err)? as u64,
        filters: serde_json::from_str(&filters)?,
        metric: metric.parse()?,
        threshold: row.get::<_, Option<f64>>(8).map_err(db_err)?.map(|t| t as f32),
        user_id: row.get(9).map_err(db_err)?,
        session_id: row.get(10).map_err(db_err)?,
        timestamp: parse_timestamp(&created_at),
    })
}

#[async_trait]
impl QueryLog for SqliteQueryLog {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn record_query(&self, record: &SearchQueryRecord) -> Result<()> {
        let vector = serde_json::to_string(&record.query_vector)?;
        let filters = serde_json::to_string(&record.filters)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO search_queries (id, query_text, normalized_text, query_vector, result_count,
                average_similarity, latency_ms, filters, metric, threshold, user_id, session_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.id,
                record.query_text,
                record.normalized_text(),
                vector,
                record.result_count as i64,
                record.average_similarity as f64,
                record.latency_ms as i64,
                filters,
                record.metric.as_str(),
                record.threshold.map(|t| t as f64),
                record.user_id,
                record.session_id,
                timestamp(&record.timestamp),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn record_context_window(&self, record: &ContextWindowRecord) -> Result<()> {
        let documents = serde_json::to_string(&record.documents)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO context_windows (id, query_id, query_text, documents, total_tokens,
                max_tokens, truncated, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.query_id,
                record.query_text,
                documents,
                record.total_tokens as i64,
                record.max_tokens as i64,
                record.truncated,
                timestamp(&record.timestamp),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn popular_queries(&self, prefix: &str, limit: usize) -> Result<Vec<PopularQuery>> {
        let pattern = like_prefix(&normalize_query(prefix));
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT g.n, g.last_seen,
                        (SELECT q.query_text FROM search_queries q
                         WHERE q.normalized_text = g.normalized_text
                         ORDER BY q.created_at DESC, q.rowid DESC LIMIT 1) AS latest_text
                 FROM (SELECT normalized_text, COUNT(*) AS n, MAX(created_at) AS last_seen
                       FROM search_queries
                       WHERE normalized_text LIKE ?1 ESCAPE '\\' AND normalized_text != ''
                       GROUP BY normalized_text) g
                 ORDER BY g.n DESC, g.last_seen DESC, g.normalized_text ASC
                 LIMIT ?2",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![pattern, limit as i64], |row| {
                Ok(PopularQuery {
                    query_text: row.get::<_, String>(2)?.trim().to_string(),
                    count: row.get::<_, i64>(0)? as usize,
                    last_seen: parse_timestamp(&row.get::<_, String>(1)?),
                })
            })
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    async fn recent_queries(&self, limit: usize) -> Result<Vec<SearchQueryRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {QUERY_COLUMNS} FROM search_queries ORDER BY created_at DESC, rowid DESC LIMIT ?1"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| Ok(read_query(row)))
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)??);
        }
        Ok(out)
    }

    async fn recent_context_windows(&self, limit: usize) -> Result<Vec<ContextWindowRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, query_id, query_text, documents, total_tokens, max_tokens, truncated, created_at
                 FROM context_windows ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, bool>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .map_err(db_err)?;

        let mut out = Vec::new();
        for row in rows {
            let (id, query_id, query_text, documents, total, max, truncated, created_at) =
                row.map_err(db_err)?;
            out.push(ContextWindowRecord {
                id,
                query_id,
                query_text,
                documents: serde_json::from_str(&documents)?,
                total_tokens: total as usize,
                max_tokens: max as usize,
                truncated,
                timestamp: parse_timestamp(&created_at),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::ContextWindowEntry;
    use atelier_core::types::{DocumentType, SearchFilters, SimilarityMetric};

    fn query(text: &str) -> SearchQueryRecord {
        let mut record = SearchQueryRecord::new(text, SimilarityMetric::Cosine);
        record.query_vector = vec![0.5, 0.5];
        record.result_count = 2;
        record.average_similarity = 0.75;
        record.threshold = Some(0.5);
        record.filters = SearchFilters {
            languages: vec!["en".into()],
            ..Default::default()
        };
        record
    }

    #[tokio::test]
    async fn test_record_and_read_back() {
        let log = SqliteQueryLog::open_in_memory().unwrap();
        let record = query("workshop pacing");
        log.record_query(&record).await.unwrap();

        let stored = log.get_query(&record.id).unwrap().unwrap();
        assert_eq!(stored.query_text, "workshop pacing");
        assert_eq!(stored.query_vector, vec![0.5, 0.5]);
        assert_eq!(stored.filters.languages, vec!["en".to_string()]);
        assert_eq!(stored.threshold, Some(0.5));
        assert_eq!(log.query_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let log = SqliteQueryLog::open_in_memory().unwrap();
        let record = query("pacing");
        log.record_query(&record).await.unwrap();
        assert!(matches!(
            log.record_query(&record).await,
            Err(AtelierError::Analytics(_))
        ));
    }

    #[tokio::test]
    async fn test_popular_with_prefix() {
        let log = SqliteQueryLog::open_in_memory().unwrap();
        for text in ["Workshop pacing", "workshop pacing", "workshop venue", "100% noise"] {
            log.record_query(&query(text)).await.unwrap();
        }
        let popular = log.popular_queries("WORK", 5).await.unwrap();
        assert_eq!(popular.len(), 2);
        assert_eq!(popular[0].query_text, "workshop pacing");
        assert_eq!(popular[0].count, 2);
        assert_eq!(popular[1].query_text, "workshop venue");

        // Wildcards in the prefix match literally.
        assert!(log.popular_queries("1%", 5).await.unwrap().is_empty());
        assert_eq!(log.popular_queries("100%", 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_popular_keeps_latest_spelling() {
        let log = SqliteQueryLog::open_in_memory().unwrap();
        let older = query("workshop pacing");
        let mut newer = query("Workshop Pacing");
        newer.timestamp = older.timestamp + chrono::Duration::seconds(5);
        log.record_query(&newer).await.unwrap();
        log.record_query(&older).await.unwrap();
        let popular = log.popular_queries("work", 5).await.unwrap();
        assert_eq!(popular.len(), 1);
        assert_eq!(popular[0].query_text, "Workshop Pacing");
        assert_eq!(popular[0].count, 2);
    }

    #[tokio::test]
    async fn test_context_window_round_trip() {
        let log = SqliteQueryLog::open_in_memory().unwrap();
        let mut record = ContextWindowRecord::new("pacing", 100);
        record.documents.push(ContextWindowEntry {
            document_type: DocumentType::Question,
            document_id: "q1".into(),
            relevance: 0.9,
            tokens: 7,
            truncated: false,
        });
        record.total_tokens = 7;
        log.record_context_window(&record).await.unwrap();

        let windows = log.recent_context_windows(10).await.unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].documents[0].document_id, "q1");
        assert_eq!(windows[0].total_tokens, 7);
        assert!(!windows[0].truncated);
    }

    #[test]
    fn test_like_prefix_escapes() {
        assert_eq!(like_prefix("a_b%"), "a\\_b\\%%");
    }
}
