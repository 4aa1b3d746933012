//! PostgreSQL + pgvector backend.
//!
//! One row per (document_type, document_id), enforced by a unique
//! constraint. Vectors travel as pgvector text literals cast with `::vector`,
//! so no driver-level vector type is needed. Each batch runs in one
//! transaction; searches are plain reads and rely on MVCC for isolation.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use atelier_core::config::{IndexPolicyConfig, StoreConfig};
use atelier_core::error::{AtelierError, Result};
use atelier_core::types::{
    DocumentEmbedding, DocumentMetadata, DocumentType, SearchFilters, SimilarityMetric,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};

use crate::index::IndexStrategy;
use crate::store::{SearchHit, SearchOptions, StoreRecord, StoreStatistics, VectorStore};

pub const DEFAULT_TABLE: &str = "document_embeddings";

const COLUMNS: &str = "document_type, document_id, content, language, embedding_model, \
                       metadata, confidence_score, created_at, updated_at";

/// Map driver errors onto the retry taxonomy: data and schema errors are
/// permanent, everything else (I/O, pool exhaustion, serialization) is transient.
fn store_err(e: sqlx::Error) -> AtelierError {
    if let sqlx::Error::Database(db) = &e {
        let code = db.code().map(|c| c.to_string()).unwrap_or_default();
        if code.starts_with("22") || code.starts_with("23") {
            return AtelierError::InvalidInput(format!("database rejected data: {db}"));
        }
        if code.starts_with("42") {
            return AtelierError::Config(format!("database schema error: {db}"));
        }
    }
    AtelierError::Store(e.to_string())
}

/// `[0.1,0.2,...]` as pgvector expects it.
pub fn vector_literal(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

pub fn parse_vector_literal(text: &str) -> Result<Vec<f32>> {
    let inner = text.trim().trim_start_matches('[').trim_end_matches(']');
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|p| {
            p.trim()
                .parse::<f32>()
                .map_err(|e| AtelierError::Store(format!("bad vector component '{p}': {e}")))
        })
        .collect()
}

fn validate_identifier(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 48
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if ok {
        Ok(())
    } else {
        Err(AtelierError::Config(format!("invalid table name '{name}'")))
    }
}

/// DDL creating the extension, table and secondary indexes.
pub fn schema_sql(table: &str, dimensions: usize) -> Vec<String> {
    vec![
        "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                document_type TEXT NOT NULL,
                document_id TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding vector({dimensions}) NOT NULL,
                language TEXT NOT NULL,
                embedding_model TEXT NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                confidence_score REAL NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (document_type, document_id)
            )"
        ),
        format!("CREATE INDEX IF NOT EXISTS {table}_type_idx ON {table} (document_type)"),
        format!("CREATE INDEX IF NOT EXISTS {table}_language_idx ON {table} (language)"),
        format!("CREATE INDEX IF NOT EXISTS {table}_model_idx ON {table} (embedding_model)"),
        format!("CREATE INDEX IF NOT EXISTS {table}_created_idx ON {table} (created_at)"),
    ]
}

fn upsert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {table} (document_type, document_id, content, embedding, language, \
         embedding_model, metadata, confidence_score, created_at, updated_at) \
         VALUES ($1, $2, $3, $4::vector, $5, $6, $7, $8, $9, NOW()) \
         ON CONFLICT (document_type, document_id) DO UPDATE SET \
         content = EXCLUDED.content, embedding = EXCLUDED.embedding, \
         language = EXCLUDED.language, embedding_model = EXCLUDED.embedding_model, \
         metadata = EXCLUDED.metadata, confidence_score = EXCLUDED.confidence_score, \
         updated_at = NOW()"
    )
}

fn distance_operator(metric: SimilarityMetric) -> &'static str {
    match metric {
        SimilarityMetric::Cosine => "<=>",
        SimilarityMetric::L2 => "<->",
        SimilarityMetric::InnerProduct => "<#>",
    }
}

fn push_distance(qb: &mut QueryBuilder<'_, Postgres>, metric: SimilarityMetric, literal: &str) {
    qb.push("(embedding ")
        .push(distance_operator(metric))
        .push(" ")
        .push_bind(literal.to_string())
        .push("::vector)");
}

/// Similarity oriented so higher is better: `1 - cosine distance`,
/// negated L2 distance, and the dot product (`<#>` yields its negation).
fn push_similarity(qb: &mut QueryBuilder<'_, Postgres>, metric: SimilarityMetric, literal: &str) {
    qb.push(match metric {
        SimilarityMetric::Cosine => "(1 - ",
        SimilarityMetric::L2 | SimilarityMetric::InnerProduct => "(-",
    });
    push_distance(qb, metric, literal);
    qb.push(")");
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filters: &SearchFilters) {
    if !filters.document_types.is_empty() {
        let types: Vec<String> = filters
            .document_types
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();
        qb.push(" AND document_type = ANY(").push_bind(types).push(")");
    }
    if !filters.languages.is_empty() {
        qb.push(" AND language = ANY(")
            .push_bind(filters.languages.clone())
            .push(")");
    }
    if !filters.embedding_models.is_empty() {
        qb.push(" AND embedding_model = ANY(")
            .push_bind(filters.embedding_models.clone())
            .push(")");
    }
    if let Some(after) = filters.created_after {
        qb.push(" AND created_at >= ").push_bind(after);
    }
    if let Some(before) = filters.created_before {
        qb.push(" AND created_at <= ").push_bind(before);
    }
    for excluded in &filters.exclude {
        qb.push(" AND NOT (document_type = ")
            .push_bind(excluded.document_type.as_str().to_string())
            .push(" AND document_id = ")
            .push_bind(excluded.document_id.clone())
            .push(")");
    }
}

/// Build the ranked similarity query for `query` under `options`.
pub fn build_search_query(
    table: &str,
    query: &[f32],
    options: &SearchOptions,
) -> QueryBuilder<'static, Postgres> {
    let literal = vector_literal(query);
    let mut qb = QueryBuilder::new(format!("SELECT {COLUMNS}, "));
    if options.include_vectors {
        qb.push("embedding::text AS embedding_text, ");
    }
    push_similarity(&mut qb, options.metric, &literal);
    qb.push(" AS similarity FROM ").push(table).push(" WHERE TRUE");

    push_filters(&mut qb, &options.filters);
    if let Some(threshold) = options.threshold {
        qb.push(" AND ");
        push_similarity(&mut qb, options.metric, &literal);
        qb.push(" >= ").push_bind(threshold as f64);
    }

    // Ordering by the raw distance lets pgvector use its ANN index.
    qb.push(" ORDER BY ");
    push_distance(&mut qb, options.metric, &literal);
    qb.push(" ASC, created_at DESC, document_type, document_id LIMIT ")
        .push_bind(options.limit as i64);
    qb
}

/// A stored payload that no longer decodes is a corrupt row, not an empty one.
fn decode_metadata(document_type: &str, document_id: &str, value: serde_json::Value) -> Result<DocumentMetadata> {
    serde_json::from_value(value).map_err(|e| {
        AtelierError::Store(format!(
            "unreadable metadata for {document_type}/{document_id}: {e}"
        ))
    })
}

fn row_to_embedding(row: &PgRow, with_vector: bool) -> Result<DocumentEmbedding> {
    let document_type: String = row.try_get("document_type").map_err(store_err)?;
    let document_id: String = row.try_get("document_id").map_err(store_err)?;
    let metadata: serde_json::Value = row.try_get("metadata").map_err(store_err)?;
    let metadata = decode_metadata(&document_type, &document_id, metadata)?;
    let vector = if with_vector {
        let text: String = row.try_get("embedding_text").map_err(store_err)?;
        parse_vector_literal(&text)?
    } else {
        Vec::new()
    };

    Ok(DocumentEmbedding {
        document_type: document_type.parse()?,
        document_id,
        content: row.try_get("content").map_err(store_err)?,
        vector,
        language: row.try_get("language").map_err(store_err)?,
        embedding_model: row.try_get("embedding_model").map_err(store_err)?,
        metadata,
        confidence_score: row.try_get("confidence_score").map_err(store_err)?,
        created_at: row.try_get("created_at").map_err(store_err)?,
        updated_at: row.try_get("updated_at").map_err(store_err)?,
    })
}

pub struct PgVectorStore {
    pool: PgPool,
    table: String,
    dimensions: usize,
    index: RwLock<IndexStrategy>,
}

impl PgVectorStore {
    /// Connect using `config.database_url` (or `DATABASE_URL`).
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let url = if config.database_url.is_empty() {
            std::env::var("DATABASE_URL").unwrap_or_default()
        } else {
            config.database_url.clone()
        };
        if url.is_empty() {
            return Err(AtelierError::Config(
                "store.database_url (or DATABASE_URL) is required for the postgres backend".into(),
            ));
        }
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect(&url)
            .await
            .map_err(store_err)?;
        tracing::info!("🐘 Connected to PostgreSQL vector store");
        Self::from_pool(pool, DEFAULT_TABLE, config.dimensions)
    }

    pub fn from_pool(pool: PgPool, table: &str, dimensions: usize) -> Result<Self> {
        validate_identifier(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
            dimensions,
            index: RwLock::new(IndexStrategy::Exact),
        })
    }

    /// Create the extension, table and secondary indexes if missing.
    pub async fn migrate(&self) -> Result<()> {
        for statement in schema_sql(&self.table, self.dimensions) {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }

    async fn grouped_counts(&self, column: &str) -> Result<BTreeMap<String, usize>> {
        let sql = format!(
            "SELECT {column} AS key, COUNT(*) AS n FROM {} GROUP BY {column}",
            self.table
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.iter()
            .map(|r| {
                let key: String = r.try_get("key").map_err(store_err)?;
                let n: i64 = r.try_get("n").map_err(store_err)?;
                Ok((key, n as usize))
            })
            .collect()
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn write_batch(&self, records: &[StoreRecord], skip_existing: bool) -> Result<usize> {
        for record in records {
            record.validate()?;
            if record.vector.len() != self.dimensions {
                return Err(AtelierError::DimensionMismatch {
                    model: record.embedding_model.clone(),
                    expected: self.dimensions,
                    actual: record.vector.len(),
                });
            }
        }

        let insert = upsert_sql(&self.table);
        let delete = format!(
            "DELETE FROM {} WHERE document_type = $1 AND document_id = $2",
            self.table
        );
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(store_err)?;
        for record in records {
            if !skip_existing {
                sqlx::query(&delete)
                    .bind(record.document_type.as_str())
                    .bind(&record.document_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(store_err)?;
            }
            sqlx::query(&insert)
                .bind(record.document_type.as_str())
                .bind(&record.document_id)
                .bind(&record.content)
                .bind(vector_literal(&record.vector))
                .bind(&record.language)
                .bind(&record.embedding_model)
                .bind(serde_json::to_value(&record.metadata)?)
                .bind(record.confidence_score)
                .bind(record.created_at.unwrap_or(now))
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;
        Ok(records.len())
    }

    async fn search(&self, query: &[f32], options: &SearchOptions) -> Result<Vec<SearchHit>> {
        options.validate(query)?;
        if options.limit == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimensions {
            return Err(AtelierError::DimensionMismatch {
                model: "query".into(),
                expected: self.dimensions,
                actual: query.len(),
            });
        }

        let mut qb = build_search_query(&self.table, query, options);
        let rows = qb.build().fetch_all(&self.pool).await.map_err(store_err)?;

        rows.iter()
            .map(|row| {
                let mut document = row_to_embedding(row, options.include_vectors)?;
                if !options.include_metadata {
                    document.metadata = DocumentMetadata::default();
                }
                let similarity: f64 = row.try_get("similarity").map_err(store_err)?;
                Ok(SearchHit {
                    document,
                    similarity: similarity as f32,
                })
            })
            .collect()
    }

    async fn get(
        &self,
        document_type: DocumentType,
        document_id: &str,
    ) -> Result<Option<DocumentEmbedding>> {
        let sql = format!(
            "SELECT {COLUMNS}, embedding::text AS embedding_text FROM {} \
             WHERE document_type = $1 AND document_id = $2",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(document_type.as_str())
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        row.map(|r| row_to_embedding(&r, true)).transpose()
    }

    async fn delete(&self, document_type: DocumentType, document_id: &str) -> Result<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE document_type = $1 AND document_id = $2",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(document_type.as_str())
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", self.table);
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        let n: i64 = row.try_get("n").map_err(store_err)?;
        Ok(n as usize)
    }

    async fn statistics(&self) -> Result<StoreStatistics> {
        let sql = format!(
            "SELECT COUNT(*) AS total, \
             COALESCE(AVG(vector_dims(embedding)), 0)::float8 AS average_dimension, \
             MIN(created_at) AS oldest, MAX(created_at) AS newest FROM {}",
            self.table
        );
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        let total: i64 = row.try_get("total").map_err(store_err)?;
        let oldest: Option<DateTime<Utc>> = row.try_get("oldest").map_err(store_err)?;
        let newest: Option<DateTime<Utc>> = row.try_get("newest").map_err(store_err)?;

        Ok(StoreStatistics {
            total_embeddings: total as usize,
            by_type: self.grouped_counts("document_type").await?,
            by_language: self.grouped_counts("language").await?,
            by_model: self.grouped_counts("embedding_model").await?,
            average_dimension: row.try_get("average_dimension").map_err(store_err)?,
            oldest,
            newest,
        })
    }

    async fn health_check(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("⚠️ PostgreSQL health check failed: {e}");
                false
            }
        }
    }

    async fn ensure_index(
        &self,
        policy: &IndexPolicyConfig,
        metric: SimilarityMetric,
    ) -> Result<IndexStrategy> {
        let rows = self.count().await?;
        let strategy = IndexStrategy::for_row_count(rows, policy);

        for drop in strategy.drop_other_indexes_sql(&self.table) {
            sqlx::query(&drop)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        }
        if let Some(create) = strategy.create_index_sql(&self.table, metric) {
            sqlx::query(&create)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        }
        let analyze = format!("ANALYZE {}", self.table);
        sqlx::query(&analyze)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        if let Ok(mut current) = self.index.write() {
            *current = strategy;
        }
        tracing::info!("🗂️ {}: {rows} rows → {strategy}", self.table);
        Ok(strategy)
    }

    fn current_index_strategy(&self) -> IndexStrategy {
        self.index.read().map(|s| *s).unwrap_or_default()
    }
}
