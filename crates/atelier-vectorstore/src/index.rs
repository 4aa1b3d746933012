//! Size-adaptive index policy.
//!
//! Small tables are scanned exactly. Mid-sized tables get a clustering
//! (IVFFlat) index; large ones a graph (HNSW) index. The choice is advisory
//! and is re-evaluated from the current row count each time
//! `VectorStore::ensure_index` runs.

use std::fmt;

use atelier_core::config::IndexPolicyConfig;
use atelier_core::types::SimilarityMetric;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexStrategy {
    #[default]
    Exact,
    IvfFlat { lists: u32 },
    Hnsw { m: u32, ef_construction: u32 },
}

impl fmt::Display for IndexStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexStrategy::Exact => f.write_str("exact"),
            IndexStrategy::IvfFlat { lists } => write!(f, "ivfflat(lists={lists})"),
            IndexStrategy::Hnsw { m, ef_construction } => {
                write!(f, "hnsw(m={m}, ef_construction={ef_construction})")
            }
        }
    }
}

impl IndexStrategy {
    /// Pick the strategy for a table holding `rows` vectors.
    pub fn for_row_count(rows: usize, policy: &IndexPolicyConfig) -> Self {
        if rows < policy.exact_threshold {
            IndexStrategy::Exact
        } else if rows < policy.hnsw_threshold {
            // pgvector guidance: rows / 1000 lists for tables up to ~1M rows.
            let lists = policy
                .ivfflat_lists
                .unwrap_or_else(|| (rows / 1000).clamp(1, 1000) as u32);
            IndexStrategy::IvfFlat { lists }
        } else {
            IndexStrategy::Hnsw {
                m: policy.hnsw_m,
                ef_construction: policy.hnsw_ef_construction,
            }
        }
    }

    pub fn method(&self) -> Option<&'static str> {
        match self {
            IndexStrategy::Exact => None,
            IndexStrategy::IvfFlat { .. } => Some("ivfflat"),
            IndexStrategy::Hnsw { .. } => Some("hnsw"),
        }
    }

    /// Index name for `table` under this strategy.
    pub fn index_name(&self, table: &str) -> Option<String> {
        self.method().map(|m| format!("{table}_embedding_{m}_idx"))
    }

    /// `CREATE INDEX` statement for pgvector, or `None` for exact search.
    pub fn create_index_sql(&self, table: &str, metric: SimilarityMetric) -> Option<String> {
        let name = self.index_name(table)?;
        let ops = operator_class(metric);
        let with = match self {
            IndexStrategy::Exact => return None,
            IndexStrategy::IvfFlat { lists } => format!("lists = {lists}"),
            IndexStrategy::Hnsw { m, ef_construction } => {
                format!("m = {m}, ef_construction = {ef_construction}")
            }
        };
        let method = self.method()?;
        Some(format!(
            "CREATE INDEX IF NOT EXISTS {name} ON {table} USING {method} (embedding {ops}) WITH ({with})"
        ))
    }

    /// `DROP INDEX` statements for every approximate index other than this one.
    pub fn drop_other_indexes_sql(&self, table: &str) -> Vec<String> {
        ["ivfflat", "hnsw"]
            .into_iter()
            .filter(|m| self.method() != Some(*m))
            .map(|m| format!("DROP INDEX IF EXISTS {table}_embedding_{m}_idx"))
            .collect()
    }
}

/// pgvector operator class for a metric.
pub fn operator_class(metric: SimilarityMetric) -> &'static str {
    match metric {
        SimilarityMetric::Cosine => "vector_cosine_ops",
        SimilarityMetric::L2 => "vector_l2_ops",
        SimilarityMetric::InnerProduct => "vector_ip_ops",
    }
}
