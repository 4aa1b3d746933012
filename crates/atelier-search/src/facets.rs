//! Facet counts over a candidate pool.

use std::collections::BTreeMap;

use atelier_core::types::DocumentEmbedding;
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Facets {
    pub by_type: BTreeMap<String, usize>,
    pub by_language: BTreeMap<String, usize>,
    /// Keyed by `YYYY-MM` of `created_at`.
    pub by_month: BTreeMap<String, usize>,
}

pub fn month_bucket(t: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", t.year(), t.month())
}

pub fn compute_facets<'a>(documents: impl IntoIterator<Item = &'a DocumentEmbedding>) -> Facets {
    let mut facets = Facets::default();
    for doc in documents {
        *facets.by_type.entry(doc.document_type.to_string()).or_default() += 1;
        *facets.by_language.entry(doc.language.clone()).or_default() += 1;
        *facets.by_month.entry(month_bucket(doc.created_at)).or_default() += 1;
    }
    facets
}
