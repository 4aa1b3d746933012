//! Similarity metrics, all oriented so that higher means closer.

use atelier_core::types::SimilarityMetric;

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

/// Cosine similarity in [-1, 1]; 0.0 when either vector is all zeros.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let denom = norm(a) * norm(b);
    if denom == 0.0 { 0.0 } else { dot(a, b) / denom }
}

pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Score `candidate` against `query`. Callers guarantee equal lengths.
pub fn similarity(metric: SimilarityMetric, query: &[f32], candidate: &[f32]) -> f32 {
    match metric {
        SimilarityMetric::Cosine => cosine(query, candidate),
        SimilarityMetric::L2 => -l2_distance(query, candidate),
        SimilarityMetric::InnerProduct => dot(query, candidate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        assert!((cosine(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-6);
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_l2_is_negated_distance() {
        let s = similarity(SimilarityMetric::L2, &[0.0, 0.0], &[3.0, 4.0]);
        assert!((s + 5.0).abs() < 1e-6);
        assert_eq!(similarity(SimilarityMetric::L2, &[1.0, 1.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_higher_is_better_for_every_metric() {
        let q = [1.0, 0.0];
        let near = [0.9, 0.1];
        let far = [-1.0, 0.0];
        for metric in [
            SimilarityMetric::Cosine,
            SimilarityMetric::L2,
            SimilarityMetric::InnerProduct,
        ] {
            assert!(similarity(metric, &q, &near) > similarity(metric, &q, &far), "{metric}");
        }
    }
}
