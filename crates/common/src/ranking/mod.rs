//! Similarity ranking
//!
//! Cosine similarity and top-N selection over in-memory candidates. Pure and
//! deterministic: no I/O, no randomness.

use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};

/// A candidate with its similarity to the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate<Id> {
    pub id: Id,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimilarityRanker;

impl SimilarityRanker {
    /// Cosine similarity of two vectors.
    ///
    /// A zero-norm side (including an empty, unavailable embedding) scores 0.
    /// Otherwise the lengths must match.
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64> {
        if a.is_empty() || b.is_empty() {
            return Ok(0.0);
        }
        if a.len() != b.len() {
            return Err(AppError::DimensionMismatch {
                expected: a.len(),
                actual: b.len(),
            });
        }

        let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
        for (x, y) in a.iter().zip(b) {
            let (x, y) = (f64::from(*x), f64::from(*y));
            dot += x * y;
            norm_a += x * x;
            norm_b += y * y;
        }

        if norm_a == 0.0 || norm_b == 0.0 {
            return Ok(0.0);
        }

        Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
    }

    /// The `n` candidates most similar to `query`, best first.
    ///
    /// Equal scores keep candidate order. Any dimension mismatch fails the
    /// whole ranking.
    pub fn top_n<Id, V>(
        query: &[f32],
        candidates: impl IntoIterator<Item = (Id, V)>,
        n: usize,
    ) -> Result<Vec<ScoredCandidate<Id>>>
    where
        V: AsRef<[f32]>,
    {
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut scored = candidates
            .into_iter()
            .map(|(id, vector)| {
                Self::cosine_similarity(query, vector.as_ref()).map(|score| ScoredCandidate { id, score })
            })
            .collect::<Result<Vec<_>>>()?;

        // sort_by is stable, so ties stay in insertion order
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(n);

        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids<Id: Clone>(ranked: &[ScoredCandidate<Id>]) -> Vec<Id> {
        ranked.iter().map(|c| c.id.clone()).collect()
    }

    #[test]
    fn test_cosine_is_symmetric() {
        let cases = [
            (vec![1.0, 2.0, 3.0], vec![-2.0, 0.5, 4.0]),
            (vec![0.3, -0.7], vec![0.9, 0.1]),
            (vec![5.0, 0.0, 0.0, 1.0], vec![1.0, 1.0, 1.0, 1.0]),
        ];
        for (a, b) in cases {
            let ab = SimilarityRanker::cosine_similarity(&a, &b).unwrap();
            let ba = SimilarityRanker::cosine_similarity(&b, &a).unwrap();
            assert_eq!(ab, ba);
            assert!((-1.0..=1.0).contains(&ab));
        }
    }

    #[test]
    fn test_self_similarity_is_one() {
        for v in [vec![1.0f32, 2.0, 3.0], vec![-0.5, 0.25], vec![7.0]] {
            let s = SimilarityRanker::cosine_similarity(&v, &v).unwrap();
            assert!((s - 1.0).abs() < 1e-9, "got {}", s);
        }
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let zero = vec![0.0f32; 3];
        let v = vec![1.0f32, 2.0, 3.0];

        assert_eq!(SimilarityRanker::cosine_similarity(&zero, &v).unwrap(), 0.0);
        assert_eq!(SimilarityRanker::cosine_similarity(&v, &zero).unwrap(), 0.0);
        assert_eq!(SimilarityRanker::cosine_similarity(&[], &v).unwrap(), 0.0);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let err = SimilarityRanker::cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            AppError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));

        let result = SimilarityRanker::top_n(&[1.0, 0.0], vec![("p1", vec![1.0f32, 0.0, 0.0])], 1);
        assert!(result.is_err());
    }

    #[test]
    fn test_top_n_ties_keep_insertion_order() {
        // Scores against the query: p1 = 0.9, p2 = 0.5, p3 = 0.9
        let query = vec![1.0f32, 0.0];
        let at = |score: f32| vec![score, (1.0 - score * score).sqrt()];
        let candidates = vec![("p1", at(0.9)), ("p2", at(0.5)), ("p3", at(0.9))];

        let ranked = SimilarityRanker::top_n(&query, candidates, 2).unwrap();
        assert_eq!(ids(&ranked), vec!["p1", "p3"]);
    }

    #[test]
    fn test_top_n_bounds() {
        let query = vec![1.0f32, 0.0];
        let candidates = vec![(1, vec![0.0f32, 1.0]), (2, vec![1.0f32, 0.0])];

        let ranked = SimilarityRanker::top_n(&query, candidates.clone(), 10).unwrap();
        assert_eq!(ids(&ranked), vec![2, 1]);
        assert!((ranked[0].score - 1.0).abs() < 1e-9);

        assert!(SimilarityRanker::top_n(&query, candidates, 0).unwrap().is_empty());
        assert!(SimilarityRanker::top_n::<i32, Vec<f32>>(&query, Vec::new(), 3)
            .unwrap()
            .is_empty());
    }
}
