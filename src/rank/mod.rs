//! Score fusion and result diversity

mod diversity;

pub use diversity::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A scored chunk returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub chunk_id: String,
    pub doc_id: String,
    pub workspace_id: String,
    pub filename: String,
    pub page_start: i32,
    pub page_end: i32,
    pub text: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_score: Option<f32>,
}

/// Candidate from one side of a hybrid query
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub chunk_id: String,
    pub doc_id: String,
    pub score: f32,
}

/// A fused candidate with its normalized component scores
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub chunk_id: String,
    pub doc_id: String,
    pub score: f32,
    pub vector_norm: f32,
    pub bm25_norm: f32,
}

/// Scale scores into [0, 1]; a list whose scores are all equal maps to 1.0
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    let Some(min) = scores.iter().copied().reduce(f32::min) else {
        return Vec::new();
    };
    let max = scores.iter().copied().fold(min, f32::max);
    let span = max - min;
    if span <= f32::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / span).collect()
}

/// Weighted fusion of dense and sparse candidate lists
#[derive(Debug, Clone, Copy)]
pub struct FusionRanker {
    pub vector_weight: f32,
    pub bm25_weight: f32,
}

impl Default for FusionRanker {
    fn default() -> Self {
        Self {
            vector_weight: 0.55,
            bm25_weight: 0.45,
        }
    }
}

impl FusionRanker {
    pub fn new(vector_weight: f32, bm25_weight: f32) -> Self {
        Self {
            vector_weight,
            bm25_weight,
        }
    }

    /// Normalize each list on its own, then combine.
    ///
    /// A chunk missing from one list scores 0 on that side. The result is
    /// sorted best first (first-seen order on ties) and cut to `top_k`.
    pub fn fuse(
        &self,
        dense: &[Candidate],
        sparse: &[Candidate],
        top_k: usize,
    ) -> Vec<FusedCandidate> {
        let dense_norm = min_max_normalize(&dense.iter().map(|c| c.score).collect::<Vec<_>>());
        let sparse_norm = min_max_normalize(&sparse.iter().map(|c| c.score).collect::<Vec<_>>());

        let mut fused: Vec<FusedCandidate> = Vec::with_capacity(dense.len() + sparse.len());
        let mut positions: HashMap<&str, usize> = HashMap::new();

        for (candidate, norm) in dense.iter().zip(dense_norm) {
            if positions.contains_key(candidate.chunk_id.as_str()) {
                continue;
            }
            positions.insert(&candidate.chunk_id, fused.len());
            fused.push(FusedCandidate {
                chunk_id: candidate.chunk_id.clone(),
                doc_id: candidate.doc_id.clone(),
                score: 0.0,
                vector_norm: norm,
                bm25_norm: 0.0,
            });
        }

        for (candidate, norm) in sparse.iter().zip(sparse_norm) {
            match positions.get(candidate.chunk_id.as_str()) {
                Some(&i) => fused[i].bm25_norm = fused[i].bm25_norm.max(norm),
                None => {
                    positions.insert(&candidate.chunk_id, fused.len());
                    fused.push(FusedCandidate {
                        chunk_id: candidate.chunk_id.clone(),
                        doc_id: candidate.doc_id.clone(),
                        score: 0.0,
                        vector_norm: 0.0,
                        bm25_norm: norm,
                    });
                }
            }
        }

        for candidate in &mut fused {
            candidate.score =
                self.vector_weight * candidate.vector_norm + self.bm25_weight * candidate.bm25_norm;
        }

        fused.sort_by(|a, b| b.score.total_cmp(&a.score));
        fused.truncate(top_k);
        fused
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(items: &[(&str, &str, f32)]) -> Vec<Candidate> {
        items
            .iter()
            .map(|(chunk, doc, score)| Candidate {
                chunk_id: chunk.to_string(),
                doc_id: doc.to_string(),
                score: *score,
            })
            .collect()
    }

    #[test]
    fn test_min_max_normalize() {
        assert_eq!(min_max_normalize(&[2.0, 4.0, 3.0]), vec![0.0, 1.0, 0.5]);
        assert_eq!(min_max_normalize(&[0.7, 0.7]), vec![1.0, 1.0]);
        assert_eq!(min_max_normalize(&[5.0]), vec![1.0]);
        assert!(min_max_normalize(&[]).is_empty());
    }

    #[test]
    fn test_fused_scores_are_bounded_weighted_sums() {
        let dense = candidates(&[("a", "d1", 0.9), ("b", "d1", 0.5), ("c", "d2", 0.1)]);
        let sparse = candidates(&[("b", "d1", 12.0), ("d", "d3", 3.0), ("a", "d1", 6.0)]);
        let ranker = FusionRanker::default();

        let fused = ranker.fuse(&dense, &sparse, 10);
        assert_eq!(fused.len(), 4);

        for hit in &fused {
            assert!((0.0..=1.0).contains(&hit.score));
            let expected = 0.55 * hit.vector_norm + 0.45 * hit.bm25_norm;
            assert!((hit.score - expected).abs() < 1e-6);
        }

        let by_id = |id: &str| fused.iter().find(|h| h.chunk_id == id).unwrap().clone();
        assert_eq!(by_id("c").bm25_norm, 0.0);
        assert_eq!(by_id("d").vector_norm, 0.0);
        assert!((by_id("b").score - (0.55 * 0.5 + 0.45 * 1.0)).abs() < 1e-6);
        assert!(fused.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_fuse_truncates_and_handles_one_side() {
        let dense = candidates(&[("a", "d1", 0.9), ("b", "d1", 0.8), ("c", "d1", 0.7)]);
        let fused = FusionRanker::default().fuse(&dense, &[], 2);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].chunk_id, "a");
        assert!((fused[0].score - 0.55).abs() < 1e-6);
    }
}
