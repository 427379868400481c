//! Okapi BM25 over chunk text

use crate::meta::Chunk;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use unicode_segmentation::UnicodeSegmentation;

pub const SNAPSHOT_VERSION: u32 = 1;

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Lowercased Unicode words
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(|w| w.to_lowercase()).collect()
}

/// Chunk metadata kept alongside the lexical structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseChunkMeta {
    pub doc_id: String,
    pub chunk_index: i32,
    pub page_start: i32,
    pub page_end: i32,
    pub doc_type: String,
}

/// Serialized BM25 index of one workspace.
///
/// `chunk_ids`, `meta`, `term_freqs` and `doc_lens` are parallel arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseSnapshot {
    pub version: u32,
    pub workspace_id: String,
    pub built_at: String,
    pub chunk_ids: Vec<String>,
    pub meta: Vec<SparseChunkMeta>,
    pub term_freqs: Vec<HashMap<String, u32>>,
    pub doc_lens: Vec<u32>,
    pub doc_freqs: HashMap<String, u32>,
    pub avg_doc_len: f32,
}

impl SparseSnapshot {
    pub fn new(workspace_id: impl Into<String>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            workspace_id: workspace_id.into(),
            built_at: Utc::now().to_rfc3339(),
            chunk_ids: Vec::new(),
            meta: Vec::new(),
            term_freqs: Vec::new(),
            doc_lens: Vec::new(),
            doc_freqs: HashMap::new(),
            avg_doc_len: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    /// Add one chunk; call `finish` after the last one
    pub fn push(&mut self, chunk: &Chunk) {
        let tokens = tokenize(&chunk.text);
        let mut freqs: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *freqs.entry(token.clone()).or_insert(0) += 1;
        }
        for term in freqs.keys() {
            *self.doc_freqs.entry(term.clone()).or_insert(0) += 1;
        }

        self.chunk_ids.push(chunk.id.clone());
        self.meta.push(SparseChunkMeta {
            doc_id: chunk.doc_id.clone(),
            chunk_index: chunk.chunk_index,
            page_start: chunk.page_start,
            page_end: chunk.page_end,
            doc_type: chunk.doc_type.clone(),
        });
        self.term_freqs.push(freqs);
        self.doc_lens.push(tokens.len() as u32);
    }

    pub fn finish(&mut self) {
        self.avg_doc_len = if self.doc_lens.is_empty() {
            0.0
        } else {
            self.doc_lens.iter().map(|&l| l as f32).sum::<f32>() / self.doc_lens.len() as f32
        };
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.len() as f32;
        let df = self.doc_freqs.get(term).copied().unwrap_or(0) as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// BM25 score of every chunk for the given query tokens, in snapshot order
    pub fn score(&self, query_tokens: &[String]) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.len()];
        if self.is_empty() || query_tokens.is_empty() {
            return scores;
        }

        let avg_len = if self.avg_doc_len > 0.0 { self.avg_doc_len } else { 1.0 };

        for term in query_tokens {
            if !self.doc_freqs.contains_key(term) {
                continue;
            }
            let idf = self.idf(term);
            for (i, freqs) in self.term_freqs.iter().enumerate() {
                let Some(&tf) = freqs.get(term) else {
                    continue;
                };
                let tf = tf as f32;
                let len_norm = 1.0 - B + B * self.doc_lens[i] as f32 / avg_len;
                scores[i] += idf * tf * (K1 + 1.0) / (tf + K1 * len_norm);
            }
        }

        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Document;

    fn snapshot(texts: &[&str]) -> SparseSnapshot {
        let doc = Document::new("w1", "a.pdf");
        let mut snapshot = SparseSnapshot::new("w1");
        for (i, text) in texts.iter().enumerate() {
            snapshot.push(&Chunk::new(&doc, i as i32, 1, 1, *text));
        }
        snapshot.finish();
        snapshot
    }

    #[test]
    fn test_tokenize_lowercases_words() {
        assert_eq!(
            tokenize("The Transformer's attention, explained!"),
            vec!["the", "transformer's", "attention", "explained"]
        );
        assert!(tokenize("  ...  ").is_empty());
    }

    #[test]
    fn test_only_matching_chunks_score() {
        let snapshot = snapshot(&[
            "recurrent networks process sequences",
            "the transformer replaces recurrence with attention",
            "convolutional networks for images",
        ]);
        let scores = snapshot.score(&tokenize("Transformer"));
        assert_eq!(scores[0], 0.0);
        assert!(scores[1] > 0.0);
        assert_eq!(scores[2], 0.0);
    }

    #[test]
    fn test_rarer_terms_weigh_more() {
        let snapshot = snapshot(&[
            "networks networks",
            "networks attention",
            "networks layers",
        ]);
        assert!(snapshot.idf("attention") > snapshot.idf("networks"));

        let scores = snapshot.score(&tokenize("networks attention"));
        assert!(scores[1] > scores[0]);
        assert!(scores[1] > scores[2]);
    }

    #[test]
    fn test_shorter_chunks_win_on_equal_tf() {
        let snapshot = snapshot(&[
            "gradient descent",
            "gradient descent with momentum and adaptive learning rates for deep models",
            "unrelated words here",
        ]);
        let scores = snapshot.score(&tokenize("momentum gradient"));
        let short_only = snapshot.score(&tokenize("descent"));
        assert!(short_only[0] > short_only[1]);
        assert!(scores[1] > scores[0]);
    }

    #[test]
    fn test_empty_snapshot_scores_nothing() {
        let snapshot = snapshot(&[]);
        assert!(snapshot.score(&tokenize("anything")).is_empty());
        assert_eq!(snapshot.avg_doc_len, 0.0);
    }
}
