//! Deterministic embedders for tests

use super::{normalize_embedding, Embedder};
use crate::error::{Error, Result};
use crate::sparse::tokenize;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Bag-of-words vectors: each token hashes into one of `dimension` buckets.
///
/// Texts sharing words get high cosine similarity, which is enough to make
/// dense retrieval behave sensibly in tests.
pub struct HashingEmbedder {
    dimension: usize,
    batches: AtomicUsize,
    texts: AtomicUsize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            batches: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
        }
    }

    pub fn batches_seen(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn texts_seen(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let bucket = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]) as usize
                % self.dimension;
            vector[bucket] += 1.0;
        }
        normalize_embedding(&vector)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hashing-test"
    }
}

/// An embedder whose provider is never reachable
pub struct FailingEmbedder {
    dimension: usize,
}

impl FailingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Err(Error::Configuration(
            "embedding backend unreachable".to_string(),
        ))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "failing-test"
    }
}
