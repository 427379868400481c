//! Batched, cache-assisted embedding

use super::Embedder;
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// Cache key for a text under a given model
pub fn cache_key(model: &str, text: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(model.as_bytes());
    hasher.update(&[0u8]);
    hasher.update(text.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Embeds texts in fixed-size batches with an optional content-hash cache
#[derive(Clone)]
pub struct EmbeddingPipeline {
    embedder: Arc<dyn Embedder>,
    cache: Option<MetaDb>,
    batch_size: usize,
    concurrency: usize,
}

impl EmbeddingPipeline {
    pub fn new(embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self {
            embedder,
            cache: None,
            batch_size: batch_size.max(1),
            concurrency: 1,
        }
    }

    /// Look up and store vectors in the metadata database
    pub fn with_cache(mut self, db: MetaDb) -> Self {
        self.cache = Some(db);
        self
    }

    /// Allow up to `concurrency` batches in flight
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    /// Embed `texts`, returning one vector per text in input order
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.embedder.model_name().to_string();
        let keys: Vec<String> = texts.iter().map(|t| cache_key(&model, t)).collect();
        let mut resolved: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

        if let Some(db) = &self.cache {
            match db.get_cached_embeddings(&keys).await {
                Ok(hits) => {
                    for (slot, key) in resolved.iter_mut().zip(&keys) {
                        if let Some(vector) = hits.get(key) {
                            *slot = Some(vector.clone());
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Embedding cache lookup failed; embedding everything"),
            }
        }

        let misses: Vec<usize> = resolved
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_none())
            .map(|(i, _)| i)
            .collect();

        debug!(
            total = texts.len(),
            cached = texts.len() - misses.len(),
            "Embedding texts"
        );

        if !misses.is_empty() {
            let miss_texts: Vec<String> = misses.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.embed_uncached(miss_texts).await?;

            let mut fresh = Vec::with_capacity(misses.len());
            for (&i, vector) in misses.iter().zip(vectors) {
                if self.cache.is_some() {
                    fresh.push((keys[i].clone(), vector.clone()));
                }
                resolved[i] = Some(vector);
            }

            if let Some(db) = &self.cache {
                if let Err(e) = db.put_cached_embeddings(&model, &fresh).await {
                    warn!(error = %e, "Failed to write embedding cache");
                }
            }
        }

        resolved
            .into_iter()
            .map(|v| {
                v.ok_or_else(|| {
                    Error::Configuration("Embedding provider returned too few vectors".to_string())
                })
            })
            .collect()
    }

    /// Embed a single query text
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Configuration("No embedding returned".to_string()))
    }

    /// Batches run with bounded parallelism; `buffered` keeps batch order and the
    /// first failing batch fails the whole call
    async fn embed_uncached(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let batches: Vec<Vec<String>> = texts
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        let results: Vec<Vec<Vec<f32>>> = stream::iter(batches)
            .map(|batch| {
                let embedder = Arc::clone(&self.embedder);
                async move {
                    let expected = batch.len();
                    let vectors = embedder.embed(batch).await?;
                    if vectors.len() != expected {
                        return Err(Error::Configuration(format!(
                            "Embedding provider returned {} vectors for a batch of {}",
                            vectors.len(),
                            expected
                        )));
                    }
                    Ok(vectors)
                }
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        Ok(results.into_iter().flatten().collect())
    }
}
