use super::{ChunkFilter, ChunkPayload, DenseHit, DenseIndex, DenseRecord};
use crate::embed::cosine_similarity;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

type Collection = HashMap<String, (Vec<f32>, ChunkPayload)>;

/// Brute-force cosine index held in process memory
pub struct MemoryIndex {
    dimension: usize,
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            collections: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DenseIndex for MemoryIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn count(&self, workspace: &str) -> Result<usize> {
        let collections = self.collections.read().await;
        Ok(collections.get(workspace).map_or(0, |c| c.len()))
    }

    async fn upsert(&self, workspace: &str, records: Vec<DenseRecord>) -> Result<()> {
        if let Some(mismatch) = records.iter().find(|r| r.vector.len() != self.dimension) {
            return Err(Error::Qdrant(format!(
                "Vector dimension mismatch for workspace '{}': expected {} (got {})",
                workspace,
                self.dimension,
                mismatch.vector.len()
            )));
        }

        let mut collections = self.collections.write().await;
        let collection = collections.entry(workspace.to_string()).or_default();
        for record in records {
            collection.insert(record.chunk_id, (record.vector, record.payload));
        }
        Ok(())
    }

    async fn query(
        &self,
        workspace: &str,
        vector: &[f32],
        top_k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<DenseHit>> {
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(workspace) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<DenseHit> = collection
            .iter()
            .filter(|(_, (_, payload))| filter.matches(&payload.doc_id, &payload.doc_type))
            .map(|(chunk_id, (stored, payload))| DenseHit {
                chunk_id: chunk_id.clone(),
                score: cosine_similarity(vector, stored),
                payload: payload.clone(),
            })
            .collect();

        // chunk id breaks ties so results do not depend on map iteration order
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn reset(&self, workspace: &str) -> Result<()> {
        self.collections.write().await.remove(workspace);
        Ok(())
    }
}
