use super::{ChunkFilter, ChunkPayload, DenseHit, DenseIndex, DenseRecord};
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, Distance, GetCollectionInfoResponse,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Qdrant-backed dense index, one collection per workspace
pub struct QdrantIndex {
    client: Qdrant,
    prefix: String,
    dimension: usize,
}

impl QdrantIndex {
    /// Connect to Qdrant using config
    pub fn connect(config: &Config) -> Result<Self> {
        Self::new(
            &config.qdrant_url,
            config.qdrant_api_key(),
            &config.collection_prefix,
            config.embedding.resolved_dimension(),
        )
    }

    pub fn new(
        url: &str,
        api_key: Option<String>,
        prefix: &str,
        dimension: usize,
    ) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .skip_compatibility_check()
            .build()
            .map_err(|e| Error::Qdrant(e.to_string()))?;

        Ok(Self {
            client,
            prefix: prefix.to_string(),
            dimension,
        })
    }

    /// Collection name for a workspace
    pub fn collection_name(&self, workspace: &str) -> String {
        let sanitized: String = workspace
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}_{}", self.prefix, sanitized)
    }

    /// Ensure the collection exists with the expected vector size
    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        if self.client.collection_exists(collection).await? {
            let info = self.client.collection_info(collection).await?;
            if let Some(size) = extract_vector_size(&info) {
                if size as usize != self.dimension {
                    return Err(Error::Qdrant(format!(
                        "Collection '{}' has vector size {}, but the embedding model produces {}. \
                         Reset the index to rebuild it.",
                        collection, size, self.dimension
                    )));
                }
            }
            return Ok(());
        }

        info!(
            "Creating collection {} with dimension {}",
            collection, self.dimension
        );

        self.client
            .create_collection(
                CreateCollectionBuilder::new(collection)
                    .vectors_config(VectorParamsBuilder::new(
                        self.dimension as u64,
                        Distance::Cosine,
                    )),
            )
            .await?;
        Ok(())
    }

    fn check_dimension(&self, collection: &str, records: &[DenseRecord]) -> Result<()> {
        if let Some(mismatch) = records.iter().find(|r| r.vector.len() != self.dimension) {
            return Err(Error::Qdrant(format!(
                "Vector dimension mismatch for collection '{}': expected {} (got {})",
                collection,
                self.dimension,
                mismatch.vector.len()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DenseIndex for QdrantIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn count(&self, workspace: &str) -> Result<usize> {
        let collection = self.collection_name(workspace);
        if !self.client.collection_exists(&collection).await? {
            return Ok(0);
        }

        let response = self
            .client
            .count(CountPointsBuilder::new(&collection).exact(true))
            .await?;
        Ok(response.result.map(|r| r.count).unwrap_or(0) as usize)
    }

    async fn upsert(&self, workspace: &str, records: Vec<DenseRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let collection = self.collection_name(workspace);
        self.check_dimension(&collection, &records)?;
        self.ensure_collection(&collection).await?;

        debug!(
            "Upserting {} points to collection {}",
            records.len(),
            collection
        );

        let points = records.into_iter().map(|r| r.to_point_struct()).collect::<Vec<_>>();
        self.client
            .upsert_points(UpsertPointsBuilder::new(&collection, points).wait(true))
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        workspace: &str,
        vector: &[f32],
        top_k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<DenseHit>> {
        let collection = self.collection_name(workspace);
        if !self.client.collection_exists(&collection).await? {
            return Ok(Vec::new());
        }

        debug!("Searching collection {} with limit {}", collection, top_k);

        let mut search = SearchPointsBuilder::new(&collection, vector.to_vec(), top_k as u64)
            .with_payload(true);
        if let Some(qdrant_filter) = filter.to_qdrant_filter() {
            search = search.filter(qdrant_filter);
        }

        let response = self.client.search_points(search).await?;

        let hits = response
            .result
            .into_iter()
            .filter_map(|point| {
                let map: Map<String, Value> = point
                    .payload
                    .into_iter()
                    .map(|(k, v)| (k, super::payload::json_from_qdrant_value(v)))
                    .collect();
                match ChunkPayload::from_json_map(map) {
                    Some(payload) => Some(DenseHit {
                        chunk_id: payload.chunk_id.clone(),
                        score: point.score,
                        payload,
                    }),
                    None => {
                        warn!(collection = %collection, "Skipping point with unreadable payload");
                        None
                    }
                }
            })
            .collect();

        Ok(hits)
    }

    async fn reset(&self, workspace: &str) -> Result<()> {
        let collection = self.collection_name(workspace);
        if self.client.collection_exists(&collection).await? {
            info!("Deleting existing collection {}", collection);
            self.client.delete_collection(&collection).await?;
        }
        self.ensure_collection(&collection).await
    }
}

fn extract_vector_size(info: &GetCollectionInfoResponse) -> Option<u64> {
    let result = info.result.as_ref()?;
    let config = result.config.as_ref()?;
    let params = config.params.as_ref()?;
    let vectors_config = params.vectors_config.as_ref()?;

    match vectors_config.config.as_ref()? {
        qdrant_client::qdrant::vectors_config::Config::Params(params) => Some(params.size),
        qdrant_client::qdrant::vectors_config::Config::ParamsMap(map) => {
            map.map.values().next().map(|p| p.size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{Chunk, Document};

    fn index() -> QdrantIndex {
        QdrantIndex::new("http://127.0.0.1:6334", None, "stacks", 3)
            .expect("index should initialize")
    }

    #[test]
    fn test_collection_name_is_sanitized() {
        let index = index();
        assert_eq!(index.collection_name("course-101"), "stacks_course-101");
        assert_eq!(index.collection_name("my space/x"), "stacks_my_space_x");
    }

    #[tokio::test]
    async fn test_upsert_rejects_dimension_mismatch() {
        let doc = Document::new("w1", "a.pdf");
        let chunk = Chunk::new(&doc, 0, 1, 1, "text");
        let record = DenseRecord::from_chunk(&chunk, vec![0.1, 0.2]);

        let err = index()
            .upsert("w1", vec![record])
            .await
            .expect_err("should reject mismatched vector length");

        match err {
            Error::Qdrant(message) => assert!(message.contains("Vector dimension mismatch")),
            other => panic!("expected qdrant error, got {other:?}"),
        }
    }
}
