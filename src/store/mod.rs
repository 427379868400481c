//! Dense vector index
//!
//! This module provides:
//! - The `DenseIndex` trait (one collection per workspace)
//! - A Qdrant-backed implementation
//! - An in-memory implementation
//!
//! Scores returned by `query` are similarities: higher is better.

mod memory;
mod payload;
mod qdrant;

pub use memory::*;
pub use payload::*;
pub use qdrant::*;

use crate::error::Result;
use async_trait::async_trait;
use qdrant_client::qdrant::{Condition, Filter};
use serde::{Deserialize, Serialize};

/// A nearest-neighbor result
#[derive(Debug, Clone)]
pub struct DenseHit {
    pub chunk_id: String,
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Metadata restrictions shared by dense and sparse queries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkFilter {
    pub doc_ids: Option<Vec<String>>,
    pub doc_types: Option<Vec<String>>,
}

impl ChunkFilter {
    pub fn is_empty(&self) -> bool {
        self.doc_ids.as_ref().map_or(true, |ids| ids.is_empty())
            && self.doc_types.as_ref().map_or(true, |t| t.is_empty())
    }

    /// Whether a chunk with this doc id and type passes the filter
    pub fn matches(&self, doc_id: &str, doc_type: &str) -> bool {
        let doc_ok = match &self.doc_ids {
            Some(ids) if !ids.is_empty() => ids.iter().any(|id| id == doc_id),
            _ => true,
        };
        let type_ok = match &self.doc_types {
            Some(types) if !types.is_empty() => types.iter().any(|t| t == doc_type),
            _ => true,
        };
        doc_ok && type_ok
    }

    pub(crate) fn to_qdrant_filter(&self) -> Option<Filter> {
        let mut must_conditions: Vec<Condition> = Vec::new();

        if let Some(ids) = self.doc_ids.as_ref().filter(|ids| !ids.is_empty()) {
            must_conditions.push(Condition::matches("doc_id", ids.clone()));
        }

        if let Some(types) = self.doc_types.as_ref().filter(|t| !t.is_empty()) {
            must_conditions.push(Condition::matches("doc_type", types.clone()));
        }

        if must_conditions.is_empty() {
            return None;
        }

        Some(Filter::must(must_conditions))
    }
}

/// Per-workspace nearest-neighbor collection
#[async_trait]
pub trait DenseIndex: Send + Sync {
    /// Vector dimension this index accepts
    fn dimension(&self) -> usize;

    /// Number of vectors stored for `workspace`; 0 when the collection does not exist
    async fn count(&self, workspace: &str) -> Result<usize>;

    /// Insert or overwrite vectors keyed by chunk id
    async fn upsert(&self, workspace: &str, records: Vec<DenseRecord>) -> Result<()>;

    /// Highest-similarity neighbors of `vector`, best first
    async fn query(
        &self,
        workspace: &str,
        vector: &[f32],
        top_k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<DenseHit>>;

    /// Drop every vector of `workspace`
    async fn reset(&self, workspace: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = ChunkFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches("d1", "lecture"));
        assert!(filter.to_qdrant_filter().is_none());
    }

    #[test]
    fn test_filter_to_qdrant() {
        let filter = ChunkFilter {
            doc_ids: Some(vec!["d1".to_string(), "d2".to_string()]),
            doc_types: Some(vec!["paper".to_string()]),
        };

        assert!(filter.matches("d2", "paper"));
        assert!(!filter.matches("d3", "paper"));
        assert!(!filter.matches("d1", "lecture"));

        let qdrant_filter = filter.to_qdrant_filter();
        assert!(qdrant_filter.is_some());
        assert_eq!(qdrant_filter.unwrap().must.len(), 2);
    }
}
