//! Vector, BM25 and hybrid retrieval over one workspace

use crate::embed::EmbeddingPipeline;
use crate::error::{Error, Result};
use crate::meta::{LiveChunk, MetaDb};
use crate::rank::{diversify, Candidate, FusedCandidate, FusionRanker, Hit};
use crate::sparse::SparseIndex;
use crate::store::{ChunkFilter, DenseIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    Vector,
    Bm25,
    Hybrid,
}

impl RetrievalMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RetrievalMode::Vector => "vector",
            RetrievalMode::Bm25 => "bm25",
            RetrievalMode::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "vector" | "dense" => Ok(RetrievalMode::Vector),
            "bm25" | "sparse" | "keyword" => Ok(RetrievalMode::Bm25),
            "hybrid" => Ok(RetrievalMode::Hybrid),
            other => Err(Error::retrieval(format!(
                "Unknown retrieval mode '{}' (expected vector, bm25 or hybrid)",
                other
            ))),
        }
    }
}

/// Per-document spreading applied after fusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diversity {
    pub max_per_doc: usize,
    pub min_docs: usize,
}

#[derive(Debug, Clone)]
pub struct RetrieveRequest {
    pub query: String,
    pub mode: RetrievalMode,
    pub top_k: usize,
    pub filter: ChunkFilter,
    pub diversity: Option<Diversity>,
}

impl RetrieveRequest {
    pub fn new(query: impl Into<String>, mode: RetrievalMode, top_k: usize) -> Self {
        Self {
            query: query.into(),
            mode,
            top_k,
            filter: ChunkFilter::default(),
            diversity: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Retrieval {
    pub hits: Vec<Hit>,
    /// Differs from the requested mode when hybrid fell back to BM25
    pub mode_used: RetrievalMode,
}

pub struct Retriever {
    db: MetaDb,
    dense: Arc<dyn DenseIndex>,
    sparse: SparseIndex,
    pipeline: EmbeddingPipeline,
    ranker: FusionRanker,
    candidate_multiplier: usize,
}

impl Retriever {
    pub fn new(
        db: MetaDb,
        dense: Arc<dyn DenseIndex>,
        sparse: SparseIndex,
        pipeline: EmbeddingPipeline,
        ranker: FusionRanker,
        candidate_multiplier: usize,
    ) -> Self {
        Self {
            db,
            dense,
            sparse,
            pipeline,
            ranker,
            candidate_multiplier: candidate_multiplier.max(1),
        }
    }

    pub async fn retrieve(&self, workspace: &str, request: &RetrieveRequest) -> Result<Retrieval> {
        if request.top_k == 0 || request.query.trim().is_empty() {
            return Ok(Retrieval {
                hits: Vec::new(),
                mode_used: request.mode,
            });
        }

        let depth = if request.mode == RetrievalMode::Hybrid || request.diversity.is_some() {
            request.top_k * self.candidate_multiplier
        } else {
            request.top_k
        };

        let (fused, mode_used) = match request.mode {
            RetrievalMode::Vector => {
                let dense = self
                    .dense_candidates(workspace, request, depth)
                    .await
                    .map_err(Error::surface_for_retrieval)?;
                (self.single_side(dense, true), RetrievalMode::Vector)
            }
            RetrievalMode::Bm25 => {
                let sparse = self.sparse_candidates(workspace, request, depth).await?;
                (self.single_side(sparse, false), RetrievalMode::Bm25)
            }
            RetrievalMode::Hybrid => {
                let sparse = self.sparse_candidates(workspace, request, depth).await?;
                match self.dense_candidates(workspace, request, depth).await {
                    Ok(dense) => (self.ranker.fuse(&dense, &sparse, depth), RetrievalMode::Hybrid),
                    Err(e) => {
                        warn!(
                            workspace = %workspace,
                            error = %e,
                            "Dense retrieval failed, falling back to BM25"
                        );
                        (self.single_side(sparse, false), RetrievalMode::Bm25)
                    }
                }
            }
        };

        let ranked = match request.diversity {
            Some(d) => diversify(fused, request.top_k, d.max_per_doc, d.min_docs, |c| {
                c.doc_id.as_str()
            }),
            None => fused.into_iter().take(request.top_k).collect(),
        };

        let hits = self.hydrate(ranked).await?;
        debug!(workspace = %workspace, mode = %mode_used, hits = hits.len(), "Retrieved");
        Ok(Retrieval { hits, mode_used })
    }

    async fn dense_candidates(
        &self,
        workspace: &str,
        request: &RetrieveRequest,
        depth: usize,
    ) -> Result<Vec<Candidate>> {
        let vector = self.pipeline.embed_query(&request.query).await?;
        let hits = self
            .dense
            .query(workspace, &vector, depth, &request.filter)
            .await?;
        Ok(hits
            .into_iter()
            .map(|h| Candidate {
                chunk_id: h.chunk_id,
                doc_id: h.payload.doc_id,
                score: h.score,
            })
            .collect())
    }

    async fn sparse_candidates(
        &self,
        workspace: &str,
        request: &RetrieveRequest,
        depth: usize,
    ) -> Result<Vec<Candidate>> {
        let hits = self
            .sparse
            .query(&self.db, workspace, &request.query, depth, &request.filter)
            .await?;
        Ok(hits
            .into_iter()
            .map(|h| Candidate {
                chunk_id: h.chunk_id,
                doc_id: h.doc_id,
                score: h.score,
            })
            .collect())
    }

    /// Single-mode results keep their raw scores
    fn single_side(&self, candidates: Vec<Candidate>, dense: bool) -> Vec<FusedCandidate> {
        candidates
            .into_iter()
            .map(|c| FusedCandidate {
                vector_norm: if dense { c.score } else { 0.0 },
                bm25_norm: if dense { 0.0 } else { c.score },
                chunk_id: c.chunk_id,
                doc_id: c.doc_id,
                score: c.score,
            })
            .collect()
    }

    /// Resolve ranked ids to live chunks, dropping any that no longer exist
    async fn hydrate(&self, ranked: Vec<FusedCandidate>) -> Result<Vec<Hit>> {
        let ids: Vec<String> = ranked.iter().map(|c| c.chunk_id.clone()).collect();
        let mut live: HashMap<String, LiveChunk> = self
            .db
            .get_live_chunks(&ids)
            .await?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        Ok(ranked
            .into_iter()
            .filter_map(|c| {
                let chunk = live.remove(&c.chunk_id)?;
                let (vector_score, bm25_score) = (
                    (c.vector_norm > 0.0).then_some(c.vector_norm),
                    (c.bm25_norm > 0.0).then_some(c.bm25_norm),
                );
                Some(Hit {
                    chunk_id: chunk.id,
                    doc_id: chunk.doc_id,
                    workspace_id: chunk.workspace_id,
                    filename: chunk.filename,
                    page_start: chunk.page_start,
                    page_end: chunk.page_end,
                    text: chunk.text,
                    score: c.score,
                    vector_score,
                    bm25_score,
                })
            })
            .collect())
    }
}
