//! Keeps the dense and sparse indexes consistent with the chunk store

use crate::embed::EmbeddingPipeline;
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use crate::sparse::SparseIndex;
use crate::store::{DenseIndex, DenseRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress callback: (done, total) chunks
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Options for a dense index build
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Drop the workspace's vectors before indexing
    #[serde(default)]
    pub reset: bool,
    /// Restrict indexing to these documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_ids: Option<Vec<String>>,
    /// Chunks per batch; the synchronizer default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// Also rebuild the BM25 index after a completed build
    #[serde(default)]
    pub rebuild_sparse: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    pub doc_count: usize,
    pub chunk_count: usize,
    pub indexed_count: usize,
}

/// How a build ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Completed(BuildStats),
    /// Stopped at a batch boundary after `done` of `total` chunks
    Cancelled { done: usize, total: usize },
}

/// Index health of one workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub workspace_id: String,
    pub doc_count: usize,
    pub chunk_count: usize,
    pub orphan_chunks: usize,
    /// -1 when the dense index cannot be reached
    pub vector_count: i64,
    pub bm25_present: bool,
}

pub struct IndexSynchronizer {
    db: MetaDb,
    dense: Arc<dyn DenseIndex>,
    sparse: SparseIndex,
    pipeline: EmbeddingPipeline,
    batch_size: usize,
}

impl IndexSynchronizer {
    pub fn new(
        db: MetaDb,
        dense: Arc<dyn DenseIndex>,
        sparse: SparseIndex,
        pipeline: EmbeddingPipeline,
        batch_size: usize,
    ) -> Self {
        Self {
            db,
            dense,
            sparse,
            pipeline,
            batch_size: batch_size.max(1),
        }
    }

    /// Embed and upsert chunks of `workspace` in `(doc_id, chunk_index)` order.
    ///
    /// The token is checked before every batch; a batch in flight always completes.
    pub async fn build_or_refresh(
        &self,
        workspace: &str,
        request: &BuildRequest,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome> {
        let doc_ids = request.doc_ids.as_deref().filter(|ids| !ids.is_empty());
        let batch_size = request.batch_size.unwrap_or(self.batch_size).max(1);

        let total = self.db.count_chunks(workspace, doc_ids).await?;
        if total == 0 {
            return Err(Error::retrieval(match doc_ids {
                Some(_) => format!(
                    "No chunks to index for the selected documents in workspace '{}'",
                    workspace
                ),
                None => format!("No chunks to index in workspace '{}'", workspace),
            }));
        }
        let doc_count = self.db.count_documents(workspace, doc_ids).await?;

        if request.reset {
            if doc_ids.is_some() {
                warn!(workspace = %workspace, "Ignoring reset for a document-scoped build");
            } else {
                info!(workspace = %workspace, "Resetting dense index");
                self.dense.reset(workspace).await?;
            }
        }

        info!(
            workspace = %workspace,
            chunks = total,
            documents = doc_count,
            batch_size,
            "Building dense index"
        );

        let mut done = 0;
        while done < total {
            if cancel.is_cancelled() {
                info!(workspace = %workspace, done, total, "Index build cancelled");
                return Ok(BuildOutcome::Cancelled { done, total });
            }

            let chunks = self
                .db
                .fetch_chunks(workspace, doc_ids, batch_size, done)
                .await?;
            if chunks.is_empty() {
                break;
            }

            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .pipeline
                .embed(&texts)
                .await
                .map_err(Error::surface_for_retrieval)?;

            let records = chunks
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| DenseRecord::from_chunk(chunk, vector))
                .collect();
            self.dense.upsert(workspace, records).await?;

            done += chunks.len();
            debug!(workspace = %workspace, done, total, "Indexed batch");
            if let Some(cb) = &progress {
                cb(done, total);
            }
        }

        if request.rebuild_sparse {
            self.sparse.build(&self.db, workspace).await?;
        }

        Ok(BuildOutcome::Completed(BuildStats {
            doc_count,
            chunk_count: total,
            indexed_count: done,
        }))
    }

    /// Build the dense index from scratch if it is empty.
    ///
    /// Returns whether a build ran.
    pub async fn ensure_dense(&self, workspace: &str, cancel: &CancellationToken) -> Result<bool> {
        if self.dense.count(workspace).await? > 0 {
            return Ok(false);
        }
        let request = BuildRequest {
            reset: true,
            ..BuildRequest::default()
        };
        match self.build_or_refresh(workspace, &request, None, cancel).await? {
            BuildOutcome::Completed(_) => Ok(true),
            BuildOutcome::Cancelled { .. } => {
                Err(Error::Cancelled("dense index build".to_string()))
            }
        }
    }

    /// Build the sparse index if no snapshot exists. Returns whether a build ran.
    pub async fn ensure_sparse(&self, workspace: &str) -> Result<bool> {
        if self.sparse.exists(workspace).await {
            return Ok(false);
        }
        self.sparse.build(&self.db, workspace).await?;
        Ok(true)
    }

    /// Remove orphans, repair the dense index on count mismatch and rebuild BM25.
    ///
    /// A repair stopped by `cancel` returns [`Error::Cancelled`].
    pub async fn vacuum(&self, workspace: &str, cancel: &CancellationToken) -> Result<IndexStatus> {
        let cleanup = self.db.delete_orphans(workspace).await?;
        let chunk_count = self.db.count_chunks(workspace, None).await?;

        match self.dense.count(workspace).await {
            Ok(vector_count) if vector_count == chunk_count => {
                debug!(workspace = %workspace, vector_count, "Dense index consistent");
            }
            Ok(vector_count) => {
                info!(
                    workspace = %workspace,
                    vector_count,
                    chunk_count,
                    "Dense index out of sync, rebuilding"
                );
                if chunk_count == 0 {
                    self.dense.reset(workspace).await?;
                } else {
                    let request = BuildRequest {
                        reset: true,
                        ..BuildRequest::default()
                    };
                    if let BuildOutcome::Cancelled { .. } =
                        self.build_or_refresh(workspace, &request, None, cancel).await?
                    {
                        return Err(Error::Cancelled("dense index rebuild".to_string()));
                    }
                }
            }
            Err(e) => {
                warn!(workspace = %workspace, error = %e, "Dense index unavailable, skipping")
            }
        }

        if chunk_count == 0 {
            self.sparse.remove(workspace).await?;
        } else {
            self.sparse.build(&self.db, workspace).await?;
        }

        info!(
            workspace = %workspace,
            chunks_removed = cleanup.chunks_removed,
            pages_removed = cleanup.pages_removed,
            "Vacuum finished"
        );
        self.status(workspace).await
    }

    /// Best-effort counts; an unreachable dense index reports -1 vectors
    pub async fn status(&self, workspace: &str) -> Result<IndexStatus> {
        let vector_count = match self.dense.count(workspace).await {
            Ok(count) => count as i64,
            Err(e) => {
                warn!(workspace = %workspace, error = %e, "Could not count dense vectors");
                -1
            }
        };

        Ok(IndexStatus {
            workspace_id: workspace.to_string(),
            doc_count: self.db.count_documents(workspace, None).await?,
            chunk_count: self.db.count_chunks(workspace, None).await?,
            orphan_chunks: self.db.count_orphan_chunks(workspace).await?,
            vector_count,
            bm25_present: self.sparse.exists(workspace).await,
        })
    }

    pub fn db(&self) -> &MetaDb {
        &self.db
    }

    pub fn dense(&self) -> &Arc<dyn DenseIndex> {
        &self.dense
    }

    pub fn sparse(&self) -> &SparseIndex {
        &self.sparse
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::embed::testing::HashingEmbedder;
    use crate::meta::{Chunk, Document};
    use crate::store::MemoryIndex;
    use tempfile::TempDir;

    pub const DIM: usize = 64;

    pub struct Fixture {
        pub db: MetaDb,
        pub dense: Arc<MemoryIndex>,
        pub embedder: Arc<HashingEmbedder>,
        pub sync: Arc<IndexSynchronizer>,
        pub _tmp: TempDir,
    }

    pub async fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::new(&tmp.path().join("test.db")).await.unwrap();
        let dense = Arc::new(MemoryIndex::new(DIM));
        let embedder = Arc::new(HashingEmbedder::new(DIM));
        let pipeline = EmbeddingPipeline::new(embedder.clone(), 2).with_cache(db.clone());
        let sync = Arc::new(IndexSynchronizer::new(
            db.clone(),
            dense.clone(),
            SparseIndex::new(tmp.path().join("bm25")),
            pipeline,
            2,
        ));
        Fixture {
            db,
            dense,
            embedder,
            sync,
            _tmp: tmp,
        }
    }

    pub async fn seed_doc(
        db: &MetaDb,
        workspace: &str,
        name: &str,
        texts: &[&str],
    ) -> (Document, Vec<Chunk>) {
        let doc = Document::new(workspace, name);
        db.insert_document(&doc).await.unwrap();
        let mut chunks = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let page = i as i32 + 1;
            let chunk = Chunk::new(&doc, i as i32, page, page, *text);
            db.insert_chunk(&chunk).await.unwrap();
            chunks.push(chunk);
        }
        (doc, chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::embed::testing::FailingEmbedder;
    use std::sync::Mutex;

    fn reset() -> BuildRequest {
        BuildRequest {
            reset: true,
            ..BuildRequest::default()
        }
    }

    #[tokio::test]
    async fn test_build_is_idempotent() {
        let fx = fixture().await;
        seed_doc(&fx.db, "w1", "d1.pdf", &["one", "two", "three"]).await;
        seed_doc(&fx.db, "w1", "d2.pdf", &["four", "five"]).await;
        let cancel = CancellationToken::new();

        let first = fx.sync.build_or_refresh("w1", &reset(), None, &cancel).await.unwrap();
        let first_vectors = fx.dense.count("w1").await.unwrap();
        let second = fx.sync.build_or_refresh("w1", &reset(), None, &cancel).await.unwrap();
        let second_vectors = fx.dense.count("w1").await.unwrap();

        let expected = BuildStats {
            doc_count: 2,
            chunk_count: 5,
            indexed_count: 5,
        };
        assert_eq!(first, BuildOutcome::Completed(expected));
        assert_eq!(second, first);
        assert_eq!(first_vectors, 5);
        assert_eq!(second_vectors, first_vectors);
        // second pass is served from the embedding cache
        assert_eq!(fx.embedder.texts_seen(), 5);
    }

    #[tokio::test]
    async fn test_reports_progress_per_batch() {
        let fx = fixture().await;
        seed_doc(&fx.db, "w1", "d1.pdf", &["a", "b", "c", "d", "e"]).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressCallback = Arc::new(move |done, total| {
            sink.lock().unwrap().push((done, total));
        });

        let cancel = CancellationToken::new();
        fx.sync
            .build_or_refresh("w1", &BuildRequest::default(), Some(progress), &cancel)
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(2, 5), (4, 5), (5, 5)]);
    }

    #[tokio::test]
    async fn test_cancel_stops_at_batch_boundary() {
        let fx = fixture().await;
        seed_doc(&fx.db, "w1", "d1.pdf", &["a", "b", "c", "d", "e"]).await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let progress: ProgressCallback = Arc::new(move |done, _| {
            if done >= 2 {
                trigger.cancel();
            }
        });

        let outcome = fx
            .sync
            .build_or_refresh("w1", &BuildRequest::default(), Some(progress), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, BuildOutcome::Cancelled { done: 2, total: 5 });
        assert_eq!(fx.dense.count("w1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_scope_is_retrieval_error() {
        let fx = fixture().await;
        seed_doc(&fx.db, "w1", "d1.pdf", &["a"]).await;

        let request = BuildRequest {
            doc_ids: Some(vec!["missing".to_string()]),
            ..BuildRequest::default()
        };
        let err = fx
            .sync
            .build_or_refresh("w1", &request, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Retrieval { setup_required: false, .. }));

        let err = fx
            .sync
            .build_or_refresh("empty", &BuildRequest::default(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Retrieval { .. }));
    }

    #[tokio::test]
    async fn test_scoped_build_keeps_other_vectors() {
        let fx = fixture().await;
        let (d1, _) = seed_doc(&fx.db, "w1", "d1.pdf", &["a", "b"]).await;
        seed_doc(&fx.db, "w1", "d2.pdf", &["c"]).await;
        let cancel = CancellationToken::new();
        fx.sync.build_or_refresh("w1", &reset(), None, &cancel).await.unwrap();

        let scoped = BuildRequest {
            reset: true,
            doc_ids: Some(vec![d1.id.clone()]),
            ..BuildRequest::default()
        };
        let outcome = fx.sync.build_or_refresh("w1", &scoped, None, &cancel).await.unwrap();
        assert_eq!(
            outcome,
            BuildOutcome::Completed(BuildStats {
                doc_count: 1,
                chunk_count: 2,
                indexed_count: 2
            })
        );
        assert_eq!(fx.dense.count("w1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_provider_failure_needs_setup() {
        let fx = fixture().await;
        seed_doc(&fx.db, "w1", "d1.pdf", &["a"]).await;
        let sync = IndexSynchronizer::new(
            fx.db.clone(),
            fx.dense.clone(),
            fx.sync.sparse().clone(),
            EmbeddingPipeline::new(Arc::new(FailingEmbedder::new(DIM)), 2),
            2,
        );

        let err = sync
            .build_or_refresh("w1", &BuildRequest::default(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Retrieval { setup_required: true, .. }));
    }

    #[tokio::test]
    async fn test_ensure_builds_only_when_missing() {
        let fx = fixture().await;
        seed_doc(&fx.db, "w1", "d1.pdf", &["a", "b"]).await;
        let cancel = CancellationToken::new();

        assert!(fx.sync.ensure_dense("w1", &cancel).await.unwrap());
        assert!(!fx.sync.ensure_dense("w1", &cancel).await.unwrap());
        assert!(fx.sync.ensure_sparse("w1").await.unwrap());
        assert!(!fx.sync.ensure_sparse("w1").await.unwrap());
    }

    #[tokio::test]
    async fn test_vacuum_removes_orphans_and_resyncs() {
        let fx = fixture().await;
        seed_doc(&fx.db, "w1", "d1.pdf", &["alpha", "beta"]).await;
        let (d2, _) = seed_doc(&fx.db, "w1", "d2.pdf", &["gamma", "delta", "epsilon"]).await;
        let cancel = CancellationToken::new();
        fx.sync.build_or_refresh("w1", &reset(), None, &cancel).await.unwrap();

        fx.db.remove_document_record(&d2.id).await.unwrap();
        let before = fx.sync.status("w1").await.unwrap();
        assert_eq!(before.orphan_chunks, 3);
        assert_eq!(before.vector_count, 5);

        let after = fx.sync.vacuum("w1", &cancel).await.unwrap();
        assert_eq!(after.orphan_chunks, 0);
        assert_eq!(after.doc_count, 1);
        assert_eq!(after.chunk_count, 2);
        assert_eq!(after.vector_count, 2);
        assert!(after.bm25_present);
    }

    #[tokio::test]
    async fn test_vacuum_of_empty_workspace_clears_indexes() {
        let fx = fixture().await;
        let (d1, _) = seed_doc(&fx.db, "w1", "d1.pdf", &["alpha"]).await;
        let cancel = CancellationToken::new();
        fx.sync.build_or_refresh("w1", &reset(), None, &cancel).await.unwrap();
        fx.sync.ensure_sparse("w1").await.unwrap();

        fx.db.remove_document_record(&d1.id).await.unwrap();
        let status = fx.sync.vacuum("w1", &cancel).await.unwrap();
        assert_eq!(status.chunk_count, 0);
        assert_eq!(status.vector_count, 0);
        assert!(!status.bm25_present);
    }
}
