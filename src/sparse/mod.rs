//! Lexical (BM25) index
//!
//! One JSON snapshot per workspace, rebuilt wholesale from the chunk store.
//! There is no incremental update: any change to a workspace's chunks is
//! picked up by the next `build`.

mod bm25;

pub use bm25::*;

use crate::error::{Error, Result};
use crate::meta::MetaDb;
use crate::store::ChunkFilter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Chunks read from the store per query while building
const BUILD_PAGE_SIZE: usize = 500;

/// A lexical match
#[derive(Debug, Clone, PartialEq)]
pub struct SparseHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub score: f32,
}

/// Per-workspace BM25 snapshots stored under one directory
#[derive(Debug, Clone)]
pub struct SparseIndex {
    dir: PathBuf,
}

impl SparseIndex {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot file of a workspace
    pub fn path(&self, workspace: &str) -> PathBuf {
        let name: String = workspace
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }

    pub async fn exists(&self, workspace: &str) -> bool {
        tokio::fs::try_exists(self.path(workspace))
            .await
            .unwrap_or(false)
    }

    /// Rebuild the snapshot of `workspace` from every chunk in the store.
    ///
    /// Returns the number of chunks indexed.
    pub async fn build(&self, db: &MetaDb, workspace: &str) -> Result<usize> {
        let mut snapshot = SparseSnapshot::new(workspace);
        let mut offset = 0;
        loop {
            let page = db
                .fetch_chunks(workspace, None, BUILD_PAGE_SIZE, offset)
                .await?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            for chunk in &page {
                snapshot.push(chunk);
            }
        }
        snapshot.finish();

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path(workspace);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&snapshot)?).await?;
        tokio::fs::rename(&tmp, &path).await?;

        info!(
            workspace = %workspace,
            chunks = snapshot.len(),
            terms = snapshot.doc_freqs.len(),
            "Built BM25 index"
        );
        Ok(snapshot.len())
    }

    /// Read the snapshot of `workspace`, if one has been built
    pub async fn load(&self, workspace: &str) -> Result<Option<SparseSnapshot>> {
        let path = self.path(workspace);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot: SparseSnapshot = serde_json::from_slice(&bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::retrieval(format!(
                "BM25 index at {} has format version {}, expected {}; rebuild it",
                path.display(),
                snapshot.version,
                SNAPSHOT_VERSION
            )));
        }
        Ok(Some(snapshot))
    }

    /// Delete the snapshot of `workspace`; returns whether one existed
    pub async fn remove(&self, workspace: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.path(workspace)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Score every chunk of `workspace` against `query`, best first.
    ///
    /// A missing snapshot is built first. Filters apply after scoring and
    /// chunks that share no term with the query are not returned.
    pub async fn query(
        &self,
        db: &MetaDb,
        workspace: &str,
        query: &str,
        top_k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<SparseHit>> {
        let snapshot = match self.load(workspace).await? {
            Some(snapshot) => snapshot,
            None => {
                debug!(workspace = %workspace, "BM25 index missing, building");
                self.build(db, workspace).await?;
                self.load(workspace).await?.ok_or_else(|| {
                    Error::retrieval(format!("BM25 index for '{}' was not written", workspace))
                })?
            }
        };

        let tokens = tokenize(query);
        let scores = snapshot.score(&tokens);

        let mut hits: Vec<SparseHit> = scores
            .into_iter()
            .enumerate()
            .filter(|(_, score)| *score > 0.0)
            .filter(|(i, _)| {
                let meta = &snapshot.meta[*i];
                filter.matches(&meta.doc_id, &meta.doc_type)
            })
            .map(|(i, score)| SparseHit {
                chunk_id: snapshot.chunk_ids[i].clone(),
                doc_id: snapshot.meta[i].doc_id.clone(),
                score,
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}
