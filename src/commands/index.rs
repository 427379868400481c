//! Index and vacuum commands

use crate::engine::Engine;
use crate::error::Result;
use crate::index::{BuildOutcome, BuildRequest, BuildStats, IndexStatus, ProgressCallback};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub reset: bool,
    pub doc_ids: Vec<String>,
    pub batch_size: Option<usize>,
    pub rebuild_sparse: bool,
}

impl IndexOptions {
    pub fn to_request(&self) -> BuildRequest {
        BuildRequest {
            reset: self.reset,
            doc_ids: (!self.doc_ids.is_empty()).then(|| self.doc_ids.clone()),
            batch_size: self.batch_size,
            rebuild_sparse: self.rebuild_sparse,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexReport {
    pub workspace_id: String,
    pub cancelled: bool,
    pub stats: Option<BuildStats>,
    pub done: usize,
    pub total: usize,
    pub bm25_rebuilt: bool,
}

/// Cancel the returned token on the first Ctrl-C
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current batch");
            child.cancel();
        }
    });
    token
}

/// Build or refresh the dense index of a workspace
pub async fn cmd_index(
    engine: &Engine,
    workspace: &str,
    options: &IndexOptions,
    progress: Option<ProgressCallback>,
    cancel: &CancellationToken,
) -> Result<IndexReport> {
    info!(workspace = %workspace, reset = options.reset, "Starting index build");

    let request = options.to_request();
    let outcome = engine
        .sync()
        .build_or_refresh(workspace, &request, progress, cancel)
        .await?;

    Ok(match outcome {
        BuildOutcome::Completed(stats) => IndexReport {
            workspace_id: workspace.to_string(),
            cancelled: false,
            stats: Some(stats),
            done: stats.indexed_count,
            total: stats.chunk_count,
            bm25_rebuilt: options.rebuild_sparse,
        },
        BuildOutcome::Cancelled { done, total } => IndexReport {
            workspace_id: workspace.to_string(),
            cancelled: true,
            stats: None,
            done,
            total,
            bm25_rebuilt: false,
        },
    })
}

/// Remove orphans and repair both indexes
pub async fn cmd_vacuum(
    engine: &Engine,
    workspace: &str,
    cancel: &CancellationToken,
) -> Result<IndexStatus> {
    info!(workspace = %workspace, "Starting vacuum");
    engine.sync().vacuum(workspace, cancel).await
}

pub fn print_index_report(report: &IndexReport) {
    if report.cancelled {
        println!(
            "\n⚠ Index build for '{}' cancelled after {}/{} chunks",
            report.workspace_id, report.done, report.total
        );
        println!("Run 'stacks index' again to finish.");
        return;
    }

    println!("\n✓ Index build for '{}' complete\n", report.workspace_id);
    if let Some(stats) = &report.stats {
        println!("  Documents: {}", stats.doc_count);
        println!("  Chunks: {}", stats.chunk_count);
        println!("  Indexed: {}", stats.indexed_count);
    }
    if report.bm25_rebuilt {
        println!("  BM25 index rebuilt");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::test_engine;
    use crate::index::test_support::seed_doc;

    #[tokio::test]
    async fn test_index_and_vacuum() {
        let te = test_engine().await;
        seed_doc(te.engine.db(), "w1", "a.pdf", &["one", "two", "three"]).await;
        let cancel = CancellationToken::new();

        let options = IndexOptions {
            rebuild_sparse: true,
            ..IndexOptions::default()
        };
        let report = cmd_index(&te.engine, "w1", &options, None, &cancel)
            .await
            .unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.done, 3);
        assert!(report.bm25_rebuilt);

        let status = cmd_vacuum(&te.engine, "w1", &cancel).await.unwrap();
        assert_eq!(status.vector_count, 3);
        assert!(status.bm25_present);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let te = test_engine().await;
        seed_doc(te.engine.db(), "w1", "a.pdf", &["one", "two"]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = cmd_index(&te.engine, "w1", &IndexOptions::default(), None, &cancel)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!((report.done, report.total), (0, 2));
    }

    #[test]
    fn test_empty_doc_list_is_unscoped() {
        let request = IndexOptions::default().to_request();
        assert!(request.doc_ids.is_none());
    }
}
