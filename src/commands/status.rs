//! Status command implementation

use crate::engine::Engine;
use crate::error::Result;
use crate::index::IndexStatus;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub qdrant_url: String,
    pub embedding_model: String,
    pub embedding_backend: String,
    pub generation_configured: bool,
    pub index: IndexStatus,
}

/// Get workspace status; never fails because the dense index is down
pub async fn cmd_status(engine: &Engine, workspace: &str) -> Result<StatusInfo> {
    info!(workspace = %workspace, "Getting status");

    let config = engine.config();
    let index = engine.sync().status(workspace).await?;

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        qdrant_url: config.qdrant_url.clone(),
        embedding_model: config.embedding.model.clone(),
        embedding_backend: config.embedding.backend_url.clone(),
        generation_configured: config
            .generation
            .url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty()),
        index,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 stacks Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.db_path);
    println!("\nBackends:");
    println!("  Qdrant: {}", status.qdrant_url);
    println!(
        "  Embedding: {} via {}",
        status.embedding_model, status.embedding_backend
    );
    println!(
        "  Generation: {}",
        if status.generation_configured {
            "configured"
        } else {
            "not configured (coverage answers use raw evidence)"
        }
    );

    print_index_status(&status.index);
}

pub fn print_index_status(index: &IndexStatus) {
    println!("\nWorkspace '{}':", index.workspace_id);
    println!("  Documents: {}", index.doc_count);
    println!("  Chunks: {}", index.chunk_count);
    println!("  Orphan chunks: {}", index.orphan_chunks);
    if index.vector_count < 0 {
        println!("  Vectors: ✗ dense index unreachable");
    } else {
        let marker = if index.vector_count as usize == index.chunk_count {
            "✓"
        } else {
            "⚠"
        };
        println!("  Vectors: {} {}", marker, index.vector_count);
    }
    println!(
        "  BM25 index: {}",
        if index.bm25_present { "✓ present" } else { "✗ missing" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::test_engine;
    use crate::index::test_support::seed_doc;

    #[tokio::test]
    async fn test_status_counts() {
        let te = test_engine().await;
        seed_doc(te.engine.db(), "w1", "a.pdf", &["one", "two", "three"]).await;

        let status = cmd_status(&te.engine, "w1").await.unwrap();
        assert_eq!(status.index.doc_count, 1);
        assert_eq!(status.index.chunk_count, 3);
        assert_eq!(status.index.vector_count, 0);
        assert!(!status.index.bm25_present);
        assert!(!status.generation_configured);
    }
}
