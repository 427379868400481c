//! Metadata storage using SQLite
//!
//! This module is the chunk store both indexes are derived from:
//! - Documents, pages and chunks of each workspace
//! - Per-document index assets and scope units (see `assets`)
//! - The embedding cache (see `cache`)
//! - Background task records (see `tasks`)

mod assets;
mod cache;
mod schema;
mod tasks;

pub use assets::*;
pub use schema::*;
pub use tasks::*;

use crate::config::Config;
use crate::error::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// SQLite caps bound parameters per statement; id lists are split below this
const MAX_BIND_IDS: usize = 500;

/// A document (one uploaded file)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub workspace_id: String,
    pub filename: String,
    pub title: Option<String>,
    pub doc_type: String,
    pub created_at: String,
}

impl Document {
    pub fn new(workspace_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            filename: filename.into(),
            title: None,
            doc_type: "document".to_string(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    /// Title when known, otherwise the filename
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.filename)
    }
}

/// Extracted text of one page
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub doc_id: String,
    pub page_number: i32,
    pub text: String,
}

impl Page {
    pub fn new(doc_id: impl Into<String>, page_number: i32, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            doc_id: doc_id.into(),
            page_number,
            text: text.into(),
        }
    }
}

/// A text chunk, immutable once written
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub doc_id: String,
    pub workspace_id: String,
    pub chunk_index: i32,
    pub page_start: i32,
    pub page_end: i32,
    pub text: String,
    pub doc_type: String,
    pub created_at: String,
}

impl Chunk {
    /// Create a chunk belonging to `doc`
    pub fn new(
        doc: &Document,
        chunk_index: i32,
        page_start: i32,
        page_end: i32,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            doc_id: doc.id.clone(),
            workspace_id: doc.workspace_id.clone(),
            chunk_index,
            page_start,
            page_end,
            text: text.into(),
            doc_type: doc.doc_type.clone(),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// A chunk joined with its live parent document
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LiveChunk {
    pub id: String,
    pub doc_id: String,
    pub workspace_id: String,
    pub filename: String,
    pub chunk_index: i32,
    pub page_start: i32,
    pub page_end: i32,
    pub text: String,
    pub doc_type: String,
}

/// Rows removed by an orphan sweep
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OrphanCleanup {
    pub chunks_removed: u64,
    pub pages_removed: u64,
}

/// Metadata database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

/// Optional doc-id scope; an empty list means "no scope"
fn doc_scope(doc_ids: Option<&[String]>) -> Option<&[String]> {
    doc_ids.filter(|ids| !ids.is_empty())
}

impl MetaDb {
    /// Connect to the metadata database configured in `config`
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::new(&config.paths.db_file).await
    }

    /// Open (and create if needed) a database at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };

        if !db.is_initialized().await? {
            db.init_schema().await?;
        }

        Ok(db)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name='tasks'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    // ===== Document Operations =====

    /// Insert or replace a document
    pub async fn insert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, workspace_id, filename, title, doc_type, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                filename = excluded.filename,
                title = excluded.title,
                doc_type = excluded.doc_type
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.workspace_id)
        .bind(&doc.filename)
        .bind(&doc.title)
        .bind(&doc.doc_type)
        .bind(&doc.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get document by ID
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let doc = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(doc)
    }

    /// List documents of a workspace
    pub async fn list_documents(&self, workspace_id: &str) -> Result<Vec<Document>> {
        let docs = sqlx::query_as::<_, Document>(
            "SELECT * FROM documents WHERE workspace_id = ? ORDER BY filename",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(docs)
    }

    /// Delete a document together with its pages and chunks
    pub async fn delete_document(&self, doc_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM pages WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Remove only the document row, leaving its pages and chunks as orphans.
    ///
    /// This is what an out-of-band deletion by another component looks like.
    pub async fn remove_document_record(&self, doc_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count documents in a workspace, optionally restricted to `doc_ids`
    pub async fn count_documents(
        &self,
        workspace_id: &str,
        doc_ids: Option<&[String]>,
    ) -> Result<usize> {
        let count: i64 = match doc_scope(doc_ids) {
            None => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM documents WHERE workspace_id = ?",
                )
                .bind(workspace_id)
                .fetch_one(&self.pool)
                .await?
            }
            Some(ids) => {
                let sql = format!(
                    "SELECT COUNT(*) FROM documents WHERE workspace_id = ? AND id IN ({})",
                    placeholders(ids.len())
                );
                let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(workspace_id);
                for id in ids {
                    query = query.bind(id);
                }
                query.fetch_one(&self.pool).await?
            }
        };
        Ok(count as usize)
    }

    // ===== Page Operations =====

    /// Insert or replace a page
    pub async fn insert_page(&self, page: &Page) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pages (id, doc_id, page_number, text)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(doc_id, page_number) DO UPDATE SET text = excluded.text
            "#,
        )
        .bind(&page.id)
        .bind(&page.doc_id)
        .bind(page.page_number)
        .bind(&page.text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count pages of a document
    pub async fn count_pages(&self, doc_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages WHERE doc_id = ?")
            .bind(doc_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    // ===== Chunk Operations =====

    /// Insert a chunk; an existing (doc_id, chunk_index) row is left untouched
    pub async fn insert_chunk(&self, chunk: &Chunk) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chunks (
                id, doc_id, workspace_id, chunk_index, page_start, page_end, text, doc_type,
                created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(doc_id, chunk_index) DO NOTHING
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.doc_id)
        .bind(&chunk.workspace_id)
        .bind(chunk.chunk_index)
        .bind(chunk.page_start)
        .bind(chunk.page_end)
        .bind(&chunk.text)
        .bind(&chunk.doc_type)
        .bind(&chunk.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch one page of chunks ordered by (doc_id, chunk_index)
    pub async fn fetch_chunks(
        &self,
        workspace_id: &str,
        doc_ids: Option<&[String]>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Chunk>> {
        let scope = doc_scope(doc_ids);
        let filter = scope
            .map(|ids| format!(" AND doc_id IN ({})", placeholders(ids.len())))
            .unwrap_or_default();
        let sql = format!(
            "SELECT * FROM chunks WHERE workspace_id = ?{} \
             ORDER BY doc_id, chunk_index LIMIT ? OFFSET ?",
            filter
        );

        let mut query = sqlx::query_as::<_, Chunk>(&sql).bind(workspace_id);
        for id in scope.unwrap_or_default() {
            query = query.bind(id);
        }
        let chunks = query
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(chunks)
    }

    /// Count chunks in a workspace, optionally restricted to `doc_ids`
    pub async fn count_chunks(
        &self,
        workspace_id: &str,
        doc_ids: Option<&[String]>,
    ) -> Result<usize> {
        let count: i64 = match doc_scope(doc_ids) {
            None => {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chunks WHERE workspace_id = ?")
                    .bind(workspace_id)
                    .fetch_one(&self.pool)
                    .await?
            }
            Some(ids) => {
                let sql = format!(
                    "SELECT COUNT(*) FROM chunks WHERE workspace_id = ? AND doc_id IN ({})",
                    placeholders(ids.len())
                );
                let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(workspace_id);
                for id in ids {
                    query = query.bind(id);
                }
                query.fetch_one(&self.pool).await?
            }
        };
        Ok(count as usize)
    }

    /// Count chunks whose parent document no longer exists
    pub async fn count_orphan_chunks(&self, workspace_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM chunks c
            WHERE c.workspace_id = ?
              AND NOT EXISTS (SELECT 1 FROM documents d WHERE d.id = c.doc_id)
            "#,
        )
        .bind(workspace_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    /// Delete orphan chunks of a workspace and every page whose document is gone.
    ///
    /// Pages carry no workspace, so page cleanup is not limited to `workspace_id`.
    pub async fn delete_orphans(&self, workspace_id: &str) -> Result<OrphanCleanup> {
        let mut tx = self.pool.begin().await?;

        let pages = sqlx::query(
            r#"
            DELETE FROM pages
            WHERE NOT EXISTS (SELECT 1 FROM documents d WHERE d.id = pages.doc_id)
            "#,
        )
        .execute(&mut *tx)
        .await?;

        let chunks = sqlx::query(
            r#"
            DELETE FROM chunks
            WHERE workspace_id = ?
              AND NOT EXISTS (SELECT 1 FROM documents d WHERE d.id = chunks.doc_id)
            "#,
        )
        .bind(workspace_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let cleanup = OrphanCleanup {
            chunks_removed: chunks.rows_affected(),
            pages_removed: pages.rows_affected(),
        };
        if cleanup.chunks_removed > 0 || cleanup.pages_removed > 0 {
            info!(
                workspace = %workspace_id,
                chunks = cleanup.chunks_removed,
                pages = cleanup.pages_removed,
                "Removed orphan rows"
            );
        }
        Ok(cleanup)
    }

    /// Resolve chunk ids to live chunks; ids without a live chunk and document are skipped
    pub async fn get_live_chunks(&self, ids: &[String]) -> Result<Vec<LiveChunk>> {
        let mut found = Vec::with_capacity(ids.len());

        for batch in ids.chunks(MAX_BIND_IDS) {
            let sql = format!(
                r#"
                SELECT c.id, c.doc_id, c.workspace_id, d.filename, c.chunk_index,
                       c.page_start, c.page_end, c.text, c.doc_type
                FROM chunks c
                JOIN documents d ON d.id = c.doc_id
                WHERE c.id IN ({})
                "#,
                placeholders(batch.len())
            );
            let mut query = sqlx::query_as::<_, LiveChunk>(&sql);
            for id in batch {
                query = query.bind(id);
            }
            found.extend(query.fetch_all(&self.pool).await?);
        }

        Ok(found)
    }
}
