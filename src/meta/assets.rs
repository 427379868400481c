//! Per-document index assets and scope units

use super::MetaDb;
use crate::error::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Precomputed summary material for one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocAssets {
    pub doc_id: String,
    pub summary_text: String,
    pub outline: Vec<String>,
    pub entities: Vec<String>,
    pub updated_at: String,
}

impl DocAssets {
    pub fn new(doc_id: impl Into<String>, summary_text: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            summary_text: summary_text.into(),
            outline: Vec::new(),
            entities: Vec::new(),
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    /// Assets with a blank summary cannot back an evidence note
    pub fn is_usable(&self) -> bool {
        !self.summary_text.trim().is_empty()
    }
}

#[derive(FromRow)]
struct AssetRow {
    doc_id: String,
    summary_text: String,
    outline_json: String,
    entities_json: String,
    updated_at: String,
}

impl From<AssetRow> for DocAssets {
    fn from(row: AssetRow) -> Self {
        Self {
            doc_id: row.doc_id,
            summary_text: row.summary_text,
            outline: serde_json::from_str(&row.outline_json).unwrap_or_default(),
            entities: serde_json::from_str(&row.entities_json).unwrap_or_default(),
            updated_at: row.updated_at,
        }
    }
}

/// A structural unit of a scope, e.g. one lecture of a course
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ScopeUnit {
    pub id: String,
    pub workspace_id: String,
    pub scope_id: String,
    pub title: String,
    pub position: i32,
}

impl ScopeUnit {
    pub fn new(
        workspace_id: impl Into<String>,
        scope_id: impl Into<String>,
        title: impl Into<String>,
        position: i32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            scope_id: scope_id.into(),
            title: title.into(),
            position,
        }
    }
}

impl MetaDb {
    // ===== Document Index Assets =====

    /// Insert or replace the assets of a document
    pub async fn upsert_doc_assets(&self, assets: &DocAssets) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO doc_index_assets (
                doc_id, summary_text, outline_json, entities_json, updated_at
            )
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(doc_id) DO UPDATE SET
                summary_text = excluded.summary_text,
                outline_json = excluded.outline_json,
                entities_json = excluded.entities_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&assets.doc_id)
        .bind(&assets.summary_text)
        .bind(serde_json::to_string(&assets.outline)?)
        .bind(serde_json::to_string(&assets.entities)?)
        .bind(&assets.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get the assets of a document, if any were computed
    pub async fn get_doc_assets(&self, doc_id: &str) -> Result<Option<DocAssets>> {
        let row = sqlx::query_as::<_, AssetRow>("SELECT * FROM doc_index_assets WHERE doc_id = ?")
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(DocAssets::from))
    }

    // ===== Scope Units =====

    /// Insert or replace a scope unit
    pub async fn insert_scope_unit(&self, unit: &ScopeUnit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scope_units (id, workspace_id, scope_id, title, position)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                position = excluded.position
            "#,
        )
        .bind(&unit.id)
        .bind(&unit.workspace_id)
        .bind(&unit.scope_id)
        .bind(&unit.title)
        .bind(unit.position)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Link a document to a scope unit
    pub async fn link_unit_document(&self, unit_id: &str, doc_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO scope_unit_docs (unit_id, doc_id) VALUES (?, ?)")
            .bind(unit_id)
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// List the units of a scope in display order
    pub async fn list_scope_units(
        &self,
        workspace_id: &str,
        scope_id: &str,
    ) -> Result<Vec<ScopeUnit>> {
        let units = sqlx::query_as::<_, ScopeUnit>(
            r#"
            SELECT * FROM scope_units
            WHERE workspace_id = ? AND scope_id = ?
            ORDER BY position, title
            "#,
        )
        .bind(workspace_id)
        .bind(scope_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(units)
    }

    /// Document ids linked to a unit, in link order
    pub async fn list_unit_documents(&self, unit_id: &str) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT doc_id FROM scope_unit_docs WHERE unit_id = ? ORDER BY rowid",
        )
        .bind(unit_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Document;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_assets_roundtrip_through_json_columns() {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::new(&tmp.path().join("test.db")).await.unwrap();

        let mut assets = DocAssets::new("doc-1", "Covers gradient descent.");
        assets.outline = vec!["Intro".to_string(), "Momentum".to_string()];
        assets.entities = vec!["SGD".to_string()];
        db.upsert_doc_assets(&assets).await.unwrap();

        let loaded = db.get_doc_assets("doc-1").await.unwrap().unwrap();
        assert_eq!(loaded, assets);
        assert!(db.get_doc_assets("doc-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scope_units_ordered_with_links() {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::new(&tmp.path().join("test.db")).await.unwrap();

        let second = ScopeUnit::new("w1", "course-1", "Lecture 2", 2);
        let first = ScopeUnit::new("w1", "course-1", "Lecture 1", 1);
        let other = ScopeUnit::new("w1", "course-2", "Elsewhere", 1);
        for unit in [&second, &first, &other] {
            db.insert_scope_unit(unit).await.unwrap();
        }

        let slides = Document::new("w1", "slides.pdf");
        let notes = Document::new("w1", "notes.pdf");
        db.link_unit_document(&first.id, &slides.id).await.unwrap();
        db.link_unit_document(&first.id, &notes.id).await.unwrap();
        db.link_unit_document(&first.id, &slides.id).await.unwrap();

        let units = db.list_scope_units("w1", "course-1").await.unwrap();
        let titles: Vec<&str> = units.iter().map(|u| u.title.as_str()).collect();
        assert_eq!(titles, vec!["Lecture 1", "Lecture 2"]);

        let docs = db.list_unit_documents(&first.id).await.unwrap();
        assert_eq!(docs, vec![slides.id.clone(), notes.id.clone()]);
        assert!(db.list_unit_documents(&second.id).await.unwrap().is_empty());
    }
}
