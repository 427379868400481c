//! Embedding cache rows

use super::{placeholders, MetaDb, MAX_BIND_IDS};
use crate::error::Result;
use chrono::Utc;
use std::collections::HashMap;

impl MetaDb {
    /// Look up cached vectors; missing keys are absent from the map
    pub async fn get_cached_embeddings(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, Vec<f32>>> {
        let mut found = HashMap::with_capacity(keys.len());

        for batch in keys.chunks(MAX_BIND_IDS) {
            let sql = format!(
                "SELECT key, vector_json FROM embedding_cache WHERE key IN ({})",
                placeholders(batch.len())
            );
            let mut query = sqlx::query_as::<_, (String, String)>(&sql);
            for key in batch {
                query = query.bind(key);
            }
            for (key, vector_json) in query.fetch_all(&self.pool).await? {
                let vector: Vec<f32> = serde_json::from_str(&vector_json)?;
                found.insert(key, vector);
            }
        }

        Ok(found)
    }

    /// Store vectors; keys already present are kept as they are
    pub async fn put_cached_embeddings(
        &self,
        model: &str,
        entries: &[(String, Vec<f32>)],
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        for (key, vector) in entries {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO embedding_cache (key, model, vector_json, created_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(key)
            .bind(model)
            .bind(serde_json::to_string(vector)?)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Number of cached vectors
    pub async fn count_cached_embeddings(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embedding_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
