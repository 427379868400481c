//! Persisted background task records

use super::MetaDb;
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal states no execution will move out of on its own
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// States a retry or resume may restart from
    pub fn is_restartable(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "succeeded" => Ok(TaskStatus::Succeeded),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(Error::Task(format!("Unknown task status: {}", s))),
        }
    }
}

/// A background task and its lifecycle state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub workspace_id: String,
    pub task_type: String,
    pub status: TaskStatus,
    /// Percentage in 0..=100
    pub progress: u8,
    pub error: Option<String>,
    /// Handler input; a successful run stores its output under `result`
    pub payload: Value,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskRecord {
    pub fn new(
        workspace_id: impl Into<String>,
        task_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            task_type: task_type.into(),
            status: TaskStatus::Queued,
            progress: 0,
            error: None,
            payload,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// The handler output stored by a successful run
    pub fn result(&self) -> Option<&Value> {
        self.payload.get("result")
    }
}

#[derive(FromRow)]
struct TaskRow {
    id: String,
    workspace_id: String,
    task_type: String,
    status: String,
    progress: i64,
    error: Option<String>,
    payload_json: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Self {
            status: row.status.parse()?,
            progress: row.progress.clamp(0, 100) as u8,
            payload: serde_json::from_str(&row.payload_json)?,
            id: row.id,
            workspace_id: row.workspace_id,
            task_type: row.task_type,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn status_list(statuses: &[TaskStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(",")
}

impl MetaDb {
    /// Insert a new task record
    pub async fn insert_task(&self, task: &TaskRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, workspace_id, task_type, status, progress, error, payload_json,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.workspace_id)
        .bind(&task.task_type)
        .bind(task.status.as_str())
        .bind(task.progress as i64)
        .bind(&task.error)
        .bind(serde_json::to_string(&task.payload)?)
        .bind(&task.created_at)
        .bind(&task.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get task by ID
    pub async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TaskRecord::try_from).transpose()
    }

    /// List tasks, newest first, optionally for one workspace
    pub async fn list_tasks(&self, workspace_id: Option<&str>) -> Result<Vec<TaskRecord>> {
        let rows = match workspace_id {
            Some(workspace) => {
                sqlx::query_as::<_, TaskRow>(
                    "SELECT * FROM tasks WHERE workspace_id = ? ORDER BY created_at DESC",
                )
                .bind(workspace)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(TaskRecord::try_from).collect()
    }

    /// Move a task to `to` only if it is currently in one of `from`.
    ///
    /// Returns whether the transition happened.
    pub async fn transition_task(
        &self,
        id: &str,
        from: &[TaskStatus],
        to: TaskStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE tasks SET status = ?, error = ?, updated_at = ? \
             WHERE id = ? AND status IN ({})",
            status_list(from)
        );
        let result = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(error)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record progress of a running task
    pub async fn update_task_progress(&self, id: &str, progress: u8) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET progress = ?, updated_at = ? WHERE id = ? AND status = 'running'",
        )
        .bind(progress.min(100) as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move a queued task to `running` on behalf of scheduler `owner`
    pub async fn claim_task(&self, id: &str, owner: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET status = 'running', error = NULL, owner = ?, heartbeat_at = ?,
                updated_at = ?
            WHERE id = ? AND status = 'queued'
            "#,
        )
        .bind(owner)
        .bind(Utc::now().timestamp_millis())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Refresh the liveness mark of every task `owner` is running
    pub async fn heartbeat_tasks(&self, owner: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE tasks SET heartbeat_at = ? WHERE owner = ? AND status = 'running'",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Move a task `owner` is running to a terminal `to`.
    ///
    /// Returns false when the task is no longer running under `owner`.
    pub async fn finish_task(
        &self,
        id: &str,
        owner: &str,
        to: TaskStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET status = ?, error = ?, updated_at = ?
            WHERE id = ? AND status = 'running' AND owner = ?
            "#,
        )
        .bind(to.as_str())
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a task `owner` is running succeeded and store its payload (with `result`).
    ///
    /// Returns false when the task is no longer running under `owner`.
    pub async fn complete_task(&self, id: &str, owner: &str, payload: &Value) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET status = 'succeeded', progress = 100, error = NULL,
                payload_json = ?, updated_at = ?
            WHERE id = ? AND status = 'running' AND owner = ?
            "#,
        )
        .bind(serde_json::to_string(payload)?)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Reset a failed or cancelled task to `queued` with progress 0.
    ///
    /// Returns false when the task was in any other state.
    pub async fn reset_task(&self, id: &str, payload: &Value) -> Result<bool> {
        let sql = format!(
            r#"
            UPDATE tasks SET status = 'queued', progress = 0, error = NULL,
                payload_json = ?, updated_at = ?
            WHERE id = ? AND status IN ({})
            "#,
            status_list(&[TaskStatus::Failed, TaskStatus::Cancelled])
        );
        let result = sqlx::query(&sql)
            .bind(serde_json::to_string(payload)?)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fail `running` tasks whose owner stopped writing heartbeats.
    ///
    /// A task counts as abandoned when it has no heartbeat or its last one is
    /// older than `stale_after`; live schedulers keep theirs fresh.
    pub async fn fail_interrupted_tasks(&self, stale_after: Duration) -> Result<u64> {
        let cutoff = Utc::now().timestamp_millis() - stale_after.as_millis() as i64;
        let result = sqlx::query(
            r#"
            UPDATE tasks SET status = 'failed', error = 'interrupted before completion',
                updated_at = ?
            WHERE status = 'running' AND (heartbeat_at IS NULL OR heartbeat_at < ?)
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
