use super::{TaskContext, TaskHandler, TaskOutcome};
use crate::error::Error;
use crate::index::{BuildOutcome, BuildRequest, IndexSynchronizer};
use crate::meta::TaskRecord;
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;

pub const INDEX_TASK: &str = "index";
pub const VACUUM_TASK: &str = "vacuum";

/// Runs `build_or_refresh` with a [`BuildRequest`] read from the task payload
pub struct IndexTaskHandler {
    sync: Arc<IndexSynchronizer>,
}

impl IndexTaskHandler {
    pub fn new(sync: Arc<IndexSynchronizer>) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl TaskHandler for IndexTaskHandler {
    async fn run(&self, task: &TaskRecord, ctx: TaskContext) -> anyhow::Result<TaskOutcome> {
        let request: BuildRequest = serde_json::from_value(task.payload.clone())
            .context("invalid index task payload")?;

        let outcome = self
            .sync
            .build_or_refresh(
                &task.workspace_id,
                &request,
                Some(ctx.progress.callback()),
                &ctx.cancel,
            )
            .await
            .context("index build failed")?;

        match outcome {
            BuildOutcome::Completed(stats) => {
                Ok(TaskOutcome::Completed(serde_json::to_value(stats)?))
            }
            BuildOutcome::Cancelled { .. } => Ok(TaskOutcome::Cancelled),
        }
    }
}

pub struct VacuumTaskHandler {
    sync: Arc<IndexSynchronizer>,
}

impl VacuumTaskHandler {
    pub fn new(sync: Arc<IndexSynchronizer>) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl TaskHandler for VacuumTaskHandler {
    async fn run(&self, task: &TaskRecord, ctx: TaskContext) -> anyhow::Result<TaskOutcome> {
        match self.sync.vacuum(&task.workspace_id, &ctx.cancel).await {
            Ok(status) => Ok(TaskOutcome::Completed(serde_json::to_value(status)?)),
            Err(Error::Cancelled(_)) => Ok(TaskOutcome::Cancelled),
            Err(e) => Err(e).context("vacuum failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::EmbeddingPipeline;
    use crate::index::test_support::*;
    use crate::sparse::SparseIndex;
    use crate::store::DenseIndex;
    use crate::tasks::{ProgressReporter, Scheduler, TaskStatus};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn cancelled_context() -> TaskContext {
        let ctx = TaskContext {
            cancel: CancellationToken::new(),
            progress: ProgressReporter::detached(),
        };
        ctx.cancel.cancel();
        ctx
    }

    async fn scheduler(fx: &Fixture) -> Scheduler {
        Scheduler::builder(fx.db.clone())
            .register(INDEX_TASK, Arc::new(IndexTaskHandler::new(fx.sync.clone())))
            .register(VACUUM_TASK, Arc::new(VacuumTaskHandler::new(fx.sync.clone())))
            .pool_size(2)
            .start()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_index_task_stores_stats() {
        let fx = fixture().await;
        seed_doc(&fx.db, "w1", "d1.pdf", &["a", "b", "c"]).await;
        let scheduler = scheduler(&fx).await;

        let task = scheduler
            .enqueue("w1", INDEX_TASK, json!({"reset": true, "rebuild_sparse": true}))
            .await
            .unwrap();
        let done = scheduler.run(&task.id).await.unwrap();

        assert_eq!(done.status, TaskStatus::Succeeded);
        assert_eq!(done.progress, 100);
        assert_eq!(done.result().unwrap()["indexed_count"], json!(3));
        assert_eq!(fx.dense.count("w1").await.unwrap(), 3);
        assert!(fx.sync.sparse().exists("w1").await);
    }

    #[tokio::test]
    async fn test_index_task_fails_on_empty_workspace() {
        let fx = fixture().await;
        let scheduler = scheduler(&fx).await;

        let task = scheduler.enqueue("empty", INDEX_TASK, json!({})).await.unwrap();
        let done = scheduler.run(&task.id).await.unwrap();

        assert_eq!(done.status, TaskStatus::Failed);
        let error = done.error.unwrap();
        assert!(error.starts_with("index build failed"));
        assert!(error.contains("No chunks to index"));
    }

    #[tokio::test]
    async fn test_bad_payload_fails() {
        let fx = fixture().await;
        let scheduler = scheduler(&fx).await;

        let task = scheduler
            .enqueue("w1", INDEX_TASK, json!({"reset": "yes please"}))
            .await
            .unwrap();
        let done = scheduler.run(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Failed);
        assert!(done.error.unwrap().contains("invalid index task payload"));
    }

    #[tokio::test]
    async fn test_vacuum_task_reports_status() {
        let fx = fixture().await;
        seed_doc(&fx.db, "w1", "keep.pdf", &["a"]).await;
        let (gone, _) = seed_doc(&fx.db, "w1", "gone.pdf", &["b", "c"]).await;
        fx.db.remove_document_record(&gone.id).await.unwrap();
        let scheduler = scheduler(&fx).await;

        let task = scheduler.enqueue("w1", VACUUM_TASK, json!({})).await.unwrap();
        let done = scheduler.run(&task.id).await.unwrap();

        let result = done.result().unwrap();
        assert_eq!(result["orphan_chunks"], json!(0));
        assert_eq!(result["chunk_count"], json!(1));
        assert_eq!(result["vector_count"], json!(1));
        assert_eq!(result["bm25_present"], json!(true));
    }

    #[tokio::test]
    async fn test_cancelled_vacuum_repair_reports_cancelled() {
        let fx = fixture().await;
        seed_doc(&fx.db, "w1", "a.pdf", &["a", "b"]).await;
        let handler = VacuumTaskHandler::new(fx.sync.clone());
        let task = TaskRecord::new("w1", VACUUM_TASK, json!({}));

        let outcome = handler.run(&task, cancelled_context()).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Cancelled);
        assert_eq!(fx.dense.count("w1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_vacuum_failure_after_cancel_is_still_a_failure() {
        let fx = fixture().await;
        seed_doc(&fx.db, "w1", "a.pdf", &["a", "b"]).await;
        fx.sync
            .build_or_refresh(
                "w1",
                &BuildRequest {
                    reset: true,
                    ..BuildRequest::default()
                },
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        // the snapshot directory cannot be created under a regular file
        let blocker = fx._tmp.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let broken = Arc::new(IndexSynchronizer::new(
            fx.db.clone(),
            fx.dense.clone(),
            SparseIndex::new(blocker.join("bm25")),
            EmbeddingPipeline::new(fx.embedder.clone(), 2),
            2,
        ));
        let handler = VacuumTaskHandler::new(broken);
        let task = TaskRecord::new("w1", VACUUM_TASK, json!({}));

        let err = handler.run(&task, cancelled_context()).await.unwrap_err();
        assert!(format!("{err:#}").starts_with("vacuum failed"));
    }
}
