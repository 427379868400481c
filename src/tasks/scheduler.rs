use super::{ProgressReporter, ProgressUpdate, TaskContext, TaskHandler, TaskOutcome};
use crate::error::{Error, Result};
use crate::meta::{MetaDb, TaskRecord, TaskStatus};
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Missed heartbeats after which a running task counts as abandoned
const STALE_HEARTBEATS: u32 = 6;

struct RunningTask {
    cancel: CancellationToken,
    /// Cancelled once the execution has recorded its outcome
    done: CancellationToken,
    handle: JoinHandle<()>,
}

impl RunningTask {
    fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }
}

struct Inner {
    db: MetaDb,
    /// Identifies this scheduler in the `owner` column of tasks it runs
    owner: String,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    permits: Arc<Semaphore>,
    running: Mutex<HashMap<String, RunningTask>>,
    shutdown: CancellationToken,
    accepting: AtomicBool,
    progress_tx: mpsc::UnboundedSender<ProgressUpdate>,
}

/// Configures and starts a [`Scheduler`]
pub struct SchedulerBuilder {
    db: MetaDb,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    pool_size: usize,
    heartbeat_interval: Duration,
}

impl SchedulerBuilder {
    pub fn register(
        mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        self.handlers.insert(task_type.into(), handler);
        self
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    /// How often running tasks are marked alive
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_millis(10));
        self
    }

    /// Start the scheduler.
    ///
    /// Running tasks whose owner has missed several heartbeats are marked
    /// failed; tasks another live scheduler is executing are left alone.
    pub async fn start(self) -> Result<Scheduler> {
        let stale_after = self.heartbeat_interval * STALE_HEARTBEATS;
        let interrupted = self.db.fail_interrupted_tasks(stale_after).await?;
        if interrupted > 0 {
            warn!(count = interrupted, "Marked interrupted tasks as failed");
        }

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressUpdate>();
        let writer_db = self.db.clone();
        tokio::spawn(async move {
            while let Some(update) = progress_rx.recv().await {
                if let Err(e) = writer_db
                    .update_task_progress(&update.task_id, update.percent)
                    .await
                {
                    warn!(task_id = %update.task_id, error = %e, "Failed to record task progress");
                }
            }
        });

        let inner = Arc::new(Inner {
            db: self.db,
            owner: Uuid::new_v4().to_string(),
            handlers: self.handlers,
            permits: Arc::new(Semaphore::new(self.pool_size)),
            running: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            accepting: AtomicBool::new(true),
            progress_tx,
        });
        tokio::spawn(heartbeat(Arc::downgrade(&inner), self.heartbeat_interval));

        debug!(pool_size = self.pool_size, owner = %inner.owner, "Task scheduler started");
        Ok(Scheduler { inner })
    }
}

/// Keeps the tasks of one scheduler marked alive until it is dropped or shut down
async fn heartbeat(scheduler: Weak<Inner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = scheduler.upgrade() else {
            break;
        };
        if inner.shutdown.is_cancelled() {
            break;
        }
        if let Err(e) = inner.db.heartbeat_tasks(&inner.owner).await {
            warn!(owner = %inner.owner, error = %e, "Failed to record task heartbeat");
        }
    }
}

/// Runs persisted tasks on a bounded worker pool.
///
/// At most one execution per task id is in flight; different ids run
/// concurrently up to the pool size. Cloning shares the same pool.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn builder(db: MetaDb) -> SchedulerBuilder {
        SchedulerBuilder {
            db,
            handlers: HashMap::new(),
            pool_size: 1,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    /// Persist a new queued task
    pub async fn enqueue(
        &self,
        workspace: &str,
        task_type: &str,
        payload: Value,
    ) -> Result<TaskRecord> {
        if !self.inner.handlers.contains_key(task_type) {
            return Err(Error::UnknownTaskType(task_type.to_string()));
        }
        let task = TaskRecord::new(workspace, task_type, payload);
        self.inner.db.insert_task(&task).await?;
        info!(
            task_id = %task.id,
            task_type = %task_type,
            workspace = %workspace,
            "Task enqueued"
        );
        Ok(task)
    }

    /// Start executing a queued task in the background.
    ///
    /// Returns false when the task already has a live execution.
    pub async fn submit(&self, task_id: &str) -> Result<bool> {
        Ok(self.spawn(task_id).await?.is_some())
    }

    /// Execute a queued task and wait for its final record.
    ///
    /// A run that ends cancelled is reported as `TaskCancelled`.
    pub async fn run(&self, task_id: &str) -> Result<TaskRecord> {
        let Some(done) = self.spawn(task_id).await? else {
            return Err(Error::TaskAlreadyRunning(task_id.to_string()));
        };
        done.cancelled().await;

        let task = self.get(task_id).await?;
        if task.status == TaskStatus::Cancelled {
            return Err(Error::TaskCancelled(task_id.to_string()));
        }
        Ok(task)
    }

    /// Request cancellation.
    ///
    /// An in-flight task stops at its next check; a queued task that is not
    /// executing here is marked cancelled directly.
    pub async fn cancel(&self, task_id: &str) -> Result<TaskRecord> {
        {
            let running = self.inner.running.lock().await;
            if let Some(entry) = running.get(task_id).filter(|e| e.is_live()) {
                info!(task_id = %task_id, "Cancelling in-flight task");
                entry.cancel.cancel();
                drop(running);
                return self.get(task_id).await;
            }
        }

        let task = self.get(task_id).await?;
        match task.status {
            TaskStatus::Queued => {
                self.inner
                    .db
                    .transition_task(
                        task_id,
                        &[TaskStatus::Queued],
                        TaskStatus::Cancelled,
                        None,
                    )
                    .await?;
                info!(task_id = %task_id, "Cancelled queued task");
                self.get(task_id).await
            }
            TaskStatus::Cancelled => Ok(task),
            status => Err(Error::Task(format!(
                "Task {} is {} and cannot be cancelled here",
                task_id, status
            ))),
        }
    }

    /// Restart a failed or cancelled task from the beginning
    pub async fn retry(&self, task_id: &str) -> Result<TaskRecord> {
        let task = self.get(task_id).await?;
        if !task.status.is_restartable() {
            return Err(Error::Task(format!(
                "Task {} is {}; only failed or cancelled tasks can be restarted",
                task_id, task.status
            )));
        }

        let mut payload = task.payload.clone();
        if let Value::Object(map) = &mut payload {
            map.remove("result");
        }
        if !self.inner.db.reset_task(task_id, &payload).await? {
            return Err(Error::Task(format!("Task {} changed state concurrently", task_id)));
        }
        info!(task_id = %task_id, previous = %task.status, "Task reset to queued");

        if !self.submit(task_id).await? {
            // the previous execution recorded its outcome but has not unregistered yet
            self.wait_in_flight(task_id).await;
            if !self.submit(task_id).await? {
                return Err(Error::TaskAlreadyRunning(task_id.to_string()));
            }
        }
        self.get(task_id).await
    }

    /// Same as `retry`: there are no checkpoints, so resuming restarts the task
    pub async fn resume(&self, task_id: &str) -> Result<TaskRecord> {
        self.retry(task_id).await
    }

    pub async fn get(&self, task_id: &str) -> Result<TaskRecord> {
        self.inner
            .db
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }

    /// Wait for the in-flight execution of a task, if any, and return its record
    pub async fn wait(&self, task_id: &str) -> Result<TaskRecord> {
        self.wait_in_flight(task_id).await;
        self.get(task_id).await
    }

    async fn wait_in_flight(&self, task_id: &str) {
        let done = self
            .inner
            .running
            .lock()
            .await
            .get(task_id)
            .map(|e| e.done.clone());
        if let Some(done) = done {
            done.cancelled().await;
        }
    }

    pub async fn list(&self, workspace: Option<&str>) -> Result<Vec<TaskRecord>> {
        self.inner.db.list_tasks(workspace).await
    }

    pub async fn is_in_flight(&self, task_id: &str) -> bool {
        self.inner
            .running
            .lock()
            .await
            .get(task_id)
            .is_some_and(|e| e.is_live())
    }

    /// Stop accepting work, cancel every in-flight task and wait for them
    pub async fn shutdown(&self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        self.inner.shutdown.cancel();

        let entries: Vec<(String, RunningTask)> =
            self.inner.running.lock().await.drain().collect();
        for (task_id, entry) in entries {
            if let Err(e) = entry.handle.await {
                error!(task_id = %task_id, error = %e, "Task execution aborted");
            }
        }
        info!("Task scheduler stopped");
    }

    /// Returns the completion token of the new execution, or `None` when one is live
    async fn spawn(&self, task_id: &str) -> Result<Option<CancellationToken>> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(Error::Task("Scheduler is shutting down".to_string()));
        }

        // held across the spawn so a fast task cannot unregister before it is registered
        let mut running = self.inner.running.lock().await;
        if running.get(task_id).is_some_and(|e| e.is_live()) {
            debug!(task_id = %task_id, "Task already in flight");
            return Ok(None);
        }

        let task = self.get(task_id).await?;
        match task.status {
            TaskStatus::Queued => {}
            TaskStatus::Cancelled => return Err(Error::TaskCancelled(task_id.to_string())),
            status => {
                return Err(Error::Task(format!(
                    "Task {} is {}; only queued tasks can be started",
                    task_id, status
                )))
            }
        }

        let cancel = self.inner.shutdown.child_token();
        let done = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let (token, finished) = (cancel.clone(), done.clone());
        let id = task_id.to_string();
        let handle = tokio::spawn(async move {
            execute(&inner, &id, token).await;
            inner.running.lock().await.remove(&id);
            finished.cancel();
        });

        running.insert(
            task_id.to_string(),
            RunningTask {
                cancel,
                done: done.clone(),
                handle,
            },
        );
        Ok(Some(done))
    }
}

/// One execution: wait for a permit, run the handler, record the outcome
async fn execute(inner: &Inner, task_id: &str, cancel: CancellationToken) {
    let permit = tokio::select! {
        permit = Arc::clone(&inner.permits).acquire_owned() => permit,
        _ = cancel.cancelled() => {
            mark_cancelled(inner, task_id, TaskStatus::Queued).await;
            return;
        }
    };
    let _permit = match permit {
        Ok(permit) => permit,
        Err(e) => {
            error!(task_id = %task_id, error = %e, "Worker pool closed");
            return;
        }
    };

    if cancel.is_cancelled() {
        mark_cancelled(inner, task_id, TaskStatus::Queued).await;
        return;
    }

    match inner.db.claim_task(task_id, &inner.owner).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(task_id = %task_id, "Task left the queued state before starting");
            return;
        }
        Err(e) => {
            error!(task_id = %task_id, error = %e, "Failed to start task");
            return;
        }
    }

    let task = match inner.db.get_task(task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => {
            warn!(task_id = %task_id, "Task disappeared before running");
            return;
        }
        Err(e) => {
            error!(task_id = %task_id, error = %e, "Failed to load task");
            return;
        }
    };

    let Some(handler) = inner.handlers.get(&task.task_type).cloned() else {
        let message = format!("Unknown task type: {}", task.task_type);
        mark_failed(inner, task_id, &message).await;
        return;
    };

    info!(
        task_id = %task_id,
        task_type = %task.task_type,
        workspace = %task.workspace_id,
        "Task started"
    );

    let ctx = TaskContext {
        cancel,
        progress: ProgressReporter::new(task_id, inner.progress_tx.clone()),
    };
    let result = AssertUnwindSafe(handler.run(&task, ctx)).catch_unwind().await;

    match result {
        Ok(Ok(TaskOutcome::Completed(value))) => {
            let mut payload = match task.payload {
                Value::Object(map) => map,
                Value::Null => serde_json::Map::new(),
                other => {
                    let mut map = serde_json::Map::new();
                    map.insert("input".to_string(), other);
                    map
                }
            };
            payload.insert("result".to_string(), value);
            let recorded = inner
                .db
                .complete_task(task_id, &inner.owner, &Value::Object(payload))
                .await;
            match recorded {
                Ok(true) => info!(task_id = %task_id, "Task succeeded"),
                Ok(false) => warn!(task_id = %task_id, "Task no longer running; result dropped"),
                Err(e) => error!(task_id = %task_id, error = %e, "Failed to record task result"),
            }
        }
        Ok(Ok(TaskOutcome::Cancelled)) => {
            mark_cancelled(inner, task_id, TaskStatus::Running).await
        }
        Ok(Err(e)) => mark_failed(inner, task_id, &format!("{e:#}")).await,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            mark_failed(inner, task_id, &format!("task panicked: {}", message)).await;
        }
    }
}

async fn mark_cancelled(inner: &Inner, task_id: &str, from: TaskStatus) {
    let recorded = match from {
        TaskStatus::Running => {
            inner
                .db
                .finish_task(task_id, &inner.owner, TaskStatus::Cancelled, None)
                .await
        }
        from => {
            inner
                .db
                .transition_task(task_id, &[from], TaskStatus::Cancelled, None)
                .await
        }
    };
    match recorded {
        Ok(true) => info!(task_id = %task_id, "Task cancelled"),
        Ok(false) => debug!(task_id = %task_id, "Task already left {} state", from),
        Err(e) => error!(task_id = %task_id, error = %e, "Failed to record cancellation"),
    }
}

async fn mark_failed(inner: &Inner, task_id: &str, message: &str) {
    warn!(task_id = %task_id, error = %message, "Task failed");
    if let Err(e) = inner
        .db
        .finish_task(task_id, &inner.owner, TaskStatus::Failed, Some(message))
        .await
    {
        error!(task_id = %task_id, error = %e, "Failed to record task failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    struct EchoHandler;

    #[async_trait]
    impl TaskHandler for EchoHandler {
        async fn run(&self, task: &TaskRecord, ctx: TaskContext) -> anyhow::Result<TaskOutcome> {
            ctx.progress.report(1, 2);
            Ok(TaskOutcome::Completed(json!({"echo": task.payload["value"]})))
        }
    }

    /// Fails the first `failures` runs, then succeeds
    struct FlakyHandler {
        failures: usize,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler for FlakyHandler {
        async fn run(&self, _task: &TaskRecord, _ctx: TaskContext) -> anyhow::Result<TaskOutcome> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if run < self.failures {
                anyhow::bail!("backend unavailable (run {})", run + 1);
            }
            Ok(TaskOutcome::Completed(json!({"runs": run + 1})))
        }
    }

    struct PanicHandler;

    #[async_trait]
    impl TaskHandler for PanicHandler {
        async fn run(&self, _task: &TaskRecord, _ctx: TaskContext) -> anyhow::Result<TaskOutcome> {
            panic!("handler exploded");
        }
    }

    /// Blocks until released or cancelled
    struct GatedHandler {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl TaskHandler for GatedHandler {
        async fn run(&self, _task: &TaskRecord, ctx: TaskContext) -> anyhow::Result<TaskOutcome> {
            self.started.notify_one();
            tokio::select! {
                _ = ctx.cancel.cancelled() => Ok(TaskOutcome::Cancelled),
                _ = self.release.notified() => Ok(TaskOutcome::Completed(json!("released"))),
            }
        }
    }

    const BEAT: Duration = Duration::from_millis(20);

    struct Harness {
        db: MetaDb,
        scheduler: Scheduler,
        started: Arc<Notify>,
        release: Arc<Notify>,
        _tmp: TempDir,
    }

    async fn harness(pool_size: usize) -> Harness {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::new(&tmp.path().join("test.db")).await.unwrap();
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let scheduler = Scheduler::builder(db.clone())
            .register("echo", Arc::new(EchoHandler))
            .register(
                "flaky",
                Arc::new(FlakyHandler {
                    failures: 1,
                    runs: AtomicUsize::new(0),
                }),
            )
            .register("panic", Arc::new(PanicHandler))
            .register(
                "gated",
                Arc::new(GatedHandler {
                    started: started.clone(),
                    release: release.clone(),
                }),
            )
            .pool_size(pool_size)
            .heartbeat_interval(BEAT)
            .start()
            .await
            .unwrap();
        Harness {
            db,
            scheduler,
            started,
            release,
            _tmp: tmp,
        }
    }

    async fn wait_terminal(scheduler: &Scheduler, task_id: &str) -> TaskRecord {
        for _ in 0..500 {
            let task = scheduler.get(task_id).await.unwrap();
            if task.status.is_terminal() && !scheduler.is_in_flight(task_id).await {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {task_id} did not finish");
    }

    #[tokio::test]
    async fn test_successful_run() {
        let h = harness(2).await;
        let task = h
            .scheduler
            .enqueue("w1", "echo", json!({"value": 7}))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.progress, 0);

        let done = h.scheduler.run(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Succeeded);
        assert_eq!(done.progress, 100);
        assert_eq!(done.result(), Some(&json!({"echo": 7})));
        assert_eq!(done.payload["value"], json!(7));
    }

    #[tokio::test]
    async fn test_failure_then_retry() {
        let h = harness(1).await;
        let task = h.scheduler.enqueue("w1", "flaky", json!({})).await.unwrap();

        let failed = h.scheduler.run(&task.id).await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed
            .error
            .as_deref()
            .is_some_and(|e| e.contains("backend unavailable")));

        h.scheduler.retry(&task.id).await.unwrap();
        let done = h.scheduler.wait(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Succeeded);
        assert!(done.error.is_none());
        assert_eq!(done.result(), Some(&json!({"runs": 2})));
    }

    #[tokio::test]
    async fn test_cancelled_queued_task_cannot_run() {
        let h = harness(1).await;
        let task = h.scheduler.enqueue("w1", "echo", json!({})).await.unwrap();

        let cancelled = h.scheduler.cancel(&task.id).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);

        let err = h.scheduler.run(&task.id).await.unwrap_err();
        assert!(matches!(err, Error::TaskCancelled(_)));
    }

    #[tokio::test]
    async fn test_one_execution_per_task_id() {
        let h = harness(2).await;
        let task = h.scheduler.enqueue("w1", "gated", json!({})).await.unwrap();

        assert!(h.scheduler.submit(&task.id).await.unwrap());
        h.started.notified().await;
        assert!(!h.scheduler.submit(&task.id).await.unwrap());
        assert!(matches!(
            h.scheduler.run(&task.id).await,
            Err(Error::TaskAlreadyRunning(_))
        ));
        assert_eq!(
            h.scheduler.get(&task.id).await.unwrap().status,
            TaskStatus::Running
        );

        h.release.notify_one();
        let done = wait_terminal(&h.scheduler, &task.id).await;
        assert_eq!(done.status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_cancel_running_task() {
        let h = harness(1).await;
        let task = h.scheduler.enqueue("w1", "gated", json!({})).await.unwrap();

        h.scheduler.submit(&task.id).await.unwrap();
        h.started.notified().await;
        h.scheduler.cancel(&task.id).await.unwrap();

        let done = wait_terminal(&h.scheduler, &task.id).await;
        assert_eq!(done.status, TaskStatus::Cancelled);
        assert!(done.error.is_none());

        let resumed = h.scheduler.resume(&task.id).await.unwrap();
        assert_eq!(resumed.progress, 0);
        h.started.notified().await;
        h.release.notify_one();
        assert_eq!(
            wait_terminal(&h.scheduler, &task.id).await.status,
            TaskStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_worker() {
        let h = harness(1).await;
        let first = h.scheduler.enqueue("w1", "gated", json!({})).await.unwrap();
        let second = h.scheduler.enqueue("w1", "echo", json!({})).await.unwrap();

        h.scheduler.submit(&first.id).await.unwrap();
        h.started.notified().await;
        h.scheduler.submit(&second.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            h.scheduler.get(&second.id).await.unwrap().status,
            TaskStatus::Queued
        );

        h.scheduler.cancel(&second.id).await.unwrap();
        assert_eq!(
            wait_terminal(&h.scheduler, &second.id).await.status,
            TaskStatus::Cancelled
        );

        h.release.notify_one();
        assert_eq!(
            wait_terminal(&h.scheduler, &first.id).await.status,
            TaskStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_panic_marks_failed() {
        let h = harness(1).await;
        let task = h.scheduler.enqueue("w1", "panic", json!({})).await.unwrap();
        let done = h.scheduler.run(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Failed);
        assert!(done.error.unwrap().contains("handler exploded"));
    }

    #[tokio::test]
    async fn test_restart_rules() {
        let h = harness(1).await;
        assert!(matches!(
            h.scheduler.enqueue("w1", "reindex-everything", json!({})).await,
            Err(Error::UnknownTaskType(_))
        ));
        assert!(matches!(
            h.scheduler.get("missing").await,
            Err(Error::TaskNotFound(_))
        ));

        let task = h.scheduler.enqueue("w1", "echo", json!({})).await.unwrap();
        h.scheduler.run(&task.id).await.unwrap();
        assert!(matches!(
            h.scheduler.retry(&task.id).await,
            Err(Error::Task(_))
        ));
        assert!(matches!(h.scheduler.run(&task.id).await, Err(Error::Task(_))));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_work() {
        let h = harness(1).await;
        let task = h.scheduler.enqueue("w1", "gated", json!({})).await.unwrap();
        h.scheduler.submit(&task.id).await.unwrap();
        h.started.notified().await;

        h.scheduler.shutdown().await;

        let stopped = h.scheduler.get(&task.id).await.unwrap();
        assert_eq!(stopped.status, TaskStatus::Cancelled);
        let other = h.scheduler.enqueue("w1", "echo", json!({})).await.unwrap();
        assert!(h.scheduler.submit(&other.id).await.is_err());
    }

    #[tokio::test]
    async fn test_start_fails_interrupted_tasks() {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::new(&tmp.path().join("test.db")).await.unwrap();
        let task = TaskRecord::new("w1", "echo", json!({}));
        db.insert_task(&task).await.unwrap();
        db.transition_task(&task.id, &[TaskStatus::Queued], TaskStatus::Running, None)
            .await
            .unwrap();

        let scheduler = Scheduler::builder(db.clone())
            .register("echo", Arc::new(EchoHandler))
            .start()
            .await
            .unwrap();

        let loaded = scheduler.get(&task.id).await.unwrap();
        assert_eq!(loaded.status, TaskStatus::Failed);
        assert!(loaded.error.is_some());
    }

    #[tokio::test]
    async fn test_second_scheduler_leaves_live_tasks_alone() {
        let h = harness(1).await;
        let task = h.scheduler.enqueue("w1", "gated", json!({})).await.unwrap();
        h.scheduler.submit(&task.id).await.unwrap();
        h.started.notified().await;

        // well past the stale window; only heartbeats keep the task alive
        tokio::time::sleep(BEAT * STALE_HEARTBEATS * 3).await;
        let other = Scheduler::builder(h.db.clone())
            .register("gated", Arc::new(EchoHandler))
            .heartbeat_interval(BEAT)
            .start()
            .await
            .unwrap();

        let seen = other.get(&task.id).await.unwrap();
        assert_eq!(seen.status, TaskStatus::Running);
        assert!(seen.error.is_none());
        assert!(matches!(other.retry(&task.id).await, Err(Error::Task(_))));
        assert!(!other.is_in_flight(&task.id).await);

        h.release.notify_one();
        let done = wait_terminal(&h.scheduler, &task.id).await;
        assert_eq!(done.status, TaskStatus::Succeeded);
        assert_eq!(done.result(), Some(&json!("released")));
        other.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_reclaims_tasks_of_silent_owner() {
        let h = harness(1).await;
        let task = h.scheduler.enqueue("w1", "echo", json!({})).await.unwrap();
        assert!(h.db.claim_task(&task.id, "crashed-process").await.unwrap());

        let fresh = Scheduler::builder(h.db.clone())
            .register("echo", Arc::new(EchoHandler))
            .heartbeat_interval(BEAT)
            .start()
            .await
            .unwrap();
        assert_eq!(fresh.get(&task.id).await.unwrap().status, TaskStatus::Running);

        tokio::time::sleep(BEAT * STALE_HEARTBEATS * 2).await;
        let later = Scheduler::builder(h.db.clone())
            .register("echo", Arc::new(EchoHandler))
            .heartbeat_interval(BEAT)
            .start()
            .await
            .unwrap();
        let loaded = later.get(&task.id).await.unwrap();
        assert_eq!(loaded.status, TaskStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("interrupted before completion"));

        later.retry(&task.id).await.unwrap();
        assert_eq!(later.wait(&task.id).await.unwrap().status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_retry_waits_for_previous_execution_to_unregister() {
        let h = harness(1).await;
        let task = h
            .scheduler
            .enqueue("w1", "echo", json!({"value": 3}))
            .await
            .unwrap();
        h.db.transition_task(&task.id, &[TaskStatus::Queued], TaskStatus::Failed, Some("boom"))
            .await
            .unwrap();

        // an execution that has recorded its outcome but is still registered
        let unregister = Arc::new(Notify::new());
        {
            let inner = Arc::clone(&h.scheduler.inner);
            let done = CancellationToken::new();
            let (gate, finished, id) = (unregister.clone(), done.clone(), task.id.clone());
            let handle = tokio::spawn(async move {
                gate.notified().await;
                inner.running.lock().await.remove(&id);
                finished.cancel();
            });
            h.scheduler.inner.running.lock().await.insert(
                task.id.clone(),
                RunningTask {
                    cancel: CancellationToken::new(),
                    done,
                    handle,
                },
            );
        }

        let scheduler = h.scheduler.clone();
        let id = task.id.clone();
        let retry = tokio::spawn(async move { scheduler.retry(&id).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!retry.is_finished());

        unregister.notify_one();
        retry.await.unwrap().unwrap();
        let done = wait_terminal(&h.scheduler, &task.id).await;
        assert_eq!(done.status, TaskStatus::Succeeded);
        assert_eq!(done.result(), Some(&json!({"echo": 3})));
    }
}
