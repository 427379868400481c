//! Background task orchestration
//!
//! Tasks are persisted in the metadata database and executed by a
//! [`Scheduler`] on a bounded pool. Cancellation is cooperative: handlers
//! receive a token and report a `Cancelled` outcome when they observe it.

mod handlers;
mod scheduler;

pub use handlers::*;
pub use scheduler::*;

pub use crate::meta::{TaskRecord, TaskStatus};

use crate::index::ProgressCallback;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How a handler run ended
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Finished; the value is stored under `result` in the task payload
    Completed(Value),
    /// Stopped after observing the cancellation token
    Cancelled,
}

/// Work for one task type
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, task: &TaskRecord, ctx: TaskContext) -> anyhow::Result<TaskOutcome>;
}

/// Handed to a handler for one execution
#[derive(Clone)]
pub struct TaskContext {
    pub cancel: CancellationToken,
    pub progress: ProgressReporter,
}

pub(crate) struct ProgressUpdate {
    pub task_id: String,
    pub percent: u8,
}

/// Converts (done, total) reports into persisted percentages.
///
/// Values are capped at 99 while running; only the scheduler sets 100.
#[derive(Clone)]
pub struct ProgressReporter {
    task_id: String,
    tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    last: Arc<AtomicU8>,
}

impl ProgressReporter {
    pub(crate) fn new(
        task_id: impl Into<String>,
        tx: mpsc::UnboundedSender<ProgressUpdate>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            tx: Some(tx),
            last: Arc::new(AtomicU8::new(0)),
        }
    }

    /// A reporter that records nothing, for running handlers outside a scheduler
    pub fn detached() -> Self {
        Self {
            task_id: String::new(),
            tx: None,
            last: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn percent_for(done: usize, total: usize) -> u8 {
        if total == 0 {
            return 0;
        }
        ((done.min(total) * 100) / total).min(99) as u8
    }

    pub fn report(&self, done: usize, total: usize) {
        let percent = Self::percent_for(done, total);
        if self.last.swap(percent, Ordering::SeqCst) == percent {
            return;
        }
        if let Some(tx) = &self.tx {
            // the writer only goes away with the scheduler
            let _ = tx.send(ProgressUpdate {
                task_id: self.task_id.clone(),
                percent,
            });
        }
    }

    /// Last reported percentage
    pub fn percent(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }

    pub fn callback(&self) -> ProgressCallback {
        let reporter = self.clone();
        Arc::new(move |done, total| reporter.report(done, total))
    }
}
