//! Task commands: persisted background jobs

use crate::error::{Error, Result};
use crate::meta::MetaDb;
use crate::tasks::{Scheduler, TaskRecord, TaskStatus};
use serde_json::Value;
use tracing::info;

/// Parse a JSON payload argument; absent means `{}`
pub fn parse_payload(raw: Option<&str>) -> Result<Value> {
    match raw {
        None => Ok(Value::Object(Default::default())),
        Some(text) => {
            let value: Value = serde_json::from_str(text)?;
            if !value.is_object() {
                return Err(Error::Task("task payload must be a JSON object".to_string()));
            }
            Ok(value)
        }
    }
}

/// Persist a queued task; with `run` also execute it and wait
pub async fn cmd_task_enqueue(
    scheduler: &Scheduler,
    workspace: &str,
    task_type: &str,
    payload: Value,
    run: bool,
) -> Result<TaskRecord> {
    let task = scheduler.enqueue(workspace, task_type, payload).await?;
    info!(task_id = %task.id, task_type = %task_type, "Task queued");
    if run {
        return scheduler.run(&task.id).await;
    }
    Ok(task)
}

/// Read-only: needs no scheduler, so it never touches running tasks
pub async fn cmd_task_list(db: &MetaDb, workspace: Option<&str>) -> Result<Vec<TaskRecord>> {
    db.list_tasks(workspace).await
}

pub async fn cmd_task_show(db: &MetaDb, task_id: &str) -> Result<TaskRecord> {
    db.get_task(task_id)
        .await?
        .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
}

/// Run a queued task in this process and wait for its final record
pub async fn cmd_task_run(scheduler: &Scheduler, task_id: &str) -> Result<TaskRecord> {
    scheduler.run(task_id).await
}

pub async fn cmd_task_cancel(scheduler: &Scheduler, task_id: &str) -> Result<TaskRecord> {
    scheduler.cancel(task_id).await
}

/// Re-run a failed or cancelled task to completion
pub async fn cmd_task_retry(scheduler: &Scheduler, task_id: &str) -> Result<TaskRecord> {
    scheduler.retry(task_id).await?;
    scheduler.wait(task_id).await
}

pub async fn cmd_task_resume(scheduler: &Scheduler, task_id: &str) -> Result<TaskRecord> {
    scheduler.resume(task_id).await?;
    scheduler.wait(task_id).await
}

fn status_marker(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued => "·",
        TaskStatus::Running => "▶",
        TaskStatus::Succeeded => "✓",
        TaskStatus::Failed => "✗",
        TaskStatus::Cancelled => "⊘",
    }
}

pub fn print_task(task: &TaskRecord) {
    println!(
        "{} {} [{}] {} {}%",
        status_marker(task.status),
        task.id,
        task.task_type,
        task.status,
        task.progress
    );
    println!("  Workspace: {}", task.workspace_id);
    println!("  Created: {}  Updated: {}", task.created_at, task.updated_at);
    if let Some(error) = &task.error {
        println!("  Error: {}", error);
    }
    if let Some(result) = task.result() {
        println!("  Result: {}", result);
    }
}

pub fn print_tasks(tasks: &[TaskRecord]) {
    if tasks.is_empty() {
        println!("No tasks. Use 'stacks task enqueue' to add one.");
        return;
    }
    for task in tasks {
        println!(
            "{} {}  {:<8} {:<10} {:>3}%  {}",
            status_marker(task.status),
            task.id,
            task.task_type,
            task.status.to_string(),
            task.progress,
            task.workspace_id
        );
    }
}
