//! Background task queue: payload types and enqueue operations.
//!
//! Every run executes as one or more queue tasks. Continuation state is
//! explicit in the payload (run id + page index) so a large feed set can be
//! processed across several task invocations that all accumulate into the
//! same run record.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::run::{RunKind, RunRecord};
use crate::store::Store;

pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Ingest,
    Purge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// One queued unit of work.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    pub payload: Value,
    pub status: TaskStatus,
    pub attempt: i32,
    pub max_attempts: i32,
    pub next_run_at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for one ingest page task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IngestPayload {
    pub run_id: Uuid,
    pub user_id: Uuid,
    pub page_index: u32,
}

/// Payload for one retention purge task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PurgePayload {
    pub run_id: Uuid,
    pub user_id: Uuid,
}

impl Task {
    fn new(kind: TaskKind, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            kind,
            payload,
            status: TaskStatus::Pending,
            attempt: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            next_run_at: now,
            lease_expires_at: None,
            worker_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn ingest(payload: &IngestPayload) -> Self {
        Self::new(
            TaskKind::Ingest,
            serde_json::to_value(payload).unwrap_or(Value::Null),
        )
    }

    pub fn purge(payload: &PurgePayload) -> Self {
        Self::new(
            TaskKind::Purge,
            serde_json::to_value(payload).unwrap_or(Value::Null),
        )
    }

    pub fn ingest_payload(&self) -> Result<IngestPayload> {
        serde_json::from_value(self.payload.clone())
            .with_context(|| format!("task {} has an invalid ingest payload", self.id))
    }

    pub fn purge_payload(&self) -> Result<PurgePayload> {
        serde_json::from_value(self.payload.clone())
            .with_context(|| format!("task {} has an invalid purge payload", self.id))
    }
}

/// Create a run record in `enqueued` and dispatch its first page task.
/// A dispatch failure marks the run `enqueue_failed` and is returned.
pub async fn enqueue_ingest_run(
    store: &dyn Store,
    user_id: Uuid,
    kind: RunKind,
) -> Result<Uuid> {
    let run = RunRecord::enqueued(user_id, kind);
    store.insert_run(&run).await.context("recording ingest run")?;

    let payload = IngestPayload {
        run_id: run.id,
        user_id,
        page_index: 0,
    };
    if let Err(error) = store.enqueue_task(&Task::ingest(&payload)).await {
        let message = format!("failed to dispatch ingest task: {error:#}");
        tracing::error!(run_id = %run.id, user_id = %user_id, error = %message, "run dispatch failed");
        store.mark_run_enqueue_failed(run.id, &message).await.ok();
        return Err(error.context("dispatching ingest task"));
    }

    tracing::info!(run_id = %run.id, user_id = %user_id, kind = ?kind, "ingest run enqueued");
    Ok(run.id)
}

/// Create a cleanup run record in `enqueued` and dispatch its purge task.
pub async fn enqueue_purge_run(store: &dyn Store, user_id: Uuid) -> Result<Uuid> {
    let run = RunRecord::enqueued(user_id, RunKind::Cleanup);
    store.insert_run(&run).await.context("recording cleanup run")?;

    let payload = PurgePayload {
        run_id: run.id,
        user_id,
    };
    if let Err(error) = store.enqueue_task(&Task::purge(&payload)).await {
        let message = format!("failed to dispatch purge task: {error:#}");
        tracing::error!(run_id = %run.id, user_id = %user_id, error = %message, "run dispatch failed");
        store.mark_run_enqueue_failed(run.id, &message).await.ok();
        return Err(error.context("dispatching purge task"));
    }

    tracing::info!(run_id = %run.id, user_id = %user_id, "cleanup run enqueued");
    Ok(run.id)
}
