//! Periodic triggers, driven by tokio-cron-scheduler.
//!
//! The scheduler only enqueues work: the hourly trigger fans one scheduled
//! ingest run out per opted-in user, the daily trigger fans one cleanup run
//! out per user. Execution happens in the task worker.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::run::RunKind;
use crate::store::Store;
use crate::tasks;

/// Start the periodic triggers. The returned scheduler must be kept alive.
pub async fn start_scheduler(store: Arc<dyn Store>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let ingest_store = store.clone();
    let ingest_job = Job::new_async("0 0 * * * *", move |_uuid, _lock| {
        let store = ingest_store.clone();
        Box::pin(async move {
            if let Err(error) = fan_out_scheduled_runs(store.as_ref()).await {
                tracing::error!(error = %format!("{error:#}"), "scheduled ingest fan-out failed");
            }
        })
    })?;
    scheduler.add(ingest_job).await?;

    let purge_store = store.clone();
    let purge_job = Job::new_async("0 0 3 * * *", move |_uuid, _lock| {
        let store = purge_store.clone();
        Box::pin(async move {
            if let Err(error) = fan_out_purge_runs(store.as_ref()).await {
                tracing::error!(error = %format!("{error:#}"), "retention purge fan-out failed");
            }
        })
    })?;
    scheduler.add(purge_job).await?;

    scheduler.start().await?;
    tracing::info!("scheduled tasks started (ingest fan-out hourly, retention purge daily at 03:00)");
    Ok(scheduler)
}

/// Enqueue one scheduled ingest run per user that has scheduling enabled.
/// A failure for one user is logged and does not block the rest.
pub async fn fan_out_scheduled_runs(store: &dyn Store) -> Result<usize> {
    let users = store
        .scheduling_enabled_users()
        .await
        .context("listing users for scheduled runs")?;
    if users.is_empty() {
        tracing::debug!("no users opted into scheduled runs");
        return Ok(0);
    }

    let mut enqueued = 0;
    for user_id in users {
        match tasks::enqueue_ingest_run(store, user_id, RunKind::Scheduled).await {
            Ok(run_id) => {
                enqueued += 1;
                tracing::debug!(run_id = %run_id, user_id = %user_id, "scheduled run enqueued");
            }
            Err(error) => {
                tracing::error!(
                    user_id = %user_id,
                    error = %format!("{error:#}"),
                    "failed to enqueue scheduled run"
                );
            }
        }
    }
    tracing::info!(enqueued = enqueued, "scheduled ingest fan-out complete");
    Ok(enqueued)
}

/// Enqueue one cleanup run per user.
pub async fn fan_out_purge_runs(store: &dyn Store) -> Result<usize> {
    let users = store.all_users().await.context("listing users for cleanup")?;
    let mut enqueued = 0;
    for user_id in users {
        match tasks::enqueue_purge_run(store, user_id).await {
            Ok(run_id) => {
                enqueued += 1;
                tracing::debug!(run_id = %run_id, user_id = %user_id, "cleanup run enqueued");
            }
            Err(error) => {
                tracing::error!(
                    user_id = %user_id,
                    error = %format!("{error:#}"),
                    "failed to enqueue cleanup run"
                );
            }
        }
    }
    tracing::info!(enqueued = enqueued, "retention purge fan-out complete");
    Ok(enqueued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::RunStatus;
    use crate::store::MemoryStore;
    use crate::tasks::TaskKind;
    use uuid::Uuid;

    #[tokio::test]
    async fn scheduled_fan_out_skips_opted_out_users() {
        let enabled = Uuid::now_v7();
        let disabled = Uuid::now_v7();
        let store = MemoryStore::new();
        store.add_user(enabled, true);
        store.add_user(disabled, false);

        let enqueued = fan_out_scheduled_runs(&store).await.unwrap();
        assert_eq!(enqueued, 1);

        let tasks = store.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].kind, TaskKind::Ingest);
        let payload = tasks[0].ingest_payload().unwrap();
        assert_eq!(payload.user_id, enabled);
        assert_eq!(payload.page_index, 0);
    }

    #[tokio::test]
    async fn manual_runs_ignore_the_scheduler_flag() {
        let disabled = Uuid::now_v7();
        let store = MemoryStore::new();
        store.add_user(disabled, false);

        let run_id = tasks::enqueue_ingest_run(&store, disabled, RunKind::Manual)
            .await
            .unwrap();
        let run = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Enqueued);
        assert_eq!(store.tasks().len(), 1);
    }

    #[tokio::test]
    async fn purge_fan_out_covers_every_user() {
        let store = MemoryStore::new();
        store.add_user(Uuid::now_v7(), true);
        store.add_user(Uuid::now_v7(), false);

        let enqueued = fan_out_purge_runs(&store).await.unwrap();
        assert_eq!(enqueued, 2);
        assert!(store.tasks().iter().all(|t| t.kind == TaskKind::Purge));
    }

    #[tokio::test]
    async fn dispatch_failure_marks_run_enqueue_failed() {
        let user = Uuid::now_v7();
        let store = MemoryStore::new();
        store.add_user(user, true);
        store.fail_next_task_enqueue();

        let error = tasks::enqueue_ingest_run(&store, user, RunKind::Scheduled)
            .await
            .unwrap_err();
        assert!(error.to_string().contains("dispatching ingest task"));
        assert!(store.tasks().is_empty());

        // The run record exists and is terminally marked.
        let runs = store.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::EnqueueFailed);
        assert!(runs[0].status.is_terminal());
    }
}
