//! Long-running task worker.
//!
//! Claims ready tasks from the queue, executes them under a global
//! concurrency limit, and records success/failure (failures re-queue with
//! backoff until attempts run out). Each claim batch is processed to
//! completion before the next poll, and shutdown is cooperative via a
//! `CancellationToken`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::fetch::FeedFetcher;
use crate::purge;
use crate::run;
use crate::store::Store;
use crate::tasks::{Task, TaskKind};

#[derive(Debug, Clone)]
pub struct TaskWorkerConfig {
    /// Maximum tasks claimed per poll.
    pub batch_size: i64,
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Identifier recorded on claimed tasks.
    pub worker_id: String,
}

impl Default for TaskWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_secs(5),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

pub struct TaskWorker {
    store: Arc<dyn Store>,
    fetcher: Arc<FeedFetcher>,
    config: IngestConfig,
    worker_config: TaskWorkerConfig,
    limiter: Arc<Semaphore>,
}

impl TaskWorker {
    pub fn new(store: Arc<dyn Store>, fetcher: Arc<FeedFetcher>, config: IngestConfig) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));
        Self {
            store,
            fetcher,
            config,
            worker_config: TaskWorkerConfig::default(),
            limiter,
        }
    }

    pub fn with_worker_config(mut self, worker_config: TaskWorkerConfig) -> Self {
        self.worker_config = worker_config;
        self
    }

    /// Poll-claim-execute until shutdown is requested. In-flight tasks
    /// finish before the loop exits.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            worker_id = %self.worker_config.worker_id,
            batch_size = self.worker_config.batch_size,
            max_concurrent = self.config.max_concurrent_tasks,
            "task worker starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let tasks = match self
                .store
                .claim_tasks(&self.worker_config.worker_id, self.worker_config.batch_size)
                .await
            {
                Ok(tasks) => tasks,
                Err(error) => {
                    tracing::error!(error = %format!("{error:#}"), "failed to claim tasks");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if tasks.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.worker_config.poll_interval) => {}
                }
                continue;
            }

            tracing::debug!(count = tasks.len(), "claimed tasks");

            let mut handles = Vec::with_capacity(tasks.len());
            for task in tasks {
                let worker = &self;
                handles.push(async move {
                    let Ok(_permit) = worker.limiter.acquire().await else {
                        return;
                    };
                    worker.process_task(task).await;
                });
            }
            futures::future::join_all(handles).await;
        }

        tracing::info!(worker_id = %self.worker_config.worker_id, "task worker stopped");
        Ok(())
    }

    async fn process_task(&self, task: Task) {
        let task_id = task.id;
        let kind = task.kind;
        match self.execute(&task).await {
            Ok(()) => {
                tracing::debug!(task_id = %task_id, kind = ?kind, "task succeeded");
                if let Err(error) = self.store.mark_task_succeeded(task_id).await {
                    tracing::error!(task_id = %task_id, error = %format!("{error:#}"), "failed to mark task succeeded");
                }
            }
            Err(error) => {
                let message = format!("{error:#}");
                tracing::warn!(
                    task_id = %task_id,
                    kind = ?kind,
                    attempt = task.attempt,
                    error = %message,
                    "task failed"
                );
                if let Err(error) = self.store.mark_task_failed(task_id, &message).await {
                    tracing::error!(task_id = %task_id, error = %format!("{error:#}"), "failed to mark task failed");
                }
            }
        }
    }

    async fn execute(&self, task: &Task) -> Result<()> {
        match task.kind {
            TaskKind::Ingest => {
                let payload = task.ingest_payload()?;
                run::execute_ingest_page(self.store.as_ref(), &self.fetcher, &self.config, &payload)
                    .await
            }
            TaskKind::Purge => {
                let payload = task.purge_payload()?;
                purge::execute_purge(self.store.as_ref(), &self.config, &payload).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{RunKind, RunStatus};
    use crate::store::MemoryStore;
    use crate::tasks::{self, TaskStatus};
    use crate::testing::{scripted_fetcher, status, ScriptedTransport};
    use crate::types::Feed;
    use chrono::Utc;
    use serde_json::json;

    fn feed(user_id: Uuid, key: &str) -> Feed {
        Feed {
            id: Uuid::now_v7(),
            user_id,
            name: None,
            url: format!("https://boards-api.greenhouse.io/v1/boards/{key}/jobs"),
            active: true,
            source: None,
            created_at: Utc::now(),
        }
    }

    fn fresh_body(job_id: u64) -> String {
        let fresh = (Utc::now() - chrono::Duration::minutes(5)).to_rfc3339();
        json!({
            "jobs": [
                { "id": job_id, "title": "Engineer", "updated_at": fresh,
                  "location": { "name": "Remote - US" } }
            ]
        })
        .to_string()
    }

    fn worker(store: Arc<MemoryStore>, fetcher: FeedFetcher, config: IngestConfig) -> TaskWorker {
        TaskWorker::new(store, Arc::new(fetcher), config)
    }

    /// Claim and execute everything currently ready, like one poll cycle.
    async fn drain(worker: &TaskWorker, store: &MemoryStore) {
        loop {
            let tasks = store.claim_tasks("test-worker", 10).await.unwrap();
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                worker.process_task(task).await;
            }
        }
    }

    #[tokio::test]
    async fn executes_enqueued_ingest_run_to_done() {
        let user_id = Uuid::now_v7();
        let store = Arc::new(MemoryStore::new());
        store.add_user(user_id, true);
        store.add_feed(feed(user_id, "acme"));

        let fetcher = scripted_fetcher(ScriptedTransport::ok_sequence(&[&fresh_body(1)]));
        let run_id = tasks::enqueue_ingest_run(store.as_ref(), user_id, RunKind::Manual)
            .await
            .unwrap();

        let worker = worker(store.clone(), fetcher, IngestConfig::default());
        drain(&worker, &store).await;

        let run = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Done);
        assert_eq!(run.feeds_count, 1);
        assert_eq!(run.processed, 1);
        assert_eq!(run.created, 1);
        assert!(run.duration_ms.is_some());
        assert_eq!(store.posting_count(user_id), 1);
        assert!(store.tasks().iter().all(|t| t.status == TaskStatus::Succeeded));
    }

    #[tokio::test]
    async fn large_feed_sets_continue_across_pages_into_one_run() {
        let user_id = Uuid::now_v7();
        let store = Arc::new(MemoryStore::new());
        store.add_user(user_id, true);
        for i in 0..3 {
            store.add_feed(feed(user_id, &format!("acme-{i}")));
        }

        // One fetch per feed; page size of 2 forces a continuation task.
        let bodies: Vec<String> = (0..3).map(|i| fresh_body(100 + i)).collect();
        let body_refs: Vec<&str> = bodies.iter().map(String::as_str).collect();
        let fetcher = scripted_fetcher(ScriptedTransport::ok_sequence(&body_refs));
        let config = IngestConfig {
            feed_page_size: 2,
            ..IngestConfig::default()
        };

        let run_id = tasks::enqueue_ingest_run(store.as_ref(), user_id, RunKind::Scheduled)
            .await
            .unwrap();
        let worker = worker(store.clone(), fetcher, config);
        drain(&worker, &store).await;

        let run = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Done);
        assert_eq!(run.feeds_count, 3);
        assert_eq!(run.processed, 3);
        assert_eq!(run.created, 3);
        // First page task plus one continuation task, both succeeded.
        assert_eq!(store.tasks().len(), 2);
    }

    #[tokio::test]
    async fn feed_failure_is_isolated_and_sampled() {
        let user_id = Uuid::now_v7();
        let store = Arc::new(MemoryStore::new());
        store.add_user(user_id, true);
        store.add_feed(feed(user_id, "good"));
        store.add_feed(feed(user_id, "bad"));

        let good = fresh_body(7);
        let transport = ScriptedTransport::new(vec![
            crate::testing::ok(&good),
            status(404, "gone"),
        ]);
        let fetcher = scripted_fetcher(transport);
        // Sequential feeds keep the scripted responses aligned with the
        // feed order above.
        let config = IngestConfig {
            max_concurrent_feeds: 1,
            ..IngestConfig::default()
        };

        let run_id = tasks::enqueue_ingest_run(store.as_ref(), user_id, RunKind::Manual)
            .await
            .unwrap();
        let worker = worker(store.clone(), fetcher, config);
        drain(&worker, &store).await;

        let run = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::DoneWithErrors);
        assert_eq!(run.errors_count, 1);
        assert_eq!(run.error_samples.len(), 1);
        assert_eq!(run.processed, 1);
    }

    #[tokio::test]
    async fn failed_task_requeues_with_attempts_left() {
        let user_id = Uuid::now_v7();
        let store = Arc::new(MemoryStore::new());
        store.add_user(user_id, true);
        store.add_feed(feed(user_id, "acme"));

        let run_id = tasks::enqueue_ingest_run(store.as_ref(), user_id, RunKind::Manual)
            .await
            .unwrap();
        // Invalidate the payload so execution fails before any feed work.
        let task_id = store.tasks()[0].id;
        let claimed = store.claim_tasks("test-worker", 10).await.unwrap();
        assert_eq!(claimed.len(), 1);

        let mut broken = claimed[0].clone();
        broken.payload = json!({ "nope": true });
        let fetcher = scripted_fetcher(ScriptedTransport::new(vec![]));
        let worker = worker(store.clone(), fetcher, IngestConfig::default());
        worker.process_task(broken).await;

        let task = store
            .tasks()
            .into_iter()
            .find(|t| t.id == task_id)
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempt, 1);
        assert!(task.error_message.is_some());

        // The run is still in flight from the queue's point of view.
        let run = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Enqueued);
    }
}
