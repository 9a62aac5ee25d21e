//! In-memory store backing unit tests.
//!
//! Mirrors the Postgres implementation's observable semantics: atomic
//! create-if-absent on `(user_id, fingerprint)`, capped run error samples,
//! and task retry scheduling. All state sits behind one mutex, which also
//! makes concurrent create-if-absent races in tests behave like the
//! database's conflict handling.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::{FeedPage, Store, WriteOutcome};
use crate::run::{RunErrorSample, RunRecord, RunStatus, RunTotals, MAX_ERROR_SAMPLES};
use crate::tasks::{Task, TaskStatus};
use crate::types::{CompanySummary, Feed, JobPosting};

#[derive(Default)]
struct Inner {
    users: Vec<(Uuid, bool)>,
    feeds: Vec<Feed>,
    postings: HashMap<(Uuid, String), JobPosting>,
    companies: HashMap<(Uuid, String), CompanySummary>,
    runs: HashMap<Uuid, RunRecord>,
    tasks: HashMap<Uuid, Task>,
    fail_next_task_enqueue: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, id: Uuid, scheduler_enabled: bool) {
        self.inner.lock().unwrap().users.push((id, scheduler_enabled));
    }

    pub fn add_feed(&self, feed: Feed) {
        self.inner.lock().unwrap().feeds.push(feed);
    }

    pub fn insert_posting(&self, posting: JobPosting) {
        self.inner
            .lock()
            .unwrap()
            .postings
            .insert((posting.user_id, posting.fingerprint.clone()), posting);
    }

    pub fn posting_count(&self, user_id: Uuid) -> usize {
        self.inner
            .lock()
            .unwrap()
            .postings
            .keys()
            .filter(|(uid, _)| *uid == user_id)
            .count()
    }

    pub fn posting(&self, user_id: Uuid, fingerprint: &str) -> Option<JobPosting> {
        self.inner
            .lock()
            .unwrap()
            .postings
            .get(&(user_id, fingerprint.to_string()))
            .cloned()
    }

    pub fn company(&self, user_id: Uuid, company_key: &str) -> Option<CompanySummary> {
        self.inner
            .lock()
            .unwrap()
            .companies
            .get(&(user_id, company_key.to_string()))
            .cloned()
    }

    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.inner.lock().unwrap().tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self.inner.lock().unwrap().runs.values().cloned().collect();
        runs.sort_by_key(|r| r.created_at);
        runs
    }

    /// Make the next `enqueue_task` call fail, to exercise dispatch-failure
    /// paths.
    pub fn fail_next_task_enqueue(&self) {
        self.inner.lock().unwrap().fail_next_task_enqueue = true;
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn scheduling_enabled_users(&self) -> Result<Vec<Uuid>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .iter()
            .filter(|(_, enabled)| *enabled)
            .map(|(id, _)| *id)
            .collect())
    }

    async fn all_users(&self) -> Result<Vec<Uuid>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .iter()
            .map(|(id, _)| *id)
            .collect())
    }

    async fn feed_page(
        &self,
        user_id: Uuid,
        page_index: u32,
        page_size: u32,
    ) -> Result<FeedPage> {
        let inner = self.inner.lock().unwrap();
        let eligible: Vec<Feed> = inner
            .feeds
            .iter()
            .filter(|f| f.user_id == user_id && f.active && !f.url.is_empty())
            .cloned()
            .collect();
        let start = (page_index as usize) * (page_size as usize);
        let end = (start + page_size as usize).min(eligible.len());
        let feeds = if start < eligible.len() {
            eligible[start..end].to_vec()
        } else {
            Vec::new()
        };
        Ok(FeedPage {
            feeds,
            has_more: end < eligible.len(),
        })
    }

    async fn create_posting_if_absent(&self, posting: &JobPosting) -> Result<WriteOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let key = (posting.user_id, posting.fingerprint.clone());
        if inner.postings.contains_key(&key) {
            Ok(WriteOutcome::AlreadyExists)
        } else {
            inner.postings.insert(key, posting.clone());
            Ok(WriteOutcome::Created)
        }
    }

    async fn upsert_company(&self, company: &CompanySummary) -> Result<()> {
        self.inner.lock().unwrap().companies.insert(
            (company.user_id, company.company_key.clone()),
            company.clone(),
        );
        Ok(())
    }

    async fn delete_postings_before(
        &self,
        user_id: Uuid,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut expired: Vec<(DateTime<Utc>, (Uuid, String))> = inner
            .postings
            .iter()
            .filter(|((uid, _), posting)| *uid == user_id && posting.updated_at_ts < cutoff)
            .map(|(key, posting)| (posting.updated_at_ts, key.clone()))
            .collect();
        expired.sort_by_key(|(ts, _)| *ts);
        expired.truncate(limit as usize);
        for (_, key) in &expired {
            inner.postings.remove(key);
        }
        Ok(expired.len() as u64)
    }

    async fn insert_run(&self, run: &RunRecord) -> Result<()> {
        self.inner.lock().unwrap().runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn mark_run_running(&self, run_id: Uuid, feeds_in_page: i64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| anyhow!("run {} not found", run_id))?;
        run.status = RunStatus::Running;
        run.started_at.get_or_insert_with(Utc::now);
        run.feeds_count += feeds_in_page;
        Ok(())
    }

    async fn apply_run_totals(&self, run_id: Uuid, totals: &RunTotals) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| anyhow!("run {} not found", run_id))?;
        run.processed += totals.processed;
        run.created += totals.created;
        run.deleted += totals.deleted;
        run.errors_count += totals.errors_count;
        run.error_samples.extend(totals.error_samples.iter().cloned());
        run.error_samples.truncate(MAX_ERROR_SAMPLES);
        Ok(())
    }

    async fn finish_run(&self, run_id: Uuid) -> Result<RunStatus> {
        let mut inner = self.inner.lock().unwrap();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| anyhow!("run {} not found", run_id))?;
        run.status = if run.errors_count == 0 {
            RunStatus::Done
        } else {
            RunStatus::DoneWithErrors
        };
        let finished = Utc::now();
        run.finished_at = Some(finished);
        let started = run.started_at.unwrap_or(run.created_at);
        run.duration_ms = Some((finished - started).num_milliseconds());
        Ok(run.status)
    }

    async fn mark_run_failed(&self, run_id: Uuid, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| anyhow!("run {} not found", run_id))?;
        run.status = RunStatus::Failed;
        run.errors_count += 1;
        if run.error_samples.len() < MAX_ERROR_SAMPLES {
            run.error_samples.push(RunErrorSample {
                feed: "run".to_string(),
                message: error.to_string(),
            });
        }
        run.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_run_enqueue_failed(&self, run_id: Uuid, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| anyhow!("run {} not found", run_id))?;
        run.status = RunStatus::EnqueueFailed;
        run.errors_count += 1;
        run.error_samples.push(RunErrorSample {
            feed: "dispatch".to_string(),
            message: error.to_string(),
        });
        run.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        Ok(self.inner.lock().unwrap().runs.get(&run_id).cloned())
    }

    async fn enqueue_task(&self, task: &Task) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_next_task_enqueue {
            inner.fail_next_task_enqueue = false;
            return Err(anyhow!("task queue unavailable"));
        }
        inner.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn claim_tasks(&self, worker_id: &str, limit: i64) -> Result<Vec<Task>> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let mut ready: Vec<(DateTime<Utc>, Uuid)> = inner
            .tasks
            .values()
            .filter(|t| match t.status {
                TaskStatus::Pending => t.next_run_at <= now,
                TaskStatus::Running => t.lease_expires_at.map_or(false, |lease| lease < now),
                _ => false,
            })
            .map(|t| (t.next_run_at, t.id))
            .collect();
        ready.sort_by_key(|(run_at, _)| *run_at);
        ready.truncate(limit as usize);
        let ready: Vec<Uuid> = ready.into_iter().map(|(_, id)| id).collect();

        let mut claimed = Vec::with_capacity(ready.len());
        for id in ready {
            if let Some(task) = inner.tasks.get_mut(&id) {
                task.status = TaskStatus::Running;
                task.attempt += 1;
                task.worker_id = Some(worker_id.to_string());
                task.lease_expires_at = Some(now + Duration::minutes(5));
                task.updated_at = now;
                claimed.push(task.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_task_succeeded(&self, task_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| anyhow!("task {} not found", task_id))?;
        task.status = TaskStatus::Succeeded;
        task.lease_expires_at = None;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_task_failed(&self, task_id: Uuid, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| anyhow!("task {} not found", task_id))?;
        if task.attempt < task.max_attempts {
            task.status = TaskStatus::Pending;
            task.next_run_at =
                Utc::now() + Duration::seconds(2i64.saturating_pow(task.attempt as u32));
        } else {
            task.status = TaskStatus::Failed;
        }
        task.error_message = Some(error.to_string());
        task.lease_expires_at = None;
        task.worker_id = None;
        task.updated_at = Utc::now();
        Ok(())
    }
}
