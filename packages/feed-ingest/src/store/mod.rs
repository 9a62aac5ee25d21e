//! Persistence seams for the pipeline.
//!
//! Everything the pipeline reads or writes goes through the `Store` trait:
//! feed/user reads (owned by the user-facing app), posting and company
//! writes, run records, and the task queue. `PgStore` is the production
//! implementation; `MemoryStore` backs tests.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::run::{RunRecord, RunStatus, RunTotals};
use crate::tasks::Task;
use crate::types::{CompanySummary, Feed, JobPosting};

/// What a create-if-absent write actually did. Distinguished purely from the
/// write outcome; the engine never reads before writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    AlreadyExists,
}

/// One page of a user's eligible feeds.
#[derive(Debug, Clone)]
pub struct FeedPage {
    pub feeds: Vec<Feed>,
    pub has_more: bool,
}

#[async_trait]
pub trait Store: Send + Sync {
    // ---- collaborator-owned reads ----

    /// Users whose scheduled runs are enabled.
    async fn scheduling_enabled_users(&self) -> Result<Vec<Uuid>>;

    /// All users, for cleanup fan-out.
    async fn all_users(&self) -> Result<Vec<Uuid>>;

    /// One page of a user's active feeds with a non-empty URL, in stable
    /// order.
    async fn feed_page(&self, user_id: Uuid, page_index: u32, page_size: u32)
        -> Result<FeedPage>;

    // ---- postings and companies ----

    /// Atomic create-if-absent keyed by `(user_id, fingerprint)`. Existing
    /// rows are left untouched and reported as `AlreadyExists`.
    async fn create_posting_if_absent(&self, posting: &JobPosting) -> Result<WriteOutcome>;

    async fn upsert_company(&self, company: &CompanySummary) -> Result<()>;

    /// Delete up to `limit` of the user's oldest postings whose freshness
    /// timestamp is before `cutoff`. Returns the number deleted.
    async fn delete_postings_before(
        &self,
        user_id: Uuid,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<u64>;

    // ---- run records ----

    async fn insert_run(&self, run: &RunRecord) -> Result<()>;

    /// Transition to `running` (idempotent for continuation pages) and add
    /// this page's feed count.
    async fn mark_run_running(&self, run_id: Uuid, feeds_in_page: i64) -> Result<()>;

    /// Apply one invocation's counter deltas and append its error samples,
    /// keeping the stored sample list capped.
    async fn apply_run_totals(&self, run_id: Uuid, totals: &RunTotals) -> Result<()>;

    /// Terminal transition: `done` when the run saw no errors, otherwise
    /// `done_with_errors`. Stamps finish time and duration.
    async fn finish_run(&self, run_id: Uuid) -> Result<RunStatus>;

    async fn mark_run_failed(&self, run_id: Uuid, error: &str) -> Result<()>;

    async fn mark_run_enqueue_failed(&self, run_id: Uuid, error: &str) -> Result<()>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<RunRecord>>;

    // ---- task queue ----

    async fn enqueue_task(&self, task: &Task) -> Result<()>;

    /// Claim up to `limit` ready tasks for this worker, including tasks
    /// whose lease expired mid-run.
    async fn claim_tasks(&self, worker_id: &str, limit: i64) -> Result<Vec<Task>>;

    async fn mark_task_succeeded(&self, task_id: Uuid) -> Result<()>;

    /// Record a failure; re-queues with backoff while attempts remain,
    /// otherwise parks the task as `failed`.
    async fn mark_task_failed(&self, task_id: Uuid, error: &str) -> Result<()>;
}
