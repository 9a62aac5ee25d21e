//! Run records and the per-run orchestration loop.
//!
//! A run moves `enqueued -> running -> done | done_with_errors | failed`;
//! `enqueue_failed` is a separate terminal state reached when dispatching
//! the task itself fails. Feed failures are isolated: they increment the
//! error counter and contribute one capped error sample, never aborting
//! sibling feeds. Errors outside that isolation mark the run `failed` and
//! propagate so the task layer's retry policy applies.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::fetch::FeedFetcher;
use crate::processor::{self, FeedOutcome};
use crate::store::Store;
use crate::tasks::{IngestPayload, Task};

/// Error samples stored per run are capped to bound record size; the error
/// counter keeps counting past the cap.
pub const MAX_ERROR_SAMPLES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "run_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Manual,
    Scheduled,
    Cleanup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "run_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Enqueued,
    Running,
    Done,
    DoneWithErrors,
    Failed,
    EnqueueFailed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Enqueued | Self::Running)
    }
}

/// One captured feed failure, kept small enough to embed in the run record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunErrorSample {
    pub feed: String,
    pub message: String,
}

/// Telemetry for one ingestion or cleanup run. Mutated in place until a
/// terminal status is reached, then read-only.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: RunKind,
    pub status: RunStatus,
    pub feeds_count: i64,
    pub processed: i64,
    pub created: i64,
    pub deleted: i64,
    pub errors_count: i64,
    pub error_samples: Vec<RunErrorSample>,
    pub created_at: DateTime<Utc>,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl RunRecord {
    /// A fresh record in `enqueued`, stamped with creation/enqueue times.
    pub fn enqueued(user_id: Uuid, kind: RunKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id,
            kind,
            status: RunStatus::Enqueued,
            feeds_count: 0,
            processed: 0,
            created: 0,
            deleted: 0,
            errors_count: 0,
            error_samples: Vec::new(),
            created_at: now,
            enqueued_at: Some(now),
            started_at: None,
            finished_at: None,
            duration_ms: None,
        }
    }
}

/// Counter deltas accumulated by one task invocation and applied to the run
/// record in a single write.
#[derive(Debug, Clone, Default)]
pub struct RunTotals {
    pub processed: i64,
    pub created: i64,
    pub deleted: i64,
    pub errors_count: i64,
    pub error_samples: Vec<RunErrorSample>,
}

impl RunTotals {
    pub fn absorb(&mut self, outcome: FeedOutcome) {
        self.processed += outcome.processed;
        self.created += outcome.created;
    }

    pub fn record_error(&mut self, feed: &str, message: String) {
        self.errors_count += 1;
        if self.error_samples.len() < MAX_ERROR_SAMPLES {
            self.error_samples.push(RunErrorSample {
                feed: feed.to_string(),
                message,
            });
        }
    }
}

/// Process one page of a user's feeds for an ingest run.
///
/// Loads the page, marks the run running, fans feed processing out under the
/// concurrency limit, flushes accumulated totals, and either enqueues the
/// continuation task or finishes the run.
/// Process one feed and pair its outcome back with the feed reference.
/// Extracted to an `async fn` so the borrow of `feed` is tied to the
/// returned future's lifetime (keeps the enclosing future HRTB-spawnable).
async fn process_one_feed<'a>(
    store: &dyn Store,
    fetcher: &FeedFetcher,
    config: &IngestConfig,
    feed: &'a crate::types::Feed,
    now: DateTime<Utc>,
) -> (&'a crate::types::Feed, Result<FeedOutcome>) {
    let result = processor::process_feed(store, fetcher, config, feed, now).await;
    (feed, result)
}

pub async fn execute_ingest_page(
    store: &dyn Store,
    fetcher: &FeedFetcher,
    config: &IngestConfig,
    payload: &IngestPayload,
) -> Result<()> {
    let page = match store
        .feed_page(payload.user_id, payload.page_index, config.feed_page_size)
        .await
    {
        Ok(page) => page,
        Err(error) => {
            let message = format!("failed to load feeds: {error:#}");
            store.mark_run_failed(payload.run_id, &message).await.ok();
            return Err(error.context("loading feed page"));
        }
    };

    store
        .mark_run_running(payload.run_id, page.feeds.len() as i64)
        .await
        .context("marking run running")?;

    tracing::info!(
        run_id = %payload.run_id,
        user_id = %payload.user_id,
        page = payload.page_index,
        feeds = page.feeds.len(),
        "processing feed page"
    );

    let now = Utc::now();
    // Feed outcomes flow through a single fold so the running totals have
    // one owner; per-feed errors are converted to samples here.
    let totals = futures::stream::iter(0..page.feeds.len())
        .map(|index| process_one_feed(store, fetcher, config, &page.feeds[index], now))
        .buffer_unordered(config.max_concurrent_feeds.max(1))
        .fold(RunTotals::default(), |mut totals, (feed, result)| async move {
            match result {
                Ok(outcome) => totals.absorb(outcome),
                Err(error) => {
                    let message = format!("{error:#}");
                    tracing::warn!(
                        feed = feed.label(),
                        run_id = %payload.run_id,
                        error = %message,
                        "feed processing failed"
                    );
                    totals.record_error(feed.label(), message);
                }
            }
            totals
        })
        .await;

    if let Err(error) = store.apply_run_totals(payload.run_id, &totals).await {
        let message = format!("failed to record run totals: {error:#}");
        store.mark_run_failed(payload.run_id, &message).await.ok();
        return Err(error.context("recording run totals"));
    }

    if page.has_more {
        let continuation = IngestPayload {
            run_id: payload.run_id,
            user_id: payload.user_id,
            page_index: payload.page_index + 1,
        };
        if let Err(error) = store.enqueue_task(&Task::ingest(&continuation)).await {
            let message = format!("failed to enqueue continuation page: {error:#}");
            store.mark_run_failed(payload.run_id, &message).await.ok();
            return Err(error.context("enqueueing continuation page"));
        }
        tracing::info!(
            run_id = %payload.run_id,
            next_page = continuation.page_index,
            "enqueued continuation page"
        );
    } else {
        let status = store
            .finish_run(payload.run_id)
            .await
            .context("finishing run")?;
        tracing::info!(
            run_id = %payload.run_id,
            status = ?status,
            processed = totals.processed,
            created = totals.created,
            errors = totals.errors_count,
            "ingest run finished"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_run_starts_enqueued() {
        let run = RunRecord::enqueued(Uuid::now_v7(), RunKind::Manual);
        assert_eq!(run.status, RunStatus::Enqueued);
        assert!(run.enqueued_at.is_some());
        assert!(run.started_at.is_none());
        assert!(!run.status.is_terminal());
    }

    #[test]
    fn totals_cap_error_samples_but_keep_counting() {
        let mut totals = RunTotals::default();
        for i in 0..15 {
            totals.record_error("feed", format!("boom {i}"));
        }
        assert_eq!(totals.errors_count, 15);
        assert_eq!(totals.error_samples.len(), MAX_ERROR_SAMPLES);
    }

    #[test]
    fn terminal_statuses() {
        assert!(RunStatus::Done.is_terminal());
        assert!(RunStatus::DoneWithErrors.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::EnqueueFailed.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }
}
