//! PostgreSQL-backed store.
//!
//! Posting dedup relies on `INSERT ... ON CONFLICT DO NOTHING` and the
//! reported row count, so no read ever precedes a write. Posting writes and
//! purge deletes retry transient connection/serialization failures a bounded
//! number of times; anything else is a permanent error for the caller.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

use super::{FeedPage, Store, WriteOutcome};
use crate::run::{RunRecord, RunStatus, RunTotals, MAX_ERROR_SAMPLES};
use crate::tasks::Task;
use crate::types::{CompanySummary, Feed, JobPosting};

const MAX_WRITE_RETRIES: u32 = 3;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_TASK_LEASE_MS: i64 = 300_000;

pub struct PgStore {
    pool: PgPool,
    task_lease_ms: i64,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            task_lease_ms: DEFAULT_TASK_LEASE_MS,
        }
    }

    pub fn with_task_lease(pool: PgPool, lease_ms: i64) -> Self {
        Self {
            pool,
            task_lease_ms: lease_ms,
        }
    }

    async fn try_create_posting(&self, posting: &JobPosting) -> Result<WriteOutcome, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_postings (
                user_id, fingerprint, company_key, company_name, job_id, title,
                location_name, state_codes, is_remote, absolute_url,
                updated_at_iso, updated_at_ts, first_published_iso,
                metadata_map, metadata_list, content_html_clean,
                first_seen_at, last_seen_at, last_ingested_at, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20
            )
            ON CONFLICT (user_id, fingerprint) DO NOTHING
            "#,
        )
        .bind(posting.user_id)
        .bind(&posting.fingerprint)
        .bind(&posting.company_key)
        .bind(&posting.company_name)
        .bind(&posting.job_id)
        .bind(&posting.title)
        .bind(&posting.location_name)
        .bind(&posting.state_codes)
        .bind(posting.is_remote)
        .bind(&posting.absolute_url)
        .bind(&posting.updated_at_iso)
        .bind(posting.updated_at_ts)
        .bind(&posting.first_published_iso)
        .bind(&posting.metadata_map)
        .bind(&posting.metadata_list)
        .bind(&posting.content_html_clean)
        .bind(posting.first_seen_at)
        .bind(posting.last_seen_at)
        .bind(posting.last_ingested_at)
        .bind(posting.created_at)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 1 {
            WriteOutcome::Created
        } else {
            WriteOutcome::AlreadyExists
        })
    }
}

/// Connection-level and contention failures worth a short retry; everything
/// else (constraint violations, bad SQL) is permanent.
fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some("40001" | "40P01" | "53300" | "57P03" | "08000" | "08006")
        ),
        _ => false,
    }
}

fn run_from_row(row: &PgRow) -> RunRecord {
    RunRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        kind: row.get("kind"),
        status: row.get("status"),
        feeds_count: row.get("feeds_count"),
        processed: row.get("processed"),
        created: row.get("created"),
        deleted: row.get("deleted"),
        errors_count: row.get("errors_count"),
        error_samples: serde_json::from_value(row.get("error_samples")).unwrap_or_default(),
        created_at: row.get("created_at"),
        enqueued_at: row.get("enqueued_at"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        duration_ms: row.get("duration_ms"),
    }
}

fn task_from_row(row: &PgRow) -> Task {
    Task {
        id: row.get("id"),
        kind: row.get("kind"),
        payload: row.get("payload"),
        status: row.get("status"),
        attempt: row.get("attempt"),
        max_attempts: row.get("max_attempts"),
        next_run_at: row.get("next_run_at"),
        lease_expires_at: row.get("lease_expires_at"),
        worker_id: row.get("worker_id"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn scheduling_enabled_users(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT id FROM users WHERE scheduler_enabled = TRUE ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list scheduling-enabled users")?;
        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    async fn all_users(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT id FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list users")?;
        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    async fn feed_page(
        &self,
        user_id: Uuid,
        page_index: u32,
        page_size: u32,
    ) -> Result<FeedPage> {
        // Fetch one extra row to learn whether another page exists.
        let mut feeds = sqlx::query_as::<_, Feed>(
            r#"
            SELECT id, user_id, name, url, active, source, created_at
            FROM feeds
            WHERE user_id = $1 AND active = TRUE AND url <> ''
            ORDER BY created_at, id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(page_size as i64 + 1)
        .bind(page_index as i64 * page_size as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load feed page")?;

        let has_more = feeds.len() > page_size as usize;
        feeds.truncate(page_size as usize);
        Ok(FeedPage { feeds, has_more })
    }

    async fn create_posting_if_absent(&self, posting: &JobPosting) -> Result<WriteOutcome> {
        let mut attempt = 0;
        loop {
            match self.try_create_posting(posting).await {
                Ok(outcome) => return Ok(outcome),
                Err(error) if is_transient(&error) && attempt < MAX_WRITE_RETRIES => {
                    attempt += 1;
                    tracing::warn!(
                        fingerprint = %posting.fingerprint,
                        attempt = attempt,
                        error = %error,
                        "transient store error, retrying posting write"
                    );
                    tokio::time::sleep(WRITE_RETRY_DELAY * attempt).await;
                }
                Err(error) => {
                    return Err(error).with_context(|| {
                        format!("Failed to create posting {}", posting.fingerprint)
                    });
                }
            }
        }
    }

    async fn upsert_company(&self, company: &CompanySummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO companies (user_id, company_key, company_name, url, last_seen_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, company_key) DO UPDATE
            SET company_name = EXCLUDED.company_name,
                url = EXCLUDED.url,
                last_seen_at = EXCLUDED.last_seen_at
            "#,
        )
        .bind(company.user_id)
        .bind(&company.company_key)
        .bind(&company.company_name)
        .bind(&company.url)
        .bind(company.last_seen_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert company {}", company.company_key))?;
        Ok(())
    }

    async fn delete_postings_before(
        &self,
        user_id: Uuid,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<u64> {
        let mut attempt = 0;
        loop {
            let result = sqlx::query(
                r#"
                DELETE FROM job_postings
                WHERE (user_id, fingerprint) IN (
                    SELECT user_id, fingerprint
                    FROM job_postings
                    WHERE user_id = $1 AND updated_at_ts < $2
                    ORDER BY updated_at_ts
                    LIMIT $3
                )
                "#,
            )
            .bind(user_id)
            .bind(cutoff)
            .bind(limit as i64)
            .execute(&self.pool)
            .await;

            match result {
                Ok(done) => return Ok(done.rows_affected()),
                Err(error) if is_transient(&error) && attempt < MAX_WRITE_RETRIES => {
                    attempt += 1;
                    tracing::warn!(
                        user_id = %user_id,
                        attempt = attempt,
                        error = %error,
                        "transient store error, retrying purge batch"
                    );
                    tokio::time::sleep(WRITE_RETRY_DELAY * attempt).await;
                }
                Err(error) => return Err(error).context("Failed to delete expired postings"),
            }
        }
    }

    async fn insert_run(&self, run: &RunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingest_runs (
                id, user_id, kind, status, feeds_count, processed, created,
                deleted, errors_count, error_samples, created_at, enqueued_at,
                started_at, finished_at, duration_ms
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(run.id)
        .bind(run.user_id)
        .bind(run.kind)
        .bind(run.status)
        .bind(run.feeds_count)
        .bind(run.processed)
        .bind(run.created)
        .bind(run.deleted)
        .bind(run.errors_count)
        .bind(serde_json::to_value(&run.error_samples).unwrap_or_else(|_| json!([])))
        .bind(run.created_at)
        .bind(run.enqueued_at)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.duration_ms)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert run {}", run.id))?;
        Ok(())
    }

    async fn mark_run_running(&self, run_id: Uuid, feeds_in_page: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingest_runs
            SET status = 'running',
                started_at = COALESCE(started_at, NOW()),
                feeds_count = feeds_count + $2
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(feeds_in_page)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to mark run {} running", run_id))?;
        Ok(())
    }

    async fn apply_run_totals(&self, run_id: Uuid, totals: &RunTotals) -> Result<()> {
        let samples = serde_json::to_value(&totals.error_samples).unwrap_or_else(|_| json!([]));
        sqlx::query(
            r#"
            UPDATE ingest_runs
            SET processed = processed + $2,
                created = created + $3,
                deleted = deleted + $4,
                errors_count = errors_count + $5,
                error_samples = (
                    SELECT COALESCE(jsonb_agg(elem), '[]'::jsonb)
                    FROM (
                        SELECT elem
                        FROM jsonb_array_elements(error_samples || $6::jsonb)
                            WITH ORDINALITY AS t(elem, ord)
                        ORDER BY ord
                        LIMIT $7
                    ) capped
                )
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(totals.processed)
        .bind(totals.created)
        .bind(totals.deleted)
        .bind(totals.errors_count)
        .bind(samples)
        .bind(MAX_ERROR_SAMPLES as i64)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to apply totals to run {}", run_id))?;
        Ok(())
    }

    async fn finish_run(&self, run_id: Uuid) -> Result<RunStatus> {
        let row = sqlx::query(
            r#"
            UPDATE ingest_runs
            SET status = CASE WHEN errors_count = 0
                    THEN 'done'::run_status
                    ELSE 'done_with_errors'::run_status
                END,
                finished_at = NOW(),
                duration_ms = CAST(
                    EXTRACT(EPOCH FROM (NOW() - COALESCE(started_at, created_at))) * 1000
                    AS BIGINT
                )
            WHERE id = $1
            RETURNING status
            "#,
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to finish run {}", run_id))?;
        Ok(row.get("status"))
    }

    async fn mark_run_failed(&self, run_id: Uuid, error: &str) -> Result<()> {
        let sample = json!([{ "feed": "run", "message": error }]);
        sqlx::query(
            r#"
            UPDATE ingest_runs
            SET status = 'failed',
                errors_count = errors_count + 1,
                error_samples = CASE WHEN jsonb_array_length(error_samples) < $3
                    THEN error_samples || $2::jsonb
                    ELSE error_samples
                END,
                finished_at = NOW(),
                duration_ms = CAST(
                    EXTRACT(EPOCH FROM (NOW() - COALESCE(started_at, created_at))) * 1000
                    AS BIGINT
                )
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(sample)
        .bind(MAX_ERROR_SAMPLES as i64)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to mark run {} failed", run_id))?;
        Ok(())
    }

    async fn mark_run_enqueue_failed(&self, run_id: Uuid, error: &str) -> Result<()> {
        let sample = json!([{ "feed": "dispatch", "message": error }]);
        sqlx::query(
            r#"
            UPDATE ingest_runs
            SET status = 'enqueue_failed',
                errors_count = errors_count + 1,
                error_samples = error_samples || $2::jsonb,
                finished_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(sample)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to mark run {} enqueue_failed", run_id))?;
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, kind, status, feeds_count, processed, created,
                   deleted, errors_count, error_samples, created_at, enqueued_at,
                   started_at, finished_at, duration_ms
            FROM ingest_runs
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to load run {}", run_id))?;
        Ok(row.as_ref().map(run_from_row))
    }

    async fn enqueue_task(&self, task: &Task) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingest_tasks (
                id, kind, payload, status, attempt, max_attempts, next_run_at,
                lease_expires_at, worker_id, error_message, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(task.id)
        .bind(task.kind)
        .bind(&task.payload)
        .bind(task.status)
        .bind(task.attempt)
        .bind(task.max_attempts)
        .bind(task.next_run_at)
        .bind(task.lease_expires_at)
        .bind(&task.worker_id)
        .bind(&task.error_message)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to enqueue task {}", task.id))?;
        Ok(())
    }

    async fn claim_tasks(&self, worker_id: &str, limit: i64) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            WITH ready AS (
                SELECT id
                FROM ingest_tasks
                WHERE (status = 'pending' AND next_run_at <= NOW())
                   OR (status = 'running' AND lease_expires_at < NOW())
                ORDER BY next_run_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE ingest_tasks t
            SET status = 'running',
                attempt = t.attempt + 1,
                worker_id = $2,
                lease_expires_at = NOW() + ($3 || ' milliseconds')::INTERVAL,
                updated_at = NOW()
            FROM ready
            WHERE t.id = ready.id
            RETURNING t.id, t.kind, t.payload, t.status, t.attempt, t.max_attempts,
                      t.next_run_at, t.lease_expires_at, t.worker_id, t.error_message,
                      t.created_at, t.updated_at
            "#,
        )
        .bind(limit)
        .bind(worker_id)
        .bind(self.task_lease_ms.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to claim tasks")?;
        Ok(rows.iter().map(task_from_row).collect())
    }

    async fn mark_task_succeeded(&self, task_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingest_tasks
            SET status = 'succeeded',
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to mark task {} succeeded", task_id))?;
        Ok(())
    }

    async fn mark_task_failed(&self, task_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingest_tasks
            SET status = CASE WHEN attempt < max_attempts
                    THEN 'pending'::task_status
                    ELSE 'failed'::task_status
                END,
                next_run_at = CASE WHEN attempt < max_attempts
                    THEN NOW() + (POWER(2, attempt) * INTERVAL '1 second')
                    ELSE next_run_at
                END,
                error_message = $2,
                lease_expires_at = NULL,
                worker_id = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to mark task {} failed", task_id))?;
        Ok(())
    }
}
