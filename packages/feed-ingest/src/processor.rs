//! Per-feed processing: fetch, filter, normalize, dedup-write.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;

use crate::config::IngestConfig;
use crate::fetch::FeedFetcher;
use crate::location;
use crate::sources::{self, Source};
use crate::store::{Store, WriteOutcome};
use crate::types::{CompanySummary, Feed, JobPosting};

/// What one feed pass accomplished. `processed` counts jobs that survived
/// filtering; `created` counts rows that did not previously exist.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedOutcome {
    pub processed: i64,
    pub created: i64,
}

/// Create one posting, mapping the write outcome to a created-count delta.
/// Extracted to an `async fn` so the borrow of `posting` is tied to the
/// returned future's lifetime (keeps the enclosing future HRTB-spawnable).
async fn write_posting(store: &dyn Store, posting: &JobPosting) -> i64 {
    match store.create_posting_if_absent(posting).await {
        Ok(WriteOutcome::Created) => 1i64,
        Ok(WriteOutcome::AlreadyExists) => 0,
        Err(error) => {
            tracing::error!(
                fingerprint = %posting.fingerprint,
                error = %format!("{error:#}"),
                "posting write failed"
            );
            0
        }
    }
}

/// Run the full pipeline for one feed. Errors are returned to the caller,
/// which isolates them from sibling feeds.
pub async fn process_feed(
    store: &dyn Store,
    fetcher: &FeedFetcher,
    config: &IngestConfig,
    feed: &Feed,
    now: DateTime<Utc>,
) -> Result<FeedOutcome> {
    let source = Source::detect(&feed.url, feed.source.as_deref());
    let adapter = source
        .adapter()
        .ok_or_else(|| anyhow!("unrecognized feed source for {}", feed.url))?;

    let document = fetcher
        .fetch_json(&feed.url)
        .await
        .with_context(|| format!("fetching {}", feed.url))?;
    let raw_jobs = adapter
        .extract_jobs(&document)
        .with_context(|| format!("extracting jobs from {}", feed.url))?;

    let postings: Vec<JobPosting> = raw_jobs
        .iter()
        .filter_map(|value| adapter.normalize(value))
        .filter(|raw| adapter.within_update_window(raw, now, config.update_window))
        .filter(|raw| location::should_keep(raw.location_name.as_deref(), raw.explicit_remote))
        .filter_map(|raw| {
            adapter
                .freshness(&raw)
                .map(|freshness| sources::build_posting(feed, &raw, freshness, now, config))
        })
        .collect();

    tracing::debug!(
        feed = feed.label(),
        fetched = raw_jobs.len(),
        kept = postings.len(),
        "filtered feed jobs"
    );

    if postings.is_empty() {
        return Ok(FeedOutcome::default());
    }

    // Concurrent create-if-absent writes; a conflict is the normal dedup
    // signal, a write failure is logged without aborting the feed.
    let created = futures::stream::iter(0..postings.len())
        .map(|index| write_posting(store, &postings[index]))
        .buffer_unordered(config.max_concurrent_writes.max(1))
        .fold(0i64, |acc, n| async move { acc + n })
        .await;

    let company = CompanySummary {
        user_id: feed.user_id,
        company_key: postings[0].company_key.clone(),
        company_name: postings[0].company_name.clone(),
        url: feed.url.clone(),
        last_seen_at: now,
    };
    store
        .upsert_company(&company)
        .await
        .with_context(|| format!("updating company summary for {}", company.company_key))?;

    let outcome = FeedOutcome {
        processed: postings.len() as i64,
        created,
    };
    tracing::info!(
        feed = feed.label(),
        processed = outcome.processed,
        created = outcome.created,
        "feed processed"
    );
    Ok(outcome)
}
