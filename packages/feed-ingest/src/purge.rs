//! Retention purge: delete postings whose freshness timestamp has aged out.

use anyhow::{Context, Result};
use chrono::Utc;

use crate::config::IngestConfig;
use crate::run::RunTotals;
use crate::store::Store;
use crate::tasks::PurgePayload;

/// Delete the user's expired postings in bounded batches, oldest first,
/// looping until a short batch. Writes a cleanup run record with a
/// `deleted` counter through the same state machine as ingest runs.
pub async fn execute_purge(
    store: &dyn Store,
    config: &IngestConfig,
    payload: &PurgePayload,
) -> Result<()> {
    store
        .mark_run_running(payload.run_id, 0)
        .await
        .context("marking run running")?;

    let cutoff = Utc::now() - config.retention_window;
    let mut totals = RunTotals::default();

    loop {
        let deleted = match store
            .delete_postings_before(payload.user_id, cutoff, config.purge_page_size)
            .await
        {
            Ok(deleted) => deleted,
            Err(error) => {
                let message = format!("purge batch failed: {error:#}");
                store.apply_run_totals(payload.run_id, &totals).await.ok();
                store.mark_run_failed(payload.run_id, &message).await.ok();
                return Err(error.context("deleting expired postings"));
            }
        };
        totals.deleted += deleted as i64;
        if deleted < config.purge_page_size as u64 {
            break;
        }
    }

    store
        .apply_run_totals(payload.run_id, &totals)
        .await
        .context("recording purge totals")?;
    let status = store
        .finish_run(payload.run_id)
        .await
        .context("finishing cleanup run")?;

    tracing::info!(
        run_id = %payload.run_id,
        user_id = %payload.user_id,
        deleted = totals.deleted,
        status = ?status,
        "retention purge finished"
    );
    Ok(())
}
