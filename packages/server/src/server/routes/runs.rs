//! Trigger endpoints: enqueue work and return the run id immediately.
//!
//! No synchronous processing happens here; callers inspect the run record
//! for outcome detail.

use axum::{extract::Extension, http::StatusCode, Json};
use feed_ingest::run::RunKind;
use feed_ingest::tasks;
use serde::Serialize;
use uuid::Uuid;

use crate::server::app::AppState;
use crate::server::middleware::AuthUser;

#[derive(Serialize)]
pub struct RunResponse {
    pub run_id: Uuid,
}

/// "Run now": enqueue one manual ingest run for the caller.
pub async fn run_now_handler(
    Extension(state): Extension<AppState>,
    user: AuthUser,
) -> Result<(StatusCode, Json<RunResponse>), (StatusCode, &'static str)> {
    match tasks::enqueue_ingest_run(state.store.as_ref(), user.user_id, RunKind::Manual).await {
        Ok(run_id) => Ok((StatusCode::ACCEPTED, Json(RunResponse { run_id }))),
        Err(error) => {
            tracing::error!(
                user_id = %user.user_id,
                error = %format!("{error:#}"),
                "failed to enqueue manual run"
            );
            Err((StatusCode::INTERNAL_SERVER_ERROR, "failed to enqueue run"))
        }
    }
}

/// "Purge now": enqueue one cleanup run for the caller.
pub async fn purge_now_handler(
    Extension(state): Extension<AppState>,
    user: AuthUser,
) -> Result<(StatusCode, Json<RunResponse>), (StatusCode, &'static str)> {
    match tasks::enqueue_purge_run(state.store.as_ref(), user.user_id).await {
        Ok(run_id) => Ok((StatusCode::ACCEPTED, Json(RunResponse { run_id }))),
        Err(error) => {
            tracing::error!(
                user_id = %user.user_id,
                error = %format!("{error:#}"),
                "failed to enqueue cleanup run"
            );
            Err((StatusCode::INTERNAL_SERVER_ERROR, "failed to enqueue purge"))
        }
    }
}
