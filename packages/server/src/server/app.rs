//! Application setup and router.

use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use feed_ingest::PgStore;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::server::routes::{health_handler, purge_now_handler, run_now_handler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub store: Arc<PgStore>,
}

/// Build the Axum application router
pub fn build_app(pool: PgPool, store: Arc<PgStore>) -> Router {
    let state = AppState {
        db_pool: pool,
        store,
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/runs", post(run_now_handler))
        .route("/purge", post(purge_now_handler))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}
