// Main entry point for the Feedstock API server

use std::sync::Arc;

use anyhow::{Context, Result};
use feed_ingest::{scheduler, FeedFetcher, IngestConfig, PgStore, TaskWorker};
use server_core::{server::build_app, Config};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,server_core=debug,feed_ingest=debug,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Feedstock ingestion service");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    let ingest_config = IngestConfig::from_env();
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    let store = Arc::new(PgStore::new(pool.clone()));
    let fetcher = Arc::new(FeedFetcher::new(&ingest_config).context("Failed to create fetcher")?);

    // Periodic triggers (hourly ingest fan-out, daily retention purge)
    let _scheduler = scheduler::start_scheduler(store.clone())
        .await
        .context("Failed to start scheduler")?;

    // Task worker
    let shutdown = CancellationToken::new();
    let worker = TaskWorker::new(store.clone(), fetcher, ingest_config);
    let worker_shutdown = shutdown.clone();
    let worker_handle = tokio::spawn(async move { worker.run(worker_shutdown).await });

    // HTTP entry points
    let app = build_app(pool, store);
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    // Drain the worker if the server loop ever returns.
    shutdown.cancel();
    worker_handle.await.context("Worker task panicked")??;

    Ok(())
}
