// Feedstock - API server
//
// Thin shell around the feed-ingest pipeline: env configuration, database
// pool and migrations, the HTTP trigger endpoints, and startup of the cron
// scheduler and task worker. All substantive work happens in feed-ingest.

pub mod config;
pub mod server;

pub use config::Config;
