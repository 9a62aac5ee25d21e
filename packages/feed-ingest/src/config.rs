//! Pipeline tunables, with environment overrides for deployment.

use std::env;
use std::time::Duration;

use crate::sanitize::{DEFAULT_MAX_CONTENT_CHARS, DEFAULT_TRACKER_DOMAINS};

/// Knobs for one ingestion deployment. `Default` gives the production
/// values; `from_env` applies `INGEST_*` overrides on top.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Trailing window a posting's source timestamp must fall within.
    pub update_window: chrono::Duration,
    /// Age at which stored postings are purged.
    pub retention_window: chrono::Duration,
    /// Feeds per fan-out page; larger sets continue in follow-up tasks.
    pub feed_page_size: u32,
    /// Rows deleted per purge batch.
    pub purge_page_size: u32,
    /// Concurrent feeds per run.
    pub max_concurrent_feeds: usize,
    /// Concurrent job writes per feed.
    pub max_concurrent_writes: usize,
    /// Concurrent task executions per worker process.
    pub max_concurrent_tasks: usize,
    /// Per-attempt HTTP timeout.
    pub fetch_timeout: Duration,
    /// Retries after the first fetch attempt.
    pub fetch_retries: u32,
    /// Base delay for exponential fetch backoff.
    pub fetch_backoff_base: Duration,
    pub max_content_chars: usize,
    pub tracker_domains: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            update_window: chrono::Duration::hours(1),
            retention_window: chrono::Duration::days(21),
            feed_page_size: 25,
            purge_page_size: 200,
            max_concurrent_feeds: 4,
            max_concurrent_writes: 16,
            max_concurrent_tasks: 16,
            fetch_timeout: Duration::from_secs(30),
            fetch_retries: 2,
            fetch_backoff_base: Duration::from_millis(500),
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            tracker_domains: DEFAULT_TRACKER_DOMAINS
                .iter()
                .map(|d| d.to_string())
                .collect(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

impl IngestConfig {
    /// Defaults with `INGEST_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(minutes) = env_parse::<i64>("INGEST_UPDATE_WINDOW_MINUTES") {
            config.update_window = chrono::Duration::minutes(minutes);
        }
        if let Some(days) = env_parse::<i64>("INGEST_RETENTION_DAYS") {
            config.retention_window = chrono::Duration::days(days);
        }
        if let Some(v) = env_parse("INGEST_FEED_PAGE_SIZE") {
            config.feed_page_size = v;
        }
        if let Some(v) = env_parse("INGEST_PURGE_PAGE_SIZE") {
            config.purge_page_size = v;
        }
        if let Some(v) = env_parse("INGEST_MAX_CONCURRENT_FEEDS") {
            config.max_concurrent_feeds = v;
        }
        if let Some(v) = env_parse("INGEST_MAX_CONCURRENT_WRITES") {
            config.max_concurrent_writes = v;
        }
        if let Some(v) = env_parse("INGEST_MAX_CONCURRENT_TASKS") {
            config.max_concurrent_tasks = v;
        }
        if let Some(secs) = env_parse::<u64>("INGEST_FETCH_TIMEOUT_SECS") {
            config.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = env_parse("INGEST_FETCH_RETRIES") {
            config.fetch_retries = v;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_values() {
        let config = IngestConfig::default();
        assert_eq!(config.update_window, chrono::Duration::hours(1));
        assert_eq!(config.retention_window, chrono::Duration::days(21));
        assert_eq!(config.fetch_retries, 2);
        assert_eq!(config.feed_page_size, 25);
    }
}
