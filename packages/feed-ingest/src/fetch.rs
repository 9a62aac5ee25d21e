//! Resilient JSON fetch for feed URLs.
//!
//! One call = up to `1 + retries` HTTP attempts with exponential backoff and
//! jitter. Retry state is local to the call; the only side effect is the
//! network request itself. The HTTP attempt is behind a `FetchTransport`
//! trait so tests can script status/body sequences.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::config::IngestConfig;

const USER_AGENT: &str = "feedstock-ingest/0.1";
const RETRYABLE_STATUSES: &[u16] = &[408, 425, 429, 500, 502, 503, 504];
const BODY_SNIPPET_CHARS: usize = 300;
const JITTER_MS: u64 = 250;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("HTTP {status} from {url}: {snippet}")]
    Status {
        url: String,
        status: u16,
        snippet: String,
    },

    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("invalid JSON from {url}: {message}")]
    InvalidJson { url: String, message: String },

    #[error("giving up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: Box<FetchError>,
    },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Status { status, .. } => RETRYABLE_STATUSES.contains(status),
            Self::Network { message, .. } => is_retryable_network_message(message),
            Self::InvalidJson { .. } | Self::RetriesExhausted { .. } => false,
        }
    }
}

/// Connection-reset / timeout / DNS-shaped failures are worth retrying;
/// anything else (TLS, malformed URL) is not.
fn is_retryable_network_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    [
        "timed out",
        "timeout",
        "connection reset",
        "connection refused",
        "connection closed",
        "broken pipe",
        "dns error",
        "failed to lookup",
    ]
    .iter()
    .any(|pattern| lower.contains(pattern))
}

/// One HTTP attempt.
#[async_trait]
pub trait FetchTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<TransportResponse, FetchError>;
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Production transport over a shared reqwest client.
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl FetchTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| classify_reqwest_error(url, &e, self.timeout))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(url, &e, self.timeout))?;
        Ok(TransportResponse { status, body })
    }
}

fn classify_reqwest_error(url: &str, err: &reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
            timeout,
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

/// Feed fetcher with retry/backoff policy.
pub struct FeedFetcher {
    transport: Arc<dyn FetchTransport>,
    retries: u32,
    backoff_base: Duration,
}

impl FeedFetcher {
    pub fn new(config: &IngestConfig) -> anyhow::Result<Self> {
        Ok(Self {
            transport: Arc::new(ReqwestTransport::new(config.fetch_timeout)?),
            retries: config.fetch_retries,
            backoff_base: config.fetch_backoff_base,
        })
    }

    /// Swap the transport; used by tests.
    pub fn with_transport(
        transport: Arc<dyn FetchTransport>,
        retries: u32,
        backoff_base: Duration,
    ) -> Self {
        Self {
            transport,
            retries,
            backoff_base,
        }
    }

    /// GET a feed document and parse it as JSON.
    pub async fn fetch_json(&self, url: &str) -> Result<Value, FetchError> {
        let mut attempt = 0;
        loop {
            let error = match self.attempt(url).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if !error.is_retryable() {
                return Err(error);
            }
            if attempt >= self.retries {
                return Err(FetchError::RetriesExhausted {
                    url: url.to_string(),
                    attempts: attempt + 1,
                    last: Box::new(error),
                });
            }
            let delay = backoff_delay(self.backoff_base, attempt);
            tracing::warn!(
                url = url,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "fetch attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt(&self, url: &str) -> Result<Value, FetchError> {
        let response = self.transport.get(url).await?;
        if !(200..300).contains(&response.status) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status,
                snippet: body_snippet(&response.body),
            });
        }
        serde_json::from_str(&response.body).map_err(|e| FetchError::InvalidJson {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
        + Duration::from_millis(fastrand::u64(0..JITTER_MS))
}

fn body_snippet(body: &str) -> String {
    let cut = body
        .char_indices()
        .nth(BODY_SNIPPET_CHARS)
        .map(|(idx, _)| idx)
        .unwrap_or(body.len());
    body[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ok, status, ScriptedTransport};
    use serde_json::json;

    fn fetcher(transport: Arc<ScriptedTransport>) -> FeedFetcher {
        FeedFetcher::with_transport(transport, 2, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn succeeds_after_two_retryable_failures() {
        let transport = ScriptedTransport::new(vec![
            status(503, "unavailable"),
            status(503, "unavailable"),
            ok(r#"{"jobs":[{"id":1}]}"#),
        ]);
        let value = fetcher(transport.clone())
            .fetch_json("https://example.com/feed")
            .await
            .unwrap();
        assert_eq!(value, json!({ "jobs": [{ "id": 1 }] }));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn non_retryable_status_fails_immediately() {
        let transport = ScriptedTransport::new(vec![status(404, "board not found")]);
        let err = fetcher(transport.clone())
            .fetch_json("https://example.com/feed")
            .await
            .unwrap_err();
        match err {
            FetchError::Status { status, snippet, .. } => {
                assert_eq!(status, 404);
                assert_eq!(snippet, "board not found");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_report_last_cause() {
        let transport = ScriptedTransport::new(vec![
            status(503, "a"),
            status(502, "b"),
            status(503, "c"),
        ]);
        let err = fetcher(transport.clone())
            .fetch_json("https://example.com/feed")
            .await
            .unwrap_err();
        match err {
            FetchError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, FetchError::Status { status: 503, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn malformed_json_is_not_retried() {
        let transport = ScriptedTransport::new(vec![ok("{not json")]);
        let err = fetcher(transport.clone())
            .fetch_json("https://example.com/feed")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidJson { .. }));
        assert!(!err.is_retryable());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn timeout_errors_are_retryable() {
        let timeout_err = || {
            Err(FetchError::Timeout {
                url: "https://example.com/feed".to_string(),
                timeout: Duration::from_secs(30),
            })
        };
        assert!(timeout_err().unwrap_err().is_retryable());

        let transport = ScriptedTransport::new(vec![timeout_err(), ok("[]")]);
        let value = fetcher(transport.clone())
            .fetch_json("https://example.com/feed")
            .await
            .unwrap();
        assert_eq!(value, json!([]));
        assert_eq!(transport.calls(), 2);
    }

    #[test]
    fn network_message_classification() {
        let retryable = FetchError::Network {
            url: "u".into(),
            message: "connection reset by peer".into(),
        };
        let permanent = FetchError::Network {
            url: "u".into(),
            message: "invalid certificate".into(),
        };
        assert!(retryable.is_retryable());
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn snippet_is_capped_at_300_chars() {
        let long = "x".repeat(500);
        assert_eq!(body_snippet(&long).len(), 300);
    }
}
