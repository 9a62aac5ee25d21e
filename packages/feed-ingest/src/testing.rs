//! Test doubles shared across the crate's tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::fetch::{FeedFetcher, FetchError, FetchTransport, TransportResponse};

/// A transport that replays a scripted sequence of responses and counts
/// calls. Panics if the script runs dry; tests should provision exactly the
/// attempts they expect.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<TransportResponse, FetchError>>>,
    calls: Mutex<u32>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<TransportResponse, FetchError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(0),
        })
    }

    /// Script of 200 responses with the given bodies.
    pub fn ok_sequence(bodies: &[&str]) -> Arc<Self> {
        Self::new(bodies.iter().map(|body| ok(body)).collect())
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl FetchTransport for ScriptedTransport {
    async fn get(&self, _url: &str) -> Result<TransportResponse, FetchError> {
        *self.calls.lock().unwrap() += 1;
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted transport ran out of responses")
    }
}

pub fn ok(body: &str) -> Result<TransportResponse, FetchError> {
    Ok(TransportResponse {
        status: 200,
        body: body.to_string(),
    })
}

pub fn status(code: u16, body: &str) -> Result<TransportResponse, FetchError> {
    Ok(TransportResponse {
        status: code,
        body: body.to_string(),
    })
}

/// A fetcher wired to a scripted transport with test-friendly backoff.
pub fn scripted_fetcher(transport: Arc<ScriptedTransport>) -> FeedFetcher {
    FeedFetcher::with_transport(transport, 2, Duration::from_millis(1))
}
