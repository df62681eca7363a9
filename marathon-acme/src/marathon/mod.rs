//! Marathon orchestrator client
//!
//! Talks to one Marathon instance out of a configured set of peers. Requests
//! go to the last known leader first; any response carrying the
//! `X-Marathon-Leader` header re-points the cached leader, and on connection
//! loss the remaining peers are probed in order.

mod apps;
pub mod events;

pub use apps::{App, AppsResponse, Container, PortDefinition, PortMapping};

use parking_lot::Mutex;
use reqwest::header::{ACCEPT, HeaderMap};
use thiserror::Error;

use crate::defaults;

/// Response header naming the current Marathon leader (`host:port`).
pub const LEADER_HEADER: &str = "X-Marathon-Leader";

#[derive(Debug, Error)]
pub enum MarathonError {
    #[error("no Marathon instance reachable after {attempts} attempt(s); last error: {last}")]
    Unavailable { attempts: usize, last: String },
}

/// HTTP client for the Marathon API.
pub struct MarathonClient {
    addresses: Vec<String>,
    /// Last address that answered, or the one the leader header named.
    leader: Mutex<Option<String>>,
    http: reqwest::Client,
    /// Separate client without a request timeout; the event stream is a
    /// deliberately long-lived response body.
    stream_http: reqwest::Client,
}

impl MarathonClient {
    pub fn new(addresses: Vec<String>) -> Self {
        let addresses: Vec<String> = addresses
            .into_iter()
            .map(|a| a.trim_end_matches('/').to_string())
            .collect();

        let http = reqwest::Client::builder()
            .no_proxy()
            .connect_timeout(defaults::HTTP_CONNECT_TIMEOUT)
            .timeout(defaults::HTTP_REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build Marathon HTTP client");
        let stream_http = reqwest::Client::builder()
            .no_proxy()
            .connect_timeout(defaults::HTTP_CONNECT_TIMEOUT)
            .build()
            .expect("Failed to build Marathon event stream client");

        Self {
            addresses,
            leader: Mutex::new(None),
            http,
            stream_http,
        }
    }

    /// Current full list of apps via a single GET against the leader.
    pub async fn snapshot(&self) -> Result<Vec<App>, MarathonError> {
        let candidates = self.candidates();
        let mut last = String::from("no addresses configured");

        for base in &candidates {
            let url = format!("{base}/v2/apps");
            match self.http.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    self.note_leader(base, response.headers());
                    match response.json::<AppsResponse>().await {
                        Ok(body) => return Ok(body.apps),
                        Err(e) => {
                            last = format!("{url}: invalid response body: {e}");
                            tracing::warn!(url = %url, error = %e, "Marathon returned an unreadable app list");
                        }
                    }
                }
                Ok(response) => {
                    last = format!("{url}: HTTP {}", response.status());
                    tracing::warn!(url = %url, status = %response.status(), "Marathon request failed");
                }
                Err(e) => {
                    last = format!("{url}: {e}");
                    tracing::debug!(url = %url, error = %e, "Marathon instance unreachable");
                }
            }
        }

        *self.leader.lock() = None;
        Err(MarathonError::Unavailable {
            attempts: candidates.len(),
            last,
        })
    }

    /// Open the long-lived `/v2/events` server-sent-event stream.
    pub(crate) async fn open_event_stream(&self) -> Result<reqwest::Response, MarathonError> {
        let candidates = self.candidates();
        let mut last = String::from("no addresses configured");

        for base in &candidates {
            let url = format!("{base}/v2/events");
            match self
                .stream_http
                .get(&url)
                .header(ACCEPT, "text/event-stream")
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    self.note_leader(base, response.headers());
                    return Ok(response);
                }
                Ok(response) => {
                    last = format!("{url}: HTTP {}", response.status());
                }
                Err(e) => {
                    last = format!("{url}: {e}");
                }
            }
        }

        *self.leader.lock() = None;
        Err(MarathonError::Unavailable {
            attempts: candidates.len(),
            last,
        })
    }

    /// Addresses in probe order: cached leader first, then the configured
    /// list.
    fn candidates(&self) -> Vec<String> {
        let mut candidates = Vec::with_capacity(self.addresses.len() + 1);
        if let Some(leader) = self.leader.lock().clone() {
            candidates.push(leader);
        }
        for address in &self.addresses {
            if !candidates.contains(address) {
                candidates.push(address.clone());
            }
        }
        candidates
    }

    fn note_leader(&self, responding: &str, headers: &HeaderMap) {
        let named = headers
            .get(LEADER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                if v.starts_with("http://") || v.starts_with("https://") {
                    v.trim_end_matches('/').to_string()
                } else {
                    format!("http://{v}")
                }
            });

        let mut leader = self.leader.lock();
        let new = named.unwrap_or_else(|| responding.to_string());
        if leader.as_deref() != Some(new.as_str()) {
            tracing::info!(leader = %new, "Marathon leader changed");
            *leader = Some(new);
        }
    }
}
