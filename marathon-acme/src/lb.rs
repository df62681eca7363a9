//! marathon-lb reload client
//!
//! marathon-lb watches the shared certificate directory but only re-reads it
//! on an external signal; this client POSTs the HUP signal endpoint on every
//! configured instance after a pass installed new certificates.

use crate::defaults;

/// Signal path marathon-lb exposes for a HAProxy reload.
pub const RELOAD_PATH: &str = "/_mlb_signal/hup";

/// Stateless client for one or more marathon-lb instances.
#[derive(Debug, Clone)]
pub struct LbClient {
    addresses: Vec<String>,
    http: reqwest::Client,
}

impl LbClient {
    pub fn new(addresses: Vec<String>) -> Self {
        let addresses = addresses
            .into_iter()
            .map(|a| a.trim_end_matches('/').to_string())
            .collect();
        let http = reqwest::Client::builder()
            .no_proxy()
            .connect_timeout(defaults::HTTP_CONNECT_TIMEOUT)
            .timeout(defaults::HTTP_REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build marathon-lb HTTP client");

        Self { addresses, http }
    }

    /// Signal every configured instance to reload. Per-instance failures are
    /// logged and do not fail the batch; returns how many instances accepted
    /// the signal.
    pub async fn notify_reload(&self) -> usize {
        let mut accepted = 0;

        for address in &self.addresses {
            let url = format!("{address}{RELOAD_PATH}");
            match self.http.post(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(url = %url, "marathon-lb accepted reload signal");
                    accepted += 1;
                }
                Ok(response) => {
                    tracing::warn!(
                        url = %url,
                        status = %response.status(),
                        "marathon-lb rejected reload signal"
                    );
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Failed to signal marathon-lb");
                }
            }
        }

        if accepted < self.addresses.len() {
            tracing::warn!(
                accepted,
                total = self.addresses.len(),
                "Reload signal did not reach every marathon-lb instance"
            );
        } else {
            tracing::info!(instances = accepted, "Signalled marathon-lb to reload");
        }

        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(addresses: Vec<String>) -> LbClient {
        crate::install_rustls_crypto_provider();
        LbClient::new(addresses)
    }

    #[tokio::test]
    async fn signals_every_instance() {
        let first = MockServer::start().await;
        let second = MockServer::start().await;
        for server in [&first, &second] {
            Mock::given(method("POST"))
                .and(path(RELOAD_PATH))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(server)
                .await;
        }

        let client = test_client(vec![first.uri(), second.uri()]);
        assert_eq!(client.notify_reload().await, 2);
    }

    #[tokio::test]
    async fn a_failing_instance_does_not_fail_the_batch() {
        let healthy = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(RELOAD_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&healthy)
            .await;

        let client = test_client(vec!["http://127.0.0.1:9".to_string(), healthy.uri()]);
        assert_eq!(client.notify_reload().await, 1);
    }

    #[tokio::test]
    async fn non_2xx_counts_as_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(RELOAD_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = test_client(vec![server.uri()]);
        assert_eq!(client.notify_reload().await, 0);
    }
}
