//! Service integration tests
//!
//! Spawns the real binary against mock Marathon/ACME endpoints and verifies
//! storage bootstrap, the HTTP surface, restart idempotence and clean
//! shutdown. Issuance itself is covered by the reconciler's unit tests; here
//! the desired set is kept empty so no CA is needed.

use std::fs;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn install_rustls_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

fn pick_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

struct TestService {
    child: Option<Child>,
    base_url: String,
}

impl TestService {
    fn spawn(storage_dir: &std::path::Path, marathon_url: &str, acme_url: &str) -> Self {
        let port = pick_port();
        let child = Command::new(env!("CARGO_BIN_EXE_marathon-acme"))
            .arg(storage_dir)
            .arg("--marathon")
            .arg(marathon_url)
            .arg("--lb")
            .arg("http://127.0.0.1:9")
            .arg("--acme")
            .arg(acme_url)
            .arg("--listen")
            .arg(format!("127.0.0.1:{port}"))
            .arg("--log-level")
            .arg("debug")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn marathon-acme");

        Self {
            child: Some(child),
            base_url: format!("http://127.0.0.1:{port}"),
        }
    }

    async fn wait_healthy(&self) {
        let url = format!("{}/health", self.base_url);
        let deadline = Instant::now() + Duration::from_secs(15);
        loop {
            if let Ok(response) = reqwest::get(&url).await
                && response.status().is_success()
            {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "service did not become healthy in time"
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// SIGTERM the service and return its exit status.
    fn terminate(&mut self) -> std::process::ExitStatus {
        let mut child = self.child.take().unwrap();
        Command::new("kill")
            .arg(child.id().to_string())
            .status()
            .expect("failed to send SIGTERM");

        let deadline = Instant::now() + Duration::from_secs(20);
        loop {
            if let Some(status) = child.try_wait().unwrap() {
                return status;
            }
            assert!(Instant::now() < deadline, "service did not exit in time");
            std::thread::sleep(Duration::from_millis(100));
        }
    }
}

impl Drop for TestService {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

async fn mock_marathon() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/apps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"apps": []})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string("event: event_stream_attached\ndata: {}\n\n"),
        )
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn bootstraps_storage_serves_http_and_shuts_down_cleanly() {
    install_rustls_crypto_provider();
    let marathon = mock_marathon().await;
    // Unmatched requests (the ACME directory) get 404s; registration failure
    // is logged and the service keeps running.
    let acme = MockServer::start().await;
    let acme_url = format!("{}/directory", acme.uri());

    let storage = TempDir::new().unwrap();
    let mut service = TestService::spawn(storage.path(), &marathon.uri(), &acme_url);
    service.wait_healthy().await;

    // Storage bootstrap: fallback certificate and certs directory.
    assert!(storage.path().join("default.pem").exists());
    assert!(storage.path().join("certs").is_dir());
    let default_pem = fs::read_to_string(storage.path().join("default.pem")).unwrap();
    assert!(default_pem.contains("BEGIN CERTIFICATE"));
    assert!(default_pem.contains("BEGIN PRIVATE KEY"));

    // Unknown challenge tokens are 404s.
    let response = reqwest::get(format!(
        "{}/.well-known/acme-challenge/no-such-token",
        service.base_url
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), 404);

    // An empty desired set issues nothing.
    assert_eq!(fs::read_dir(storage.path().join("certs")).unwrap().count(), 0);

    let status = service.terminate();
    assert!(status.success(), "expected exit code 0, got {status:?}");
}

#[tokio::test]
async fn restart_with_intact_storage_is_idempotent() {
    install_rustls_crypto_provider();
    let marathon = mock_marathon().await;
    let acme = MockServer::start().await;
    let acme_url = format!("{}/directory", acme.uri());
    let storage = TempDir::new().unwrap();

    let mut first = TestService::spawn(storage.path(), &marathon.uri(), &acme_url);
    first.wait_healthy().await;
    let default_before = fs::read_to_string(storage.path().join("default.pem")).unwrap();
    assert!(first.terminate().success());

    let mut second = TestService::spawn(storage.path(), &marathon.uri(), &acme_url);
    second.wait_healthy().await;

    // The fallback certificate is written once, not regenerated.
    let default_after = fs::read_to_string(storage.path().join("default.pem")).unwrap();
    assert_eq!(default_before, default_after);
    assert_eq!(fs::read_dir(storage.path().join("certs")).unwrap().count(), 0);

    assert!(second.terminate().success());
}
