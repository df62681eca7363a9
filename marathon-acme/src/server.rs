//! Embedded HTTP listener
//!
//! Serves the two endpoints the outside world needs from this service: the
//! ACME HTTP-01 challenge responses under `/.well-known/acme-challenge/` and
//! a health check.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;

use crate::acme::{CHALLENGE_PATH_PREFIX, ChallengeMap};

pub fn router(challenges: ChallengeMap) -> Router {
    Router::new()
        .route(
            &format!("{CHALLENGE_PATH_PREFIX}{{token}}"),
            get(challenge_response),
        )
        .route("/health", get(health))
        .with_state(challenges)
}

/// Serve the listener until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    challenges: ChallengeMap,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(challenges))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn challenge_response(
    State(challenges): State<ChallengeMap>,
    Path(token): Path<String>,
) -> Response {
    match challenges.response(&token) {
        Some(key_authorization) => {
            tracing::info!(token = %token, "Served ACME challenge response");
            key_authorization.into_response()
        }
        None => {
            tracing::debug!(token = %token, "Unknown ACME challenge token");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

async fn health() -> &'static str {
    "OK"
}
