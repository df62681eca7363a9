//! Pending HTTP-01 challenge tokens
//!
//! The ACME client publishes `(token, key authorization)` pairs here for the
//! duration of a single order; the embedded HTTP listener serves them under
//! `/.well-known/acme-challenge/<token>`.

use std::sync::Arc;

use dashmap::DashMap;

/// URL path prefix the CA fetches challenge responses from.
pub const CHALLENGE_PATH_PREFIX: &str = "/.well-known/acme-challenge/";

/// Shared token -> key-authorization map.
///
/// Clones share the same underlying map, so the ACME client and the HTTP
/// listener can hold independent handles. Publishing returns only after the
/// entry is visible to readers, which orders it before the CA is told to
/// validate.
#[derive(Debug, Clone, Default)]
pub struct ChallengeMap {
    tokens: Arc<DashMap<String, String>>,
}

impl ChallengeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, token: &str, key_authorization: &str) {
        tracing::debug!(token = %token, "Publishing HTTP-01 challenge response");
        self.tokens
            .insert(token.to_string(), key_authorization.to_string());
    }

    pub fn withdraw(&self, token: &str) {
        if self.tokens.remove(token).is_some() {
            tracing::debug!(token = %token, "Withdrew HTTP-01 challenge response");
        }
    }

    /// Key authorization for `token`, if an order is waiting on it.
    pub fn response(&self, token: &str) -> Option<String> {
        self.tokens.get(token).map(|entry| entry.value().clone())
    }

    pub fn pending_count(&self) -> usize {
        self.tokens.len()
    }
}
