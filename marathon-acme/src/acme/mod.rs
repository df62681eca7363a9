//! ACME certificate issuance
//!
//! [`AcmeClient`] drives the HTTP-01 protocol against the configured CA,
//! [`ChallengeMap`] holds the pending challenge responses the embedded HTTP
//! listener serves, and [`CertIssuer`] is the seam the reconciler issues
//! through.

mod challenge;
mod client;

pub use challenge::{CHALLENGE_PATH_PREFIX, ChallengeMap};
pub use client::{AcmeClient, CertIssuer, IssueError, IssuedCert};
