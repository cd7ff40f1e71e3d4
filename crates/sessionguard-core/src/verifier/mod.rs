//! The remote side of verification.
//!
//! The identity provider is a black box: given a token it answers valid,
//! invalid, or fails. `HttpVerifier` is a thin adapter for providers that
//! expose a bearer-authenticated session endpoint.

pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpVerifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid,
}

/// A failed verification attempt, as seen by the error classifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("Connection failed: {0}")]
    Connectivity(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("TLS failure: {0}")]
    Tls(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait RemoteVerifier: Send + Sync {
    /// Ask the provider whether `token` is still good. Implementations
    /// should give up by `deadline`; the caller enforces it regardless.
    async fn verify(&self, token: &str, deadline: Duration) -> Result<Verdict, VerifyError>;
}
