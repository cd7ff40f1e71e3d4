//! Error classification and retry/backoff policy for verifier failures.

pub mod classifier;
pub mod policy;

pub use classifier::{ErrorClassifier, ErrorKind};
pub use policy::{RetryPolicy, DEFAULT_MAX_JITTER};
