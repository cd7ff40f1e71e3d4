//! Persistent session verification and caching core.
//!
//! Decides, on launch and periodically after, whether a previously issued
//! session is still usable without needlessly hitting the network:
//!
//! - [`store`]: the session record in the OS keychain, with an encrypted
//!   file as fallback
//! - [`cache`]: TTL-bounded cache of the last record and last outcome
//! - [`retry`]: error classification and backoff with jitter
//! - [`verifier`]: the remote verifier interface and an HTTP adapter
//! - [`manager`]: the verification state machine tying it together

pub mod cache;
pub mod config;
pub mod manager;
pub mod models;
pub mod retry;
pub mod store;
pub mod verifier;

pub use cache::{CacheStats, SessionCache};
pub use config::{OfflinePolicy, SessionConfig};
pub use manager::{Cancelled, SessionManager};
pub use models::{SessionRecord, VerificationOutcome, VerifyMode};
pub use retry::{ErrorClassifier, ErrorKind, RetryPolicy};
pub use store::{SecretBackend, SecureTokenStore, StorageError};
pub use verifier::{HttpVerifier, RemoteVerifier, Verdict, VerifyError};
