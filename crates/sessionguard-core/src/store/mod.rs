//! Durable storage for the session record.
//!
//! This module provides:
//! - `SecretBackend`: the byte-level platform storage interface
//! - `KeyringBackend`: the protected store, backed by the OS keychain
//! - `EncryptedFileBackend`: the weaker fallback, an encrypted file on disk
//! - `SecureTokenStore`: record-level store that prefers the protected
//!   backend and falls back when it is unavailable
//!
//! Nothing here returns an error to the caller. Storage trouble is logged
//! and surfaces as `false` or an absent record.

pub mod encrypted_file;
pub mod keychain;
pub mod memory;
pub mod secure_store;

use std::sync::Arc;

use thiserror::Error;

pub use encrypted_file::EncryptedFileBackend;
pub use keychain::KeyringBackend;
pub use memory::MemoryBackend;
pub use secure_store::SecureTokenStore;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),

    #[error("Encryption failure: {0}")]
    Crypto(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single-slot platform store for one opaque blob.
///
/// Every operation is idempotent. Calls may block, so async callers should
/// run them on a blocking thread.
pub trait SecretBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn write(&self, bytes: &[u8]) -> Result<(), StorageError>;

    /// `Ok(None)` when nothing is stored.
    fn read(&self) -> Result<Option<Vec<u8>>, StorageError>;

    /// Succeeds when nothing is stored.
    fn erase(&self) -> Result<(), StorageError>;
}

impl<T: SecretBackend + ?Sized> SecretBackend for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn write(&self, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).write(bytes)
    }

    fn read(&self) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).read()
    }

    fn erase(&self) -> Result<(), StorageError> {
        (**self).erase()
    }
}
