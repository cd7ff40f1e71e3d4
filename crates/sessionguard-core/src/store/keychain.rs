use keyring::Entry;
use tracing::debug;

use super::{SecretBackend, StorageError};

/// Default keychain service name
pub const DEFAULT_SERVICE_NAME: &str = "sessionguard";

/// Default keychain account under which the session blob is kept
pub const DEFAULT_ACCOUNT: &str = "session";

/// Protected store backed by the OS keychain.
pub struct KeyringBackend {
    service: String,
    account: String,
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_NAME, DEFAULT_ACCOUNT)
    }
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<Entry, StorageError> {
        Entry::new(&self.service, &self.account).map_err(map_keyring_error)
    }
}

fn map_keyring_error(error: keyring::Error) -> StorageError {
    match error {
        keyring::Error::BadEncoding(_) => StorageError::Corrupt(error.to_string()),
        other => StorageError::Unavailable(other.to_string()),
    }
}

impl SecretBackend for KeyringBackend {
    fn name(&self) -> &'static str {
        "keyring"
    }

    fn write(&self, bytes: &[u8]) -> Result<(), StorageError> {
        self.entry()?.set_secret(bytes).map_err(map_keyring_error)
    }

    fn read(&self) -> Result<Option<Vec<u8>>, StorageError> {
        match self.entry()?.get_secret() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(map_keyring_error(e)),
        }
    }

    fn erase(&self) -> Result<(), StorageError> {
        match self.entry()?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => {
                debug!(service = %self.service, "No keychain entry to delete");
                Ok(())
            }
            Err(e) => Err(map_keyring_error(e)),
        }
    }
}
