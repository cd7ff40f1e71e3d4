use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{SecretBackend, StorageError};

/// In-process backend. Nothing survives the process; useful for ephemeral
/// sessions and for exercising the store's fallback paths.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    slot: Mutex<Option<Vec<u8>>>,
    unavailable: AtomicBool,
    failing_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that rejects every operation, like a locked keychain.
    pub fn unavailable() -> Self {
        let backend = Self::default();
        backend.set_available(false);
        backend
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Make writes fail while reads and erases keep working.
    pub fn fail_writes(&self, failing: bool) {
        self.failing_writes.store(failing, Ordering::SeqCst);
    }

    /// Place raw bytes in the slot, bypassing availability checks.
    pub fn inject(&self, bytes: Vec<u8>) {
        *self.slot() = Some(bytes);
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.slot().clone()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Vec<u8>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory backend disabled".to_string()));
        }
        Ok(())
    }
}

impl SecretBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn write(&self, bytes: &[u8]) -> Result<(), StorageError> {
        self.check_available()?;
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("write rejected")));
        }
        *self.slot() = Some(bytes.to_vec());
        Ok(())
    }

    fn read(&self) -> Result<Option<Vec<u8>>, StorageError> {
        self.check_available()?;
        Ok(self.slot().clone())
    }

    fn erase(&self) -> Result<(), StorageError> {
        self.check_available()?;
        *self.slot() = None;
        Ok(())
    }
}
