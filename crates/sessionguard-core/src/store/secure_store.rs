use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{SecretBackend, StorageError};
use crate::models::SessionRecord;

/// Envelope version written by this build. Anything else reads as absent.
const STORE_FORMAT_VERSION: u32 = 1;

/// `record: None` is a tombstone: a delete that could not reach every backend.
#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    sequence: u64,
    record: Option<&'a SessionRecord>,
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    #[serde(default)]
    sequence: u64,
    record: Option<SessionRecord>,
}

/// Holds at most one session record, in the primary backend when it is
/// usable and in the fallback otherwise.
///
/// A successful write to one backend erases the other. When that erase
/// fails the leftover copy is older, and every envelope carries a write
/// sequence, so `retrieve` always returns the most recent write. Deletes
/// that cannot reach a backend leave a newer tombstone behind instead.
pub struct SecureTokenStore {
    primary: Box<dyn SecretBackend>,
    fallback: Option<Box<dyn SecretBackend>>,
    last_sequence: AtomicU64,
}

impl SecureTokenStore {
    pub fn new(primary: impl SecretBackend + 'static) -> Self {
        Self {
            primary: Box::new(primary),
            fallback: None,
            last_sequence: AtomicU64::new(0),
        }
    }

    pub fn with_fallback(
        primary: impl SecretBackend + 'static,
        fallback: impl SecretBackend + 'static,
    ) -> Self {
        Self {
            primary: Box::new(primary),
            fallback: Some(Box::new(fallback)),
            last_sequence: AtomicU64::new(0),
        }
    }

    fn backends(&self) -> Vec<&dyn SecretBackend> {
        let mut backends: Vec<&dyn SecretBackend> = vec![self.primary.as_ref()];
        if let Some(fallback) = &self.fallback {
            backends.push(fallback.as_ref());
        }
        backends
    }

    /// Wall-clock microseconds, bumped past anything this store has written
    /// or read so consecutive writes always order correctly.
    fn next_sequence(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0);
        let previous = match self.last_sequence.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last.saturating_add(1)))
        }) {
            Ok(last) | Err(last) => last,
        };
        now.max(previous.saturating_add(1))
    }

    /// Persist `record`, replacing whatever was stored. Returns false only if
    /// no backend accepted the write.
    pub fn store(&self, record: &SessionRecord) -> bool {
        let bytes = match encode(self.next_sequence(), Some(record)) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to encode session record");
                return false;
            }
        };

        match self.primary.write(&bytes) {
            Ok(()) => {
                debug!(backend = self.primary.name(), "Session record stored");
                if let Some(fallback) = &self.fallback {
                    if let Err(e) = fallback.erase() {
                        warn!(backend = fallback.name(), error = %e, "Failed to clear fallback store, older copy left behind");
                    }
                }
                true
            }
            Err(e) => {
                warn!(backend = self.primary.name(), error = %e, "Protected store unavailable, using fallback");
                let Some(fallback) = &self.fallback else {
                    return false;
                };
                match fallback.write(&bytes) {
                    Ok(()) => {
                        debug!(backend = fallback.name(), "Session record stored in fallback");
                        if let Err(e) = self.primary.erase() {
                            warn!(backend = self.primary.name(), error = %e, "Failed to clear protected store, older copy left behind");
                        }
                        true
                    }
                    Err(e) => {
                        warn!(backend = fallback.name(), error = %e, "Fallback store write failed");
                        false
                    }
                }
            }
        }
    }

    /// The most recently written record, or `None` if nothing is stored, the
    /// newest write was a delete, or no readable backend holds a valid blob.
    pub fn retrieve(&self) -> Option<SessionRecord> {
        let mut newest: Option<Envelope> = None;
        for backend in self.backends() {
            match backend.read() {
                Ok(Some(bytes)) => match decode(&bytes) {
                    Ok(envelope) => {
                        self.last_sequence.fetch_max(envelope.sequence, Ordering::SeqCst);
                        // Ties go to the earlier backend.
                        if newest.as_ref().map_or(true, |n| envelope.sequence > n.sequence) {
                            newest = Some(envelope);
                        }
                    }
                    Err(e) => {
                        warn!(backend = backend.name(), error = %e, "Discarding unreadable session record");
                    }
                },
                Ok(None) => {}
                Err(StorageError::Corrupt(reason)) => {
                    warn!(backend = backend.name(), %reason, "Discarding corrupt session record");
                }
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "Failed to read session store");
                }
            }
        }
        newest.and_then(|envelope| envelope.record)
    }

    /// Remove the record from every backend. Idempotent.
    ///
    /// If a backend cannot be erased, a tombstone is written to one that
    /// was, masking whatever the unreachable backend still holds. Returns
    /// false when no backend could record the delete.
    pub fn delete(&self) -> bool {
        let mut erased = Vec::new();
        let mut unreachable = false;
        for backend in self.backends() {
            match backend.erase() {
                Ok(()) => erased.push(backend),
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "Failed to erase session record");
                    unreachable = true;
                }
            }
        }
        if !unreachable {
            return true;
        }

        let tombstone = match encode(self.next_sequence(), None) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to encode tombstone");
                return false;
            }
        };
        for backend in erased {
            match backend.write(&tombstone) {
                Ok(()) => {
                    debug!(backend = backend.name(), "Tombstone written for unreachable store");
                    return true;
                }
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "Failed to write tombstone");
                }
            }
        }
        false
    }
}

fn encode(sequence: u64, record: Option<&SessionRecord>) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&EnvelopeRef {
        version: STORE_FORMAT_VERSION,
        sequence,
        record,
    })
}

fn decode(bytes: &[u8]) -> Result<Envelope, StorageError> {
    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|e| StorageError::Corrupt(e.to_string()))?;
    if envelope.version != STORE_FORMAT_VERSION {
        return Err(StorageError::Corrupt(format!(
            "unsupported format version {}",
            envelope.version
        )));
    }
    Ok(envelope)
}
