//! Session verification state machine.
//!
//! `SessionManager` answers "is the stored session still usable" by
//! consulting, in order, the outcome cache, the secure store and the remote
//! verifier. It owns all mutable state of the core; construct one per
//! process and share it behind an `Arc`.
//!
//! Locking:
//! - The cache has its own short lock, never held across an await.
//! - `write_lock` is held while the store is mutated together with the cache
//!   invalidation describing that mutation (`store_session`,
//!   `clear_session`, discarding an expired or rejected record).
//! - `verify_lock` is held for the duration of a network verification so
//!   overlapping cache misses share one round trip. Cache hits never take it.
//!   A `verify` caller waits for it no longer than its mode's deadline and
//!   then answers from the stored record alone; refreshes wait as long as
//!   it takes.
//!
//! The verifier call itself runs outside `write_lock`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, SessionCache};
use crate::config::{OfflinePolicy, SessionConfig};
use crate::models::{SessionRecord, VerificationOutcome, VerifyMode};
use crate::retry::{ErrorClassifier, ErrorKind, RetryPolicy};
use crate::store::SecureTokenStore;
use crate::verifier::{RemoteVerifier, Verdict, VerifyError};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Session verification cancelled")]
pub struct Cancelled;

/// Result of the remote step, before offline policy is applied.
enum RemoteResult {
    Accepted,
    Rejected,
    Exhausted(ErrorKind),
}

pub struct SessionManager {
    store: Arc<SecureTokenStore>,
    verifier: Arc<dyn RemoteVerifier>,
    cache: SessionCache,
    retry: RetryPolicy,
    offline: OfflinePolicy,
    fast_timeout: Duration,
    normal_timeout: Duration,
    write_lock: Mutex<()>,
    verify_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        config: &SessionConfig,
        store: SecureTokenStore,
        verifier: Arc<dyn RemoteVerifier>,
    ) -> Self {
        Self {
            store: Arc::new(store),
            verifier,
            cache: SessionCache::new(config.cache_ttl()),
            retry: config.retry_policy(),
            offline: config.offline_fallback.clone(),
            fast_timeout: config.timeout(VerifyMode::Fast),
            normal_timeout: config.timeout(VerifyMode::Normal),
            write_lock: Mutex::new(()),
            verify_lock: Mutex::new(()),
        }
    }

    fn timeout_for(&self, mode: VerifyMode) -> Duration {
        match mode {
            VerifyMode::Fast => self.fast_timeout,
            VerifyMode::Normal => self.normal_timeout,
        }
    }

    // ===== Verification =====

    /// Run the verification state machine. Never fails; transient trouble is
    /// absorbed into the outcome.
    pub async fn verify(&self, mode: VerifyMode) -> VerificationOutcome {
        self.verify_cancellable(mode, &CancellationToken::new())
            .await
            .unwrap_or(VerificationOutcome::Unknown)
    }

    pub async fn is_session_valid(&self, fast_mode: bool) -> bool {
        self.verify(VerifyMode::from_fast_flag(fast_mode))
            .await
            .allows_access()
    }

    /// Like [`verify`](Self::verify), abandoned as soon as `cancel` fires.
    /// A cancelled run leaves the cache untouched.
    pub async fn verify_cancellable(
        &self,
        mode: VerifyMode,
        cancel: &CancellationToken,
    ) -> Result<VerificationOutcome, Cancelled> {
        if let Some(outcome) = self.cache.get_outcome() {
            debug!(?outcome, "Outcome cache hit");
            return Ok(outcome);
        }

        let deadline = self.timeout_for(mode);
        let Ok(inflight) = tokio::time::timeout(deadline, self.lock_verify(cancel)).await else {
            return self.outcome_while_busy(mode, cancel).await;
        };
        let _inflight = inflight?;
        // Another caller may have finished a verification while we waited.
        if let Some(outcome) = self.cache.get_outcome() {
            debug!(?outcome, "Outcome cache filled by concurrent verification");
            return Ok(outcome);
        }
        debug!(?mode, "Outcome cache miss");
        self.run_verification(mode, cancel, false).await
    }

    /// Re-verify against the network, ignoring any cached outcome or record.
    pub async fn refresh_session(&self) -> bool {
        self.refresh_outcome().await.allows_access()
    }

    pub async fn refresh_outcome(&self) -> VerificationOutcome {
        self.refresh_cancellable(&CancellationToken::new())
            .await
            .unwrap_or(VerificationOutcome::Unknown)
    }

    pub async fn refresh_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> Result<VerificationOutcome, Cancelled> {
        let _inflight = self.lock_verify(cancel).await?;
        debug!("Forced session refresh");
        self.run_verification(VerifyMode::Normal, cancel, true).await
    }

    async fn lock_verify(&self, cancel: &CancellationToken) -> Result<MutexGuard<'_, ()>, Cancelled> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Cancelled),
            guard = self.verify_lock.lock() => Ok(guard),
        }
    }

    /// Answer from local state when someone else's verification outlasts
    /// this caller's deadline. Nothing is cached or deleted.
    async fn outcome_while_busy(
        &self,
        mode: VerifyMode,
        cancel: &CancellationToken,
    ) -> Result<VerificationOutcome, Cancelled> {
        if let Some(outcome) = self.cache.get_outcome() {
            return Ok(outcome);
        }
        let record = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            record = self.load_record(false) => record,
        };
        let outcome = match record {
            None => VerificationOutcome::Invalid,
            Some(record) if record.is_expired() => VerificationOutcome::Invalid,
            Some(record) if self.offline.permits(&record, Utc::now()) => {
                VerificationOutcome::OfflineValidLastKnown
            }
            Some(_) => VerificationOutcome::Unknown,
        };
        warn!(?mode, ?outcome, "Verification still in flight past deadline, answering from stored session");
        Ok(outcome)
    }

    async fn run_verification(
        &self,
        mode: VerifyMode,
        cancel: &CancellationToken,
        bypass_record_cache: bool,
    ) -> Result<VerificationOutcome, Cancelled> {
        let generation = self.cache.generation();

        let record = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            record = self.load_record(bypass_record_cache) => record,
        };

        let Some(record) = record else {
            debug!("No stored session");
            self.cache
                .put_outcome_if_current(generation, VerificationOutcome::Invalid);
            return Ok(VerificationOutcome::Invalid);
        };

        if record.is_expired() {
            info!(user_id = %record.user_id, "Stored session expired, discarding");
            self.discard_record(generation).await;
            return Ok(VerificationOutcome::Invalid);
        }

        let outcome = match self.verify_remote(&record, mode, cancel).await? {
            RemoteResult::Accepted => VerificationOutcome::Valid,
            RemoteResult::Rejected => {
                info!(user_id = %record.user_id, "Session rejected by verifier, discarding");
                self.discard_record(generation).await;
                return Ok(VerificationOutcome::Invalid);
            }
            RemoteResult::Exhausted(kind) => {
                if self.offline.permits(&record, Utc::now()) {
                    warn!(user_id = %record.user_id, %kind, "Verifier unreachable, accepting last known session offline");
                    VerificationOutcome::OfflineValidLastKnown
                } else {
                    warn!(user_id = %record.user_id, %kind, "Verifier unreachable, session state unknown");
                    VerificationOutcome::Unknown
                }
            }
        };

        if outcome.is_cacheable() {
            self.cache.put_outcome_if_current(generation, outcome);
        } else {
            // An earlier Valid must not outlive a refresh that could not confirm it.
            self.cache.clear_outcome_if_current(generation);
        }
        Ok(outcome)
    }

    /// Call the verifier under the retry policy. Each attempt is bounded by
    /// the mode's deadline; an overrun counts as a timeout failure.
    async fn verify_remote(
        &self,
        record: &SessionRecord,
        mode: VerifyMode,
        cancel: &CancellationToken,
    ) -> Result<RemoteResult, Cancelled> {
        let deadline = self.timeout_for(mode);
        let mut attempt: u32 = 1;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled),
                result = tokio::time::timeout(deadline, self.verifier.verify(&record.token, deadline)) => {
                    result.unwrap_or(Err(VerifyError::Timeout(deadline)))
                }
            };

            let error = match result {
                Ok(Verdict::Valid) => {
                    debug!(attempt, "Verifier accepted session");
                    return Ok(RemoteResult::Accepted);
                }
                Ok(Verdict::Invalid) => return Ok(RemoteResult::Rejected),
                Err(e) => e,
            };

            let kind = ErrorClassifier::classify(&error);
            if !kind.is_retryable() {
                warn!(attempt, %kind, error = %error, "Non-retryable verification failure");
                return Ok(RemoteResult::Rejected);
            }
            if !self.retry.should_retry(kind, attempt) {
                warn!(attempts = attempt, %kind, error = %error, "Verification retries exhausted");
                return Ok(RemoteResult::Exhausted(kind));
            }

            let delay = self.retry.retry_delay(attempt, kind);
            debug!(attempt, %kind, delay_ms = delay.as_millis() as u64, error = %error, "Verification failed, backing off");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    // ===== Stored session =====

    /// The stored record, served from the record cache when fresh.
    pub async fn get_stored_session(&self) -> Option<SessionRecord> {
        self.load_record(false).await
    }

    async fn load_record(&self, bypass_cache: bool) -> Option<SessionRecord> {
        if !bypass_cache {
            if let Some(record) = self.cache.get_record() {
                debug!("Record cache hit");
                return Some(record);
            }
        }

        let generation = self.cache.generation();
        let record = self.with_store(|store| store.retrieve()).await.flatten();
        if let Some(ref record) = record {
            self.cache.put_record_if_current(generation, record.clone());
        }
        record
    }

    /// Persist a freshly issued session, replacing any previous one.
    pub async fn store_session(&self, record: SessionRecord) -> bool {
        let _guard = self.write_lock.lock().await;
        let to_store = record.clone();
        let stored = self
            .with_store(move |store| store.store(&to_store))
            .await
            .unwrap_or(false);

        self.cache.invalidate_all();
        if stored {
            info!(user_id = %record.user_id, "Session stored");
            self.cache.put_record(record);
        }
        stored
    }

    /// Delete the stored session and forget everything cached. Safe to call
    /// when no session exists.
    pub async fn clear_session(&self) -> bool {
        let _guard = self.write_lock.lock().await;
        let deleted = self
            .with_store(|store| store.delete())
            .await
            .unwrap_or(false);
        self.cache.invalidate_all();
        info!(deleted, "Session cleared");
        deleted
    }

    /// Delete the record a verification found to be dead, unless the session
    /// was replaced or cleared while that verification ran.
    async fn discard_record(&self, generation: u64) {
        let _guard = self.write_lock.lock().await;
        if self.cache.generation() != generation {
            debug!("Session changed during verification, keeping stored record");
            return;
        }
        let deleted = self
            .with_store(|store| store.delete())
            .await
            .unwrap_or(false);
        if !deleted {
            warn!("Failed to delete invalid session record");
        }
        self.cache.invalidate_all();
        self.cache.put_outcome(VerificationOutcome::Invalid);
    }

    /// Run a blocking store operation off the async workers.
    async fn with_store<T, F>(&self, op: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&SecureTokenStore) -> T + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || op(&store)).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, "Session store task failed");
                None
            }
        }
    }

    // ===== Cache =====

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }
}

// ============================================================================
// Tests
// ============================================================================
