use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::models::{SessionRecord, VerificationOutcome};

/// Cached values are trusted for 30 seconds.
/// Long enough to absorb bursts of lifecycle-triggered checks, short enough
/// that a server-side revocation is noticed quickly.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub stored_at: Instant,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.stored_at)
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }

    fn age_ms(&self) -> u64 {
        u64::try_from(self.age().as_millis()).unwrap_or(u64::MAX)
    }
}

fn fresh_value<T: Clone>(entry: &Option<CacheEntry<T>>, ttl: Duration) -> Option<T> {
    entry
        .as_ref()
        .filter(|e| e.is_fresh(ttl))
        .map(|e| e.value.clone())
}

#[derive(Debug, Default)]
struct Slots {
    record: Option<CacheEntry<SessionRecord>>,
    outcome: Option<CacheEntry<VerificationOutcome>>,
    /// Bumped by every `invalidate_all`. Writers that started before an
    /// invalidation compare against it and drop their result.
    generation: u64,
}

/// Snapshot of cache state for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct CacheStats {
    pub record_cache_valid: bool,
    pub record_cache_age_ms: Option<u64>,
    pub outcome_cache_valid: bool,
    pub outcome_cache_age_ms: Option<u64>,
}

#[derive(Debug)]
pub struct SessionCache {
    ttl: Duration,
    slots: Mutex<Slots>,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(Slots::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // No critical section can leave the slots half-written, so a poisoned
    // lock still guards consistent data.
    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn generation(&self) -> u64 {
        self.slots().generation
    }

    pub fn get_record(&self) -> Option<SessionRecord> {
        fresh_value(&self.slots().record, self.ttl)
    }

    pub fn put_record(&self, record: SessionRecord) {
        self.slots().record = Some(CacheEntry::new(record));
    }

    /// Store `record` only if nothing invalidated the cache since `generation` was read.
    pub fn put_record_if_current(&self, generation: u64, record: SessionRecord) -> bool {
        let mut slots = self.slots();
        if slots.generation != generation {
            debug!(generation, current = slots.generation, "Dropping stale record cache write");
            return false;
        }
        slots.record = Some(CacheEntry::new(record));
        true
    }

    pub fn get_outcome(&self) -> Option<VerificationOutcome> {
        fresh_value(&self.slots().outcome, self.ttl)
    }

    pub fn put_outcome(&self, outcome: VerificationOutcome) {
        self.slots().outcome = Some(CacheEntry::new(outcome));
    }

    /// Store `outcome` only if nothing invalidated the cache since `generation` was read.
    pub fn put_outcome_if_current(&self, generation: u64, outcome: VerificationOutcome) -> bool {
        let mut slots = self.slots();
        if slots.generation != generation {
            debug!(generation, current = slots.generation, ?outcome, "Dropping stale outcome cache write");
            return false;
        }
        slots.outcome = Some(CacheEntry::new(outcome));
        true
    }

    /// Forget the cached outcome, keeping the record, unless the cache was
    /// invalidated since `generation` was read.
    pub fn clear_outcome_if_current(&self, generation: u64) -> bool {
        let mut slots = self.slots();
        if slots.generation != generation {
            return false;
        }
        slots.outcome = None;
        true
    }

    pub fn invalidate_all(&self) {
        let mut slots = self.slots();
        slots.record = None;
        slots.outcome = None;
        slots.generation = slots.generation.wrapping_add(1);
    }

    pub fn stats(&self) -> CacheStats {
        let slots = self.slots();
        CacheStats {
            record_cache_valid: slots.record.as_ref().is_some_and(|e| e.is_fresh(self.ttl)),
            record_cache_age_ms: slots.record.as_ref().map(CacheEntry::age_ms),
            outcome_cache_valid: slots.outcome.as_ref().is_some_and(|e| e.is_fresh(self.ttl)),
            outcome_cache_age_ms: slots.outcome.as_ref().map(CacheEntry::age_ms),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SessionRecord {
        SessionRecord::new("tok", "user-1", None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = SessionCache::default();
        let stored = record();
        cache.put_record(stored.clone());
        cache.put_outcome(VerificationOutcome::Valid);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get_record(), Some(stored));
        assert_eq!(cache.get_outcome(), Some(VerificationOutcome::Valid));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get_record(), None);
        assert_eq!(cache.get_outcome(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_restamps_entry() {
        let cache = SessionCache::default();
        cache.put_outcome(VerificationOutcome::Invalid);
        tokio::time::advance(Duration::from_secs(20)).await;
        cache.put_outcome(VerificationOutcome::Valid);
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(cache.get_outcome(), Some(VerificationOutcome::Valid));
    }

    #[test]
    fn test_clear_outcome_keeps_record() {
        let cache = SessionCache::default();
        let generation = cache.generation();
        cache.put_record(record());
        cache.put_outcome(VerificationOutcome::Valid);

        assert!(cache.clear_outcome_if_current(generation));
        assert!(cache.get_outcome().is_none());
        assert!(cache.get_record().is_some());
        assert_eq!(cache.generation(), generation);

        cache.put_outcome(VerificationOutcome::Valid);
        cache.invalidate_all();
        cache.put_outcome(VerificationOutcome::Invalid);
        assert!(!cache.clear_outcome_if_current(generation));
        assert_eq!(cache.get_outcome(), Some(VerificationOutcome::Invalid));
    }

    #[test]
    fn test_invalidate_all_clears_both_entries() {
        let cache = SessionCache::default();
        cache.put_record(record());
        cache.put_outcome(VerificationOutcome::Valid);
        cache.invalidate_all();
        assert!(cache.get_record().is_none());
        assert!(cache.get_outcome().is_none());
    }

    #[test]
    fn test_generation_guards_stale_writes() {
        let cache = SessionCache::default();
        let before = cache.generation();
        cache.invalidate_all();
        assert!(!cache.put_outcome_if_current(before, VerificationOutcome::Valid));
        assert!(!cache.put_record_if_current(before, record()));
        assert!(cache.get_outcome().is_none());
        assert!(cache.get_record().is_none());

        let current = cache.generation();
        assert!(cache.put_outcome_if_current(current, VerificationOutcome::Valid));
        assert_eq!(cache.get_outcome(), Some(VerificationOutcome::Valid));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_report_age_and_validity() {
        let cache = SessionCache::new(Duration::from_secs(10));
        assert_eq!(
            cache.stats(),
            CacheStats {
                record_cache_valid: false,
                record_cache_age_ms: None,
                outcome_cache_valid: false,
                outcome_cache_age_ms: None,
            }
        );

        cache.put_outcome(VerificationOutcome::Valid);
        tokio::time::advance(Duration::from_millis(1500)).await;
        let stats = cache.stats();
        assert!(stats.outcome_cache_valid);
        assert_eq!(stats.outcome_cache_age_ms, Some(1500));
        assert!(!stats.record_cache_valid);

        tokio::time::advance(Duration::from_secs(10)).await;
        let stats = cache.stats();
        assert!(!stats.outcome_cache_valid);
        assert_eq!(stats.outcome_cache_age_ms, Some(11_500));
    }
}
