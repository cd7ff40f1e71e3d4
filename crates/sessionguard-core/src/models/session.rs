use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The durable proof-of-login persisted on the device.
///
/// Records are never edited in place: a refresh stores a whole new record
/// and logout deletes it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct SessionRecord {
    pub token: String,
    pub user_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn new(
        token: impl Into<String>,
        user_id: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
            issued_at: Utc::now(),
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// A record without an expiry never expires locally; only the
    /// verifier can reject it.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if now > expires_at)
    }

    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.expires_at.map(|expires_at| expires_at - Utc::now())
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> Option<i64> {
        self.time_until_expiry().map(|d| d.num_minutes().max(0))
    }
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_without_expiry_never_expires() {
        let record = SessionRecord::new("tok", "user-1", None);
        assert!(!record.is_expired());
        assert!(!record.is_expired_at(Utc::now() + Duration::days(3650)));
        assert_eq!(record.minutes_until_expiry(), None);
    }

    #[test]
    fn test_record_expiry_boundary() {
        let expires_at = Utc::now() + Duration::hours(1);
        let record = SessionRecord::new("tok", "user-1", Some(expires_at));
        assert!(!record.is_expired());
        assert!(!record.is_expired_at(expires_at));
        assert!(record.is_expired_at(expires_at + Duration::seconds(1)));
    }

    #[test]
    fn test_minutes_until_expiry_clamps_at_zero() {
        let record = SessionRecord::new("tok", "user-1", Some(Utc::now() - Duration::minutes(5)));
        assert_eq!(record.minutes_until_expiry(), Some(0));
    }

    #[test]
    fn test_debug_redacts_token() {
        let record = SessionRecord::new("super-secret-token", "user-1", None);
        let rendered = format!("{:?}", record);
        assert!(!rendered.contains("super-secret-token"));
        assert!(rendered.contains("user-1"));
    }
}
