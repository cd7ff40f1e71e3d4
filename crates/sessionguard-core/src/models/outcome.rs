use serde::{Deserialize, Serialize};

/// Final answer of a verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub enum VerificationOutcome {
    /// The verifier accepted the token.
    Valid,
    /// No usable session: missing, expired, or rejected.
    Invalid,
    /// The verifier was unreachable but the local record is still within
    /// its lifetime, so limited offline use is allowed.
    OfflineValidLastKnown,
    /// The verifier was unreachable and offline acceptance was not allowed.
    Unknown,
}

impl VerificationOutcome {
    /// Whether the caller may proceed as a signed-in user.
    pub fn allows_access(self) -> bool {
        matches!(self, Self::Valid | Self::OfflineValidLastKnown)
    }

    /// Degraded outcomes are not cached so the next check goes back to the network.
    pub fn is_cacheable(self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

/// How long a caller is willing to wait on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyMode {
    /// Short deadline for latency-sensitive checks (e.g. cold start).
    Fast,
    #[default]
    Normal,
}

impl VerifyMode {
    pub fn from_fast_flag(fast_mode: bool) -> Self {
        if fast_mode {
            Self::Fast
        } else {
            Self::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_access() {
        assert!(VerificationOutcome::Valid.allows_access());
        assert!(VerificationOutcome::OfflineValidLastKnown.allows_access());
        assert!(!VerificationOutcome::Invalid.allows_access());
        assert!(!VerificationOutcome::Unknown.allows_access());
    }

    #[test]
    fn test_only_definitive_outcomes_are_cacheable() {
        assert!(VerificationOutcome::Valid.is_cacheable());
        assert!(VerificationOutcome::Invalid.is_cacheable());
        assert!(!VerificationOutcome::OfflineValidLastKnown.is_cacheable());
        assert!(!VerificationOutcome::Unknown.is_cacheable());
    }

    #[test]
    fn test_outcome_serializes_snake_case() {
        let json = serde_json::to_string(&VerificationOutcome::OfflineValidLastKnown).unwrap();
        assert_eq!(json, "\"offline_valid_last_known\"");
    }
}
