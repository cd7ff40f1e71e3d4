use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::verifier::VerifyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    Tls,
    Auth,
    NotFound,
    Validation,
    Storage,
    Parsing,
    Unknown,
}

impl ErrorKind {
    /// Auth and validation failures will not change on retry.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Auth | Self::Validation)
    }

    /// Total number of verifier calls allowed for a failure of this kind.
    pub fn max_retries(self) -> u32 {
        match self {
            Self::Network => 3,
            Self::NotFound | Self::Storage => 2,
            _ => 1,
        }
    }

    pub fn base_delay(self) -> Duration {
        match self {
            Self::Network => Duration::from_millis(2000),
            Self::NotFound => Duration::from_millis(1000),
            Self::Storage => Duration::from_millis(3000),
            _ => Duration::from_millis(1500),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Tls => "tls",
            Self::Auth => "auth",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Storage => "storage",
            Self::Parsing => "parsing",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

// Checked in order; the first group with a matching keyword wins.
const AUTH_KEYWORDS: &[&str] = &[
    "unauthorized",
    "unauthenticated",
    "authentication",
    "forbidden",
    "token expired",
    "token revoked",
    "invalid credentials",
    "401",
    "403",
];
const NOT_FOUND_KEYWORDS: &[&str] = &["not found", "no such", "404"];
const VALIDATION_KEYWORDS: &[&str] = &["validation", "invalid", "malformed", "422"];
const STORAGE_KEYWORDS: &[&str] = &["storage", "keystore", "keychain", "disk", "database"];
const PARSING_KEYWORDS: &[&str] = &["parse", "json", "deserializ", "decode", "unexpected eof"];

/// Maps verifier failures onto an [`ErrorKind`]. Total: every input gets a kind.
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify(error: &VerifyError) -> ErrorKind {
        match error {
            VerifyError::Connectivity(_) => ErrorKind::Network,
            VerifyError::Timeout(_) => ErrorKind::Timeout,
            VerifyError::Tls(_) => ErrorKind::Tls,
            VerifyError::Permission(_) => ErrorKind::Auth,
            VerifyError::Other(message) => Self::classify_message(message),
        }
    }

    pub fn classify_message(message: &str) -> ErrorKind {
        let normalized = message.trim().to_lowercase();
        let groups = [
            (AUTH_KEYWORDS, ErrorKind::Auth),
            (NOT_FOUND_KEYWORDS, ErrorKind::NotFound),
            (VALIDATION_KEYWORDS, ErrorKind::Validation),
            (STORAGE_KEYWORDS, ErrorKind::Storage),
            (PARSING_KEYWORDS, ErrorKind::Parsing),
        ];
        groups
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| normalized.contains(k)))
            .map(|(_, kind)| *kind)
            .unwrap_or(ErrorKind::Unknown)
    }
}
