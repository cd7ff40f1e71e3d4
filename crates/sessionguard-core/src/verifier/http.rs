use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use tracing::debug;

use super::{RemoteVerifier, Verdict, VerifyError};

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Verifies a session by calling `GET <endpoint>` with the token as a bearer credential.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpVerifier {
    client: Client,
    endpoint: String,
}

impl HttpVerifier {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteVerifier for HttpVerifier {
    async fn verify(&self, token: &str, deadline: Duration) -> Result<Verdict, VerifyError> {
        let response = self
            .client
            .get(&self.endpoint)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json")
            .timeout(deadline)
            .send()
            .await
            .map_err(|e| transport_error(&e, deadline))?;

        let status = response.status();
        debug!(status = status.as_u16(), "Session endpoint responded");
        if status.is_success() {
            return Ok(Verdict::Valid);
        }
        let body = response.text().await.unwrap_or_default();
        verdict_from_status(status, &body)
    }
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    let total = body.chars().count();
    if total <= MAX_ERROR_BODY_LENGTH {
        body.to_string()
    } else {
        let head: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated, {} total chars)", head, total)
    }
}

/// Map a non-transport response onto a verdict or a classifiable failure.
///
/// The failure message is fixed per status class. The body is only logged:
/// gateway pages and upstream errors routinely contain words like "invalid"
/// or digits like "403", which must never turn an outage into a rejection.
pub(crate) fn verdict_from_status(status: StatusCode, body: &str) -> Result<Verdict, VerifyError> {
    let code = status.as_u16();
    let message = match code {
        200..=299 => return Ok(Verdict::Valid),
        401 | 403 => return Ok(Verdict::Invalid),
        404 => "Session endpoint not found",
        422 => "Validation failed",
        429 => "Rate limited by session endpoint",
        500..=599 => "Server error",
        _ => "Unexpected response status",
    };
    debug!(status = code, body = %truncate_body(body), "Session endpoint returned an error");
    Err(VerifyError::Other(message.to_string()))
}

fn transport_error(error: &reqwest::Error, deadline: Duration) -> VerifyError {
    if error.is_timeout() {
        return VerifyError::Timeout(deadline);
    }
    let message = error_chain(error);
    let lower = message.to_lowercase();
    if lower.contains("certificate") || lower.contains("tls") || lower.contains("handshake") {
        VerifyError::Tls(message)
    } else if error.is_connect() || error.is_request() {
        VerifyError::Connectivity(message)
    } else if error.is_decode() || error.is_body() {
        debug!(error = %message, "Session endpoint response unreadable");
        VerifyError::Other("Failed to parse response".to_string())
    } else {
        // Free text here (e.g. "invalid URL") must not read as a rejection.
        debug!(error = %message, "Session request failed");
        VerifyError::Other("Request failed".to_string())
    }
}

// reqwest's Display only names the outermost layer; the interesting cause
// (refused, dns, certificate) is further down the source chain.
fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{ErrorClassifier, ErrorKind};

    fn classify(status: u16) -> ErrorKind {
        let status = StatusCode::from_u16(status).unwrap();
        let err = verdict_from_status(status, "body").unwrap_err();
        ErrorClassifier::classify(&err)
    }

    #[test]
    fn test_success_and_rejection_statuses() {
        assert_eq!(verdict_from_status(StatusCode::OK, ""), Ok(Verdict::Valid));
        assert_eq!(verdict_from_status(StatusCode::NO_CONTENT, ""), Ok(Verdict::Valid));
        assert_eq!(verdict_from_status(StatusCode::UNAUTHORIZED, ""), Ok(Verdict::Invalid));
        assert_eq!(verdict_from_status(StatusCode::FORBIDDEN, ""), Ok(Verdict::Invalid));
    }

    #[test]
    fn test_failure_statuses_classify_as_expected() {
        assert_eq!(classify(404), ErrorKind::NotFound);
        assert_eq!(classify(422), ErrorKind::Validation);
        assert_eq!(classify(429), ErrorKind::Unknown);
        assert_eq!(classify(503), ErrorKind::Unknown);
    }

    #[test]
    fn test_outage_body_text_does_not_affect_classification() {
        let cases = [
            (503, "upstream returned invalid response"),
            (502, "<html>request id 4031-77</html>"),
            (500, "Forbidden: token expired on backend"),
            (429, "invalid credentials, slow down"),
        ];
        for (status, body) in cases {
            let status = StatusCode::from_u16(status).unwrap();
            let err = verdict_from_status(status, body).unwrap_err();
            let kind = ErrorClassifier::classify(&err);
            assert_eq!(kind, ErrorKind::Unknown, "{} with body {:?}", status, body);
            assert!(kind.is_retryable());
            assert!(!err.to_string().contains(body));
        }
    }

    #[test]
    fn test_client_error_body_text_is_ignored() {
        let status = StatusCode::from_u16(404).unwrap();
        let err = verdict_from_status(status, "invalid token").unwrap_err();
        assert_eq!(ErrorClassifier::classify(&err), ErrorKind::NotFound);
        let status = StatusCode::from_u16(400).unwrap();
        let err = verdict_from_status(status, "unauthorized").unwrap_err();
        assert_eq!(ErrorClassifier::classify(&err), ErrorKind::Unknown);
    }

    #[test]
    fn test_truncate_body_limits_length() {
        let body = "é".repeat(MAX_ERROR_BODY_LENGTH + 10);
        let truncated = truncate_body(&body);
        assert!(truncated.starts_with(&"é".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.ends_with("(truncated, 510 total chars)"));
        assert_eq!(truncate_body("short"), "short");
    }
}
