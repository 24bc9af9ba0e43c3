//! Error classification
//!
//! All raw failures from the browser and automation layers are normalized
//! into a [`ClassifiedError`] before being logged or returned, so callers
//! only ever observe one error shape.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reference code attached to the stale-cookie classification so operators
/// can tell "needs fresh cookies" apart from generic failures.
pub const STALE_SESSION_COOKIES: &str = "STALE_SESSION_COOKIES";

/// Signature Chrome reports when stored auth cookies bounce the session
/// through a redirect loop.
const TOO_MANY_REDIRECTS: &str = "ERR_TOO_MANY_REDIRECTS";

/// Machine-checkable error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Failure originating from the target site or the browser backend
    ExternalError,
    /// Failure in our own orchestration (missing UI affordance, bad config)
    InternalError,
    /// Scheduler-level failure (shutdown drain timeout)
    SchedulerError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::ExternalError => "EXTERNAL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::SchedulerError => "SCHEDULER_ERROR",
        };
        f.write_str(s)
    }
}

/// Error severity, as surfaced to operators in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// The normalized error shape crossing every component boundary
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{code}: {message}")]
pub struct ClassifiedError {
    pub code: ErrorCode,
    pub message: String,
    pub severity: Severity,
    pub details: Option<String>,
    pub reference: Option<String>,
}

impl ClassifiedError {
    /// True when this error invalidates the current browser session
    /// (retrying with the same cookies will not help).
    pub fn is_session_invalid(&self) -> bool {
        self.reference.as_deref() == Some(STALE_SESSION_COOKIES)
    }
}

/// Turns arbitrary failures into the typed taxonomy.
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify a raw failure.
    ///
    /// Rules in priority order:
    /// 1. redirect-loop signature => session-invalid, critical (the stored
    ///    auth cookies are stale, no retry of this session will help)
    /// 2. anything else => generic external error, original message preserved
    pub fn classify<E: fmt::Display>(raw: &E) -> ClassifiedError {
        let text = raw.to_string();

        if text.contains(TOO_MANY_REDIRECTS) {
            return ClassifiedError {
                code: ErrorCode::ExternalError,
                message: "Session cookies are no longer valid".to_string(),
                severity: Severity::Critical,
                details: Some(text),
                reference: Some(STALE_SESSION_COOKIES.to_string()),
            };
        }

        ClassifiedError {
            code: ErrorCode::ExternalError,
            message: text.clone(),
            severity: Severity::High,
            details: Some(text),
            reference: None,
        }
    }

    /// An internal orchestration failure (missing UI affordance, pool
    /// initialization failure). Raised immediately, never retried.
    pub fn internal(message: impl Into<String>) -> ClassifiedError {
        ClassifiedError {
            code: ErrorCode::InternalError,
            message: message.into(),
            severity: Severity::Critical,
            details: None,
            reference: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_loop_is_session_invalid_and_critical() {
        let raw = "Navigation failed: net::ERR_TOO_MANY_REDIRECTS at https://example.com/feed";
        let classified = ErrorClassifier::classify(&raw);

        assert_eq!(classified.code, ErrorCode::ExternalError);
        assert_eq!(classified.severity, Severity::Critical);
        assert!(classified.is_session_invalid());
        assert_eq!(classified.reference.as_deref(), Some(STALE_SESSION_COOKIES));
        assert!(classified.details.unwrap().contains("ERR_TOO_MANY_REDIRECTS"));
    }

    #[test]
    fn other_errors_keep_original_message() {
        let raw = "Timeout: element wait timed out after 10s";
        let classified = ErrorClassifier::classify(&raw);

        assert_eq!(classified.code, ErrorCode::ExternalError);
        assert_eq!(classified.severity, Severity::High);
        assert!(!classified.is_session_invalid());
        assert_eq!(classified.message, raw);
    }

    #[test]
    fn internal_errors_are_critical() {
        let classified = ErrorClassifier::internal("Connect button and More button missing");
        assert_eq!(classified.code, ErrorCode::InternalError);
        assert_eq!(classified.severity, Severity::Critical);
    }
}
