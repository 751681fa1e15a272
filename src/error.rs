//! Error types for the monitoring core
//!
//! Errors are classified by recoverability:
//! - TransientFetch: network or parse failures talking to the upstream API.
//!   Recovered locally by skipping the cycle.
//! - Validation: a malformed record or payload. The offending record is dropped.
//! - Configuration: an invalid option. Fatal at construction time.

use thiserror::Error;

/// Error type shared by every monitoring component.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MonitorError {
    #[error("Fetch failed: {0}")]
    TransientFetch(String),

    #[error("Invalid record data: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MonitorError {
    /// Returns true if the operation can succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, MonitorError::TransientFetch(_))
    }

    /// Returns true if the service cannot be constructed
    pub fn is_fatal(&self) -> bool {
        matches!(self, MonitorError::Configuration(_))
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            MonitorError::TransientFetch(_) => {
                "The monitoring server could not be reached. Updates resume on the next poll."
            }
            MonitorError::Validation(_) => "Some records were skipped. Check the upstream data.",
            MonitorError::Configuration(_) => "Check the monitoring configuration values.",
        }
    }
}

/// Errors from the upstream record API.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Network(String),
    #[error("Server returned {code}: {body}")]
    Status { code: u16, body: String },
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}

impl From<FetchError> for MonitorError {
    fn from(err: FetchError) -> Self {
        MonitorError::TransientFetch(err.to_string())
    }
}

/// Serializable error representation for the UI layer
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Transient,
    Validation,
    Configuration,
}

impl From<&MonitorError> for ErrorPayload {
    fn from(err: &MonitorError) -> Self {
        let error_type = match err {
            MonitorError::TransientFetch(_) => ErrorType::Transient,
            MonitorError::Validation(_) => ErrorType::Validation,
            MonitorError::Configuration(_) => ErrorType::Configuration,
        };

        ErrorPayload {
            message: err.to_string(),
            error_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_fetch_errors_are_retryable() {
        assert!(MonitorError::TransientFetch("timeout".into()).is_retryable());
        assert!(!MonitorError::Validation("missing id".into()).is_retryable());
        assert!(!MonitorError::Configuration("bad".into()).is_retryable());
    }

    #[test]
    fn test_fetch_error_converts_to_transient() {
        let err: MonitorError = FetchError::Status {
            code: 503,
            body: "unavailable".into(),
        }
        .into();
        assert!(matches!(err, MonitorError::TransientFetch(ref m) if m.contains("503")));
    }

    #[test]
    fn test_error_payload_shape() {
        let payload = ErrorPayload::from(&MonitorError::Configuration("pollIntervalMs".into()));
        assert_eq!(payload.error_type, ErrorType::Configuration);
        assert!(!payload.can_retry);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["errorType"], "configuration");
        assert!(json["recoverySuggestion"].is_string());
    }
}
