//! Error types for window resolution and collection sync
//!
//! Errors are classified by recoverability:
//! - Retryable: network issues, 5xx responses (queries only, mutations are never retried)
//! - NonRetryable: configuration errors, 4xx responses, unparseable payloads

use thiserror::Error;

/// Error types for dashboard sync and widget queries
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DashError {
    // Retryable errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    // Non-retryable errors
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Forward page {0} is not supported")]
    UnsupportedPage(i32),

    #[error("Unknown record: {0}")]
    UnknownRecord(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl DashError {
    /// The error raised when a widget names neither aggregation+duration nor a range.
    pub fn missing_window() -> Self {
        DashError::ConfigurationError("aggregation+duration or range required".to_string())
    }

    /// Returns true if a read query hitting this error may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            DashError::Network(_) => true,
            DashError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            DashError::Network(_) => "Check your connection to the dashboard server and try again.",
            DashError::Http { status, .. } if *status >= 500 => {
                "The dashboard server failed. Try again shortly."
            }
            DashError::Http { .. } => "The dashboard server rejected the request.",
            DashError::ConfigurationError(_) => {
                "Give the widget an aggregation and a duration, or an explicit range."
            }
            DashError::UnsupportedPage(_) => "Only the current page and earlier pages can be shown.",
            DashError::UnknownRecord(_) => "Reload the dashboard; the record no longer exists.",
            DashError::Parse(_) => "The server returned an unexpected payload.",
            DashError::Io(_) => "Check file permissions for ~/.dashsync.",
        }
    }
}

impl From<std::io::Error> for DashError {
    fn from(err: std::io::Error) -> Self {
        DashError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DashError {
    fn from(err: serde_json::Error) -> Self {
        DashError::Parse(err.to_string())
    }
}

impl From<url::ParseError> for DashError {
    fn from(err: url::ParseError) -> Self {
        DashError::ConfigurationError(format!("invalid base URL: {}", err))
    }
}

impl From<reqwest::Error> for DashError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return DashError::Parse(err.to_string());
        }
        match err.status() {
            Some(status) => DashError::Http {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => DashError::Network(err.to_string()),
        }
    }
}

/// Serializable error representation exposed on query snapshots
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
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
    Retryable,
    NonRetryable,
}

impl From<&DashError> for ErrorPayload {
    fn from(err: &DashError) -> Self {
        let can_retry = err.is_retryable();
        ErrorPayload {
            message: err.to_string(),
            error_type: if can_retry {
                ErrorType::Retryable
            } else {
                ErrorType::NonRetryable
            },
            can_retry,
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}
