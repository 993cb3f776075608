//! Shared error types and the single error classification used by every caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::FrameError;
use crate::validation::FieldError;

/// RFC7807 Problem Details (application/problem+json)
///
/// The backend answers failed `/api/*` calls with this envelope when it can;
/// other bodies are treated as opaque text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type.
    #[serde(rename = "type", default)]
    pub type_url: Option<String>,
    /// A short, human-readable summary of the problem type.
    #[serde(default)]
    pub title: String,
    /// HTTP status code.
    #[serde(default)]
    pub status: Option<u16>,
    /// Human-readable explanation specific to this occurrence.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<String>,
}

/// Attempt to parse an RFC7807 (or RFC7807-ish) JSON body into a user-facing message.
/// Prefers `detail`, falls back to `title`, then to a bare `message` field.
pub fn try_problem_detail(body: &str) -> Option<String> {
    if let Ok(parsed) = serde_json::from_str::<ProblemDetails>(body) {
        if let Some(detail) = parsed.detail {
            if !detail.trim().is_empty() {
                return Some(detail);
            }
        }
        if !parsed.title.trim().is_empty() {
            return Some(parsed.title);
        }
    }
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .and_then(|m| m.as_str())
        .filter(|m| !m.trim().is_empty())
        .map(str::to_string)
}

/// Tagged classification of any failure a caller may need to present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Validation,
    Server,
    Decode,
    Protocol,
    Unexpected,
}

impl ErrorKind {
    /// Map an HTTP status code to its kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => ErrorKind::BadRequest,
            401 => ErrorKind::Unauthorized,
            403 => ErrorKind::Forbidden,
            404 | 410 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            422 => ErrorKind::Validation,
            500..=599 => ErrorKind::Server,
            _ => ErrorKind::Unexpected,
        }
    }

    /// Default message shown to the user for this kind.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Unable to reach the server. Check your connection.",
            ErrorKind::BadRequest => "The request was invalid.",
            ErrorKind::Unauthorized => "Your session has expired. Please log in again.",
            ErrorKind::Forbidden => "You do not have permission to perform this action.",
            ErrorKind::NotFound => "The requested record was not found.",
            ErrorKind::Conflict => "The record was changed by someone else. Refresh and retry.",
            ErrorKind::Validation => "Some fields are invalid.",
            ErrorKind::Server => "The server encountered an error. Try again later.",
            ErrorKind::Decode => "The server sent an unexpected response.",
            ErrorKind::Protocol => "The live-update connection was rejected.",
            ErrorKind::Unexpected => "Something went wrong.",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Server)
    }
}

/// API error type for client-side use
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
    #[error("Validation failed: {}", summarize_fields(.0))]
    Validation(Vec<FieldError>),
}

fn summarize_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{} {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Network(_) => ErrorKind::Network,
            ApiError::Http { status, .. } => ErrorKind::from_status(*status),
            ApiError::Deserialize(_) => ErrorKind::Decode,
            ApiError::Validation(_) => ErrorKind::Validation,
        }
    }

    /// Message suitable for a toast or inline error.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Http { body, .. } => {
                try_problem_detail(body).unwrap_or_else(|| self.kind().user_message().to_string())
            }
            ApiError::Validation(errors) => summarize_fields(errors),
            _ => self.kind().user_message().to_string(),
        }
    }
}

/// Failures of the live-update connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LiveError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection closed: {0}")]
    Closed(String),
    #[error("broker error: {0}")]
    Broker(String),
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),
    #[error("unexpected {0} frame during handshake")]
    Handshake(String),
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("no heart-beat from broker within {0:?}")]
    HeartbeatTimeout(Duration),
}

impl LiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LiveError::Transport(_)
            | LiveError::Closed(_)
            | LiveError::HandshakeTimeout(_)
            | LiveError::HeartbeatTimeout(_) => ErrorKind::Network,
            LiveError::Broker(_) | LiveError::Handshake(_) => ErrorKind::Protocol,
            LiveError::Frame(_) => ErrorKind::Decode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(ErrorKind::from_status(401), ErrorKind::Unauthorized);
        assert_eq!(ErrorKind::from_status(404), ErrorKind::NotFound);
        assert_eq!(ErrorKind::from_status(503), ErrorKind::Server);
        assert_eq!(ErrorKind::from_status(418), ErrorKind::Unexpected);
        assert!(ErrorKind::Server.is_retryable());
        assert!(!ErrorKind::Forbidden.is_retryable());
    }

    #[test]
    fn user_message_prefers_problem_detail() {
        let err = ApiError::Http {
            status: 409,
            body: r#"{"type":"about:blank","title":"Conflict","status":409,"detail":"Prescription already dispensed"}"#.into(),
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.user_message(), "Prescription already dispensed");
    }

    #[test]
    fn user_message_reads_plain_message_field() {
        let err = ApiError::Http {
            status: 400,
            body: r#"{"message":"Quantity exceeds stock"}"#.into(),
        };
        assert_eq!(err.user_message(), "Quantity exceeds stock");
    }

    #[test]
    fn user_message_falls_back_to_kind() {
        let err = ApiError::Http {
            status: 500,
            body: "<html>oops</html>".into(),
        };
        assert_eq!(err.user_message(), ErrorKind::Server.user_message());
        assert_eq!(
            ApiError::Network("refused".into()).user_message(),
            ErrorKind::Network.user_message()
        );
    }

    #[test]
    fn live_errors_are_classified() {
        assert_eq!(LiveError::Broker("denied".into()).kind(), ErrorKind::Protocol);
        assert_eq!(LiveError::Closed("eof".into()).kind(), ErrorKind::Network);
        assert_eq!(
            LiveError::from(FrameError::InvalidUtf8).kind(),
            ErrorKind::Decode
        );
    }
}
