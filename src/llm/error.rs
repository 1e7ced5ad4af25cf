//! Completion failures

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Transport failure: connect, timeout, or a stream cut mid-response
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Network, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Unknown, message)
    }

    /// Error for a non-success HTTP response from the completion endpoint
    pub fn from_status(status: u16, detail: &str) -> Self {
        let kind = LlmErrorKind::from_status(status);
        Self::new(kind, format!("{} ({status}): {detail}", kind.describe()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    Network,
    RateLimit,
    ServerError,
    Auth,
    InvalidRequest,
    Unknown,
}

impl LlmErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::InvalidRequest,
            401 | 403 => Self::Auth,
            429 => Self::RateLimit,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Whether the same prompt might succeed if sent again later
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::ServerError)
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Network => "Network error",
            Self::RateLimit => "Rate limit exceeded",
            Self::ServerError => "Server error",
            Self::Auth => "Authentication failed",
            Self::InvalidRequest => "Invalid request",
            Self::Unknown => "Request failed",
        }
    }
}
