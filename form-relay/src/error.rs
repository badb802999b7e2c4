//! Error types for outbound delivery.

use thiserror::Error;

/// A failed delivery attempt.
///
/// Only failures land here. Application-level refusals by the remote
/// service are terminal and reported as `Outcome::Rejected` instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Connection, timeout or other transport-level failure.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Remote answered with a status worth retrying (5xx or 429).
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The outbound body could not be built.
    #[error("failed to encode request: {message}")]
    Encode { message: String },
}

impl DeliveryError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Encode { .. } => false,
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            return Self::Encode {
                message: e.to_string(),
            };
        }

        let kind = if e.is_timeout() {
            "timeout"
        } else if e.is_connect() {
            "connect"
        } else if e.is_request() {
            "request"
        } else {
            "other"
        };

        Self::Transport {
            message: format!("{kind}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DeliveryError::transport("connection refused").is_retryable());
        assert!(DeliveryError::Status { status: 500, body: String::new() }.is_retryable());
        assert!(DeliveryError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(DeliveryError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(!DeliveryError::Status { status: 404, body: String::new() }.is_retryable());
        assert!(!DeliveryError::Encode { message: "bad".into() }.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = DeliveryError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 502: bad gateway");
    }
}
