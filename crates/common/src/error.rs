//! Error types for the DevTools layer

use thiserror::Error;

/// Result type alias using the DevTools [`enum@Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// DevTools error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} failed ({code}): {message}")]
    Protocol {
        method: String,
        code: i64,
        message: String,
    },

    #[error("Evaluation threw: {0}")]
    Evaluation(String),

    #[error("Session {0} is detached")]
    SessionDetached(String),

    #[error("DevTools connection closed")]
    Disconnected,

    #[error("{method} got no response within {millis}ms")]
    CommandTimeout { method: String, millis: u64 },

    #[error("Operation timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl Error {
    /// Whether the failure may clear up on retry (page navigating, frame
    /// being swapped, context not created yet).
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Protocol { message, .. } => {
                message.contains("Execution context was destroyed")
                    || message.contains("Cannot find context")
                    || message.contains("Inspected target navigated")
            }
            Error::Evaluation(message) => message.contains("Execution context was destroyed"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = Error::Protocol {
            method: "Runtime.evaluate".to_string(),
            code: -32000,
            message: "Cannot find context with specified id".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Runtime.evaluate failed (-32000): Cannot find context with specified id"
        );
        assert!(err.is_transient());
    }

    #[test]
    fn test_detached_is_not_transient() {
        assert!(!Error::SessionDetached("ABC".to_string()).is_transient());
        assert!(!Error::Disconnected.is_transient());
    }
}
