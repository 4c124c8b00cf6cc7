//! Error types for teamsyncd

use thiserror::Error;

/// Team synchronization and state registry errors
#[derive(Error, Debug)]
pub enum TeamdError {
    /// Request/response with the kernel failed or timed out
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or unparseable netlink attribute
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Allocation or linking of a record failed
    #[error("Resource error: {0}")]
    Resource(String),

    /// Programming error in a state item registration
    #[error("Configuration error: {0}")]
    Config(String),

    /// State path or port does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// State item has no setter
    #[error("Item is read-only: {0}")]
    ReadOnly(String),

    /// Value could not be parsed or was rejected
    #[error("Validation error: {0}")]
    Validation(String),

    /// Value kind does not match the item kind
    #[error("Type error: {0}")]
    Type(String),

    /// A change handler failed
    #[error("Change handler error: {0}")]
    Handler(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TeamdError {
    /// Whether the failed operation may succeed if simply retried later
    pub fn is_retryable(&self) -> bool {
        matches!(self, TeamdError::Transport(_) | TeamdError::Resource(_))
    }
}

/// Result type for teamsyncd operations
pub type Result<T> = std::result::Result<T, TeamdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TeamdError::Transport("request timed out".to_string());
        assert_eq!(err.to_string(), "Transport error: request timed out");
    }

    #[test]
    fn test_error_not_found() {
        let err = TeamdError::NotFound("ports/5/speed".to_string());
        assert_eq!(err.to_string(), "Not found: ports/5/speed");
    }

    #[test]
    fn test_error_retryable() {
        assert!(TeamdError::Transport("x".to_string()).is_retryable());
        assert!(TeamdError::Resource("x".to_string()).is_retryable());
        assert!(!TeamdError::Protocol("x".to_string()).is_retryable());
        assert!(!TeamdError::Validation("x".to_string()).is_retryable());
    }
}
