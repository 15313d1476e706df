use std::time::Duration;

use thiserror::Error;

/// Errors from conversation store operations (used by the store ports in parley-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("write attempted in a read-only transaction")]
    ReadOnly,

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors from the messaging transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("send failed: {0}")]
    Send(String),

    #[error("credential error: {0}")]
    Credentials(String),

    #[error("transport closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn test_repository_timeout_display() {
        let err = RepositoryError::Timeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "store operation timed out after 5s");
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Send("socket reset".to_string());
        assert_eq!(err.to_string(), "send failed: socket reset");
    }
}
