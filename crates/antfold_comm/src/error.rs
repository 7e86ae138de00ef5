//! Communication error types.

use crate::transport::TransportError;
use antfold_core::CoreError;
use thiserror::Error;

/// Communication result type
pub type CommResult<T> = Result<T, CommError>;

/// Errors raised by the internode communication layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommError {
    /// Bad arguments or planning failure
    #[error("Configuration error: {0}")]
    Configuration(#[from] CoreError),

    /// The API was used in a way the protocol does not allow
    #[error("Protocol misuse: {0}")]
    ProtocolMisuse(String),

    /// The underlying transport failed; fatal to the whole run
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Some node raised the cluster-wide error flag
    #[error("An error was indicated by another node")]
    Distributed,
}

impl CommError {
    /// Shorthand for a [`CommError::ProtocolMisuse`]
    #[must_use]
    pub fn misuse(message: impl Into<String>) -> Self {
        Self::ProtocolMisuse(message.into())
    }

    /// Whether the error leaves the cluster unusable
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_core_error() {
        let err: CommError = CoreError::NoNodes.into();
        assert_eq!(
            err.to_string(),
            "Configuration error: Number of nodes must be > 0"
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_transport_errors_are_fatal() {
        let err: CommError = TransportError::Finalized.into();
        assert!(err.is_fatal());
        assert!(!CommError::misuse("wrong role").is_fatal());
    }
}
