//! Runtime error types.

use antfold_comm::CommError;
use antfold_core::CoreError;
use thiserror::Error;

/// Runtime result type
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors ending a node's observation run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// Internode communication failed
    #[error(transparent)]
    Comm(#[from] CommError),

    /// The primary could not plan the run; every node stopped after startup
    #[error("Startup failed: {0}")]
    Startup(String),

    /// A node task ended abnormally
    #[error("Node {node} failed: {reason}")]
    NodeFailed {
        /// Transport rank of the node
        node: u32,
        /// Panic or cancellation message
        reason: String,
    },
}

impl From<CoreError> for RuntimeError {
    fn from(err: CoreError) -> Self {
        Self::Comm(err.into())
    }
}

impl RuntimeError {
    /// Whether the cluster can no longer be shut down cleanly
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Comm(err) => err.is_fatal(),
            Self::Startup(_) => false,
            Self::NodeFailed { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use antfold_comm::TransportError;

    #[test]
    fn test_display() {
        let err = RuntimeError::Startup("no voltage files".to_string());
        assert_eq!(err.to_string(), "Startup failed: no voltage files");

        let err: RuntimeError = CommError::Distributed.into();
        assert_eq!(err.to_string(), "An error was indicated by another node");
    }

    #[test]
    fn test_fatality() {
        assert!(!RuntimeError::Startup(String::new()).is_fatal());
        assert!(RuntimeError::from(CommError::from(TransportError::Finalized)).is_fatal());
        assert!(!RuntimeError::from(CoreError::NoNodes).is_fatal());
    }
}
