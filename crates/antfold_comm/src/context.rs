//! Communication context.
//!
//! Owns the transport for the lifetime of a process and the error flag
//! subsystem built on top of it. Role communicators hold the context through
//! an `Arc`, so the transport outlives every one of them.

use crate::communicator::Communicator;
use crate::error::{CommError, CommResult};
use crate::error_comm::ErrorCommunicator;
use crate::primary::PrimaryNodeCommunicator;
use crate::secondary::SecondaryNodeCommunicator;
use crate::transport::{ThreadSupport, Transport, TransportError};
use antfold_core::NodeId;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Progress of [`CommunicationContext::shutdown`]
#[derive(Debug, Clone, PartialEq, Eq)]
enum ShutdownState {
    Running,
    Done,
    Failed(CommError),
}

/// Per-process communication context
#[derive(Debug)]
pub struct CommunicationContext {
    transport: Arc<dyn Transport>,
    errors: ErrorCommunicator,
    shutdown_state: Mutex<ShutdownState>,
}

impl CommunicationContext {
    /// Initialise the transport and start the error listener
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CommError::ProtocolMisuse`] if the transport was already
    /// initialised, and a transport error if it cannot support concurrent use.
    pub fn initialise(transport: Arc<dyn Transport>) -> CommResult<Arc<Self>> {
        let provided = match transport.initialise(ThreadSupport::Multiple) {
            Ok(provided) => provided,
            Err(TransportError::AlreadyInitialised) => {
                return Err(CommError::misuse(
                    "internode communication may only be initialised once",
                ));
            }
            Err(e) => return Err(e.into()),
        };
        // The error listener runs concurrently with the main protocol.
        if provided < ThreadSupport::Multiple {
            return Err(TransportError::InsufficientThreadSupport {
                required: ThreadSupport::Multiple,
                provided,
            }
            .into());
        }

        let errors = ErrorCommunicator::start(transport.as_ref())?;
        info!(
            node = transport.rank(),
            nodes = transport.size(),
            "communication context initialised"
        );
        Ok(Arc::new(Self {
            transport,
            errors,
            shutdown_state: Mutex::new(ShutdownState::Running),
        }))
    }

    /// This node's ID
    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.transport.rank())
    }

    /// Number of nodes in the cluster
    pub fn node_count(&self) -> u32 {
        self.transport.size()
    }

    /// The world transport
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Communicator for this node's role
    ///
    /// # Errors
    ///
    /// Never fails for a consistent transport; role checks are shared with
    /// the communicator constructors.
    pub fn communicator(self: &Arc<Self>) -> CommResult<Communicator> {
        if self.node_id().is_primary() {
            Ok(Communicator::Primary(PrimaryNodeCommunicator::new(
                Arc::clone(self),
            )?))
        } else {
            Ok(Communicator::Secondary(SecondaryNodeCommunicator::new(
                Arc::clone(self),
            )?))
        }
    }

    /// Full-cluster barrier on the world transport
    ///
    /// # Errors
    ///
    /// Fails if the transport fails.
    pub async fn barrier(&self) -> CommResult<()> {
        Ok(self.transport.barrier().await?)
    }

    /// Current error flag
    pub fn error_status(&self) -> bool {
        self.errors.error_status()
    }

    /// Raise the cluster-wide error flag
    ///
    /// # Errors
    ///
    /// Fails if the transport fails.
    pub async fn indicate_error(&self) -> CommResult<()> {
        Ok(self.errors.indicate_error().await?)
    }

    /// Tear down: world barrier, stop the error listener, finalize
    ///
    /// Collective. Only the first call does anything; later calls return its
    /// outcome.
    ///
    /// # Errors
    ///
    /// Fails if any of the steps fails.
    pub async fn shutdown(&self) -> CommResult<()> {
        let mut state = self.shutdown_state.lock().await;
        match &*state {
            ShutdownState::Done => return Ok(()),
            ShutdownState::Failed(err) => return Err(err.clone()),
            ShutdownState::Running => {}
        }

        debug!(node = self.transport.rank(), "shutting down communication");
        let outcome = self.tear_down().await;
        *state = match &outcome {
            Ok(()) => ShutdownState::Done,
            Err(err) => {
                warn!(node = self.transport.rank(), error = %err, "shutdown failed");
                ShutdownState::Failed(err.clone())
            }
        };
        outcome
    }

    async fn tear_down(&self) -> CommResult<()> {
        self.transport.barrier().await?;
        self.errors.shutdown().await?;
        self.transport.finalize().await?;
        Ok(())
    }

    /// Whether [`shutdown`](Self::shutdown) completed successfully
    pub fn is_shut_down(&self) -> bool {
        matches!(
            self.shutdown_state.try_lock().as_deref(),
            Ok(ShutdownState::Done)
        )
    }
}

impl Drop for CommunicationContext {
    fn drop(&mut self) {
        match self.shutdown_state.get_mut() {
            ShutdownState::Done => {}
            ShutdownState::Running => warn!(
                node = self.transport.rank(),
                "communication context dropped without shutdown"
            ),
            ShutdownState::Failed(err) => warn!(
                node = self.transport.rank(),
                error = %err,
                "communication context dropped after a failed shutdown"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{LocalCluster, LocalClusterConfig};
    use crate::testing::run_cluster;

    #[tokio::test]
    async fn test_initialise_once() {
        let cluster = LocalCluster::new(LocalClusterConfig::new(1)).unwrap();
        let endpoint = Arc::clone(&cluster.endpoints()[0]);
        let context = CommunicationContext::initialise(endpoint.clone()).unwrap();

        let err = CommunicationContext::initialise(endpoint).unwrap_err();
        assert!(matches!(err, CommError::ProtocolMisuse(_)));

        assert!(!context.is_shut_down());
        context.shutdown().await.unwrap();
        context.shutdown().await.unwrap();
        assert!(context.is_shut_down());
    }

    #[tokio::test]
    async fn test_failed_shutdown_is_remembered() {
        let cluster = LocalCluster::new(LocalClusterConfig::new(1)).unwrap();
        let context = CommunicationContext::initialise(cluster.endpoints()[0].clone()).unwrap();
        context.transport().finalize().await.unwrap();

        let expected = Err(CommError::Transport(TransportError::Finalized));
        assert_eq!(context.shutdown().await, expected);
        assert!(!context.is_shut_down());
        assert_eq!(context.shutdown().await, expected);
        assert!(!context.is_shut_down());
    }

    #[tokio::test]
    async fn test_insufficient_thread_support() {
        let cluster = LocalCluster::new(
            LocalClusterConfig::new(1).with_thread_support(ThreadSupport::Serialized),
        )
        .unwrap();
        let err = CommunicationContext::initialise(cluster.endpoints()[0].clone())
            .unwrap_err();
        assert_eq!(
            err,
            CommError::Transport(TransportError::InsufficientThreadSupport {
                required: ThreadSupport::Multiple,
                provided: ThreadSupport::Serialized,
            })
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_role_detection() {
        let roles = run_cluster(3, |context| async move {
            let is_primary = matches!(context.communicator(), Ok(Communicator::Primary(_)));
            (context.node_id(), context.node_count(), is_primary)
        })
        .await;
        assert_eq!(
            roles,
            vec![
                (NodeId::new(0), 3, true),
                (NodeId::new(1), 3, false),
                (NodeId::new(2), 3, false),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_transport_finalized_after_shutdown() {
        let cluster = LocalCluster::new(LocalClusterConfig::new(2)).unwrap();
        let handles: Vec<_> = cluster
            .into_endpoints()
            .into_iter()
            .map(|endpoint| {
                tokio::spawn(async move {
                    let context = CommunicationContext::initialise(endpoint)?;
                    context.shutdown().await?;
                    context.barrier().await
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(
                handle.await.unwrap(),
                Err(CommError::Transport(TransportError::Finalized))
            );
        }
    }
}
