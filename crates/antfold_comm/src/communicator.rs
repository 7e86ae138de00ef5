//! Shared communicator capability and role dispatch.

use crate::context::CommunicationContext;
use crate::error::{CommError, CommResult};
use crate::primary::PrimaryNodeCommunicator;
use crate::secondary::SecondaryNodeCommunicator;
use antfold_core::NodeId;
use async_trait::async_trait;
use std::sync::Arc;

/// Operations available to every node regardless of role
#[async_trait]
pub trait InternodeCommunicator: Send + Sync {
    /// The shared context
    fn context(&self) -> &Arc<CommunicationContext>;

    /// This node's ID
    fn node_id(&self) -> NodeId {
        self.context().node_id()
    }

    /// Number of nodes in the cluster
    fn node_count(&self) -> u32 {
        self.context().node_count()
    }

    /// Full-cluster barrier
    async fn synchronise(&self) -> CommResult<()> {
        self.context().barrier().await
    }

    /// Whether any node has indicated an error, as far as this node knows
    fn error_status(&self) -> bool {
        self.context().error_status()
    }

    /// Tell every node an error occurred
    async fn indicate_error(&self) -> CommResult<()> {
        self.context().indicate_error().await
    }

    /// Turn a raised error flag into [`CommError::Distributed`]
    fn check_error_status(&self) -> CommResult<()> {
        if self.error_status() {
            Err(CommError::Distributed)
        } else {
            Ok(())
        }
    }
}

/// The communicator for this node's role
#[derive(Debug)]
pub enum Communicator {
    /// Node 0
    Primary(PrimaryNodeCommunicator),
    /// Every other node
    Secondary(SecondaryNodeCommunicator),
}

impl Communicator {
    /// Role-independent view
    pub fn as_internode(&self) -> &dyn InternodeCommunicator {
        match self {
            Self::Primary(primary) => primary,
            Self::Secondary(secondary) => secondary,
        }
    }

    /// The primary communicator, if this is node 0
    #[must_use]
    pub fn into_primary(self) -> Option<PrimaryNodeCommunicator> {
        match self {
            Self::Primary(primary) => Some(primary),
            Self::Secondary(_) => None,
        }
    }

    /// The secondary communicator, if this is not node 0
    #[must_use]
    pub fn into_secondary(self) -> Option<SecondaryNodeCommunicator> {
        match self {
            Self::Primary(_) => None,
            Self::Secondary(secondary) => Some(secondary),
        }
    }
}
