//! antfold Internode Communication
//!
//! Ordered primary/secondary protocol over a collective-communication
//! transport, with an asynchronous cluster-wide error flag.
//!
//! Every node initialises one [`CommunicationContext`], asks it for the
//! [`Communicator`] of its role and then walks through the protocol steps in
//! the same order as every other node.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod communicator;
pub mod context;
pub mod error;
pub mod error_comm;
pub mod local;
pub mod primary;
pub mod secondary;
pub mod transport;
pub mod wire;

#[cfg(test)]
mod testing;

pub use communicator::{Communicator, InternodeCommunicator};
pub use context::CommunicationContext;
pub use error::{CommError, CommResult};
pub use error_comm::ErrorCommunicator;
pub use local::{LocalCluster, LocalClusterConfig, LocalEndpoint};
pub use primary::PrimaryNodeCommunicator;
pub use secondary::SecondaryNodeCommunicator;
pub use transport::{
    GatherLayout, Status, ThreadSupport, Transport, TransportError, TransportResult,
};
