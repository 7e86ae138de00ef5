//! antfold Core Types
//!
//! Pure types and planning algorithms shared by every node in a downsampling run.
//! Nothing in this crate performs I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod antenna;
pub mod assign;
pub mod config;
pub mod error;
pub mod id;
pub mod remap;

// Re-exports
pub use antenna::{
    AntennaConfig, AntennaInputPhysID, AntennaInputProcessingResults, AntennaInputRange,
    ObservationProcessingResults,
};
pub use assign::assign_node_antenna_inputs;
pub use config::AppConfig;
pub use error::{CoreError, CoreResult};
pub use id::NodeId;
pub use remap::{ChannelRemapping, MWA_SAMPLING_FREQ, RemappedChannel, compute_channel_remapping};
