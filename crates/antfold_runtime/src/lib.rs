//! antfold Runtime
//!
//! Drives every node of a cluster through one observation run: the primary
//! plans and distributes the work, secondaries process their share and
//! report back. Metadata extraction and signal processing are supplied by
//! the caller through [`MetadataSource`] and [`AntennaInputProcessor`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod collab;
pub mod config;
pub mod error;
pub mod node;
pub mod summary;

pub use cluster::run_local_cluster;
pub use collab::{AbortSignal, AntennaInputProcessor, MetadataSource, ProcessingJob};
pub use config::NodeOptions;
pub use error::{RuntimeError, RuntimeResult};
pub use node::{plan_assignments, run_primary, run_secondary};
pub use summary::{RunSummary, SecondaryReport};
