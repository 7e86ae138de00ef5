//! Run reports.

use antfold_core::{AntennaInputRange, NodeId, ObservationProcessingResults};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of an observation run, as seen by the primary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Observation ID
    pub observation_id: u64,
    /// Signal start time
    pub signal_start_time: u64,
    /// Nodes in the cluster, primary included
    pub node_count: u32,
    /// Sampling frequency after downsampling
    pub new_sampling_freq: u32,
    /// Antenna inputs in the observation
    pub antenna_input_count: usize,
    /// Secondaries whose setup failed
    pub failed_setup: Vec<NodeId>,
    /// Work sent to each secondary
    pub assignments: BTreeMap<NodeId, Option<AntennaInputRange>>,
    /// Results reported by each secondary
    pub results: BTreeMap<NodeId, ObservationProcessingResults>,
    /// Some node indicated an error during the run
    pub distributed_error: bool,
}

impl RunSummary {
    /// Antenna inputs with a reported result
    #[must_use]
    pub fn processed_inputs(&self) -> usize {
        self.results.values().map(ObservationProcessingResults::len).sum()
    }

    /// Antenna inputs processed successfully
    #[must_use]
    pub fn successful_inputs(&self) -> usize {
        self.results
            .values()
            .map(ObservationProcessingResults::success_count)
            .sum()
    }

    /// Whether every antenna input was processed successfully
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.distributed_error && self.successful_inputs() == self.antenna_input_count
    }
}

/// What one secondary did during a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryReport {
    /// Primary reported a successful startup
    pub started: bool,
    /// Local setup succeeded
    pub prepared: bool,
    /// Work received
    pub assignment: Option<AntennaInputRange>,
    /// Antenna inputs reported
    pub processed: usize,
    /// Antenna inputs processed successfully
    pub succeeded: usize,
}
