//! Observation run configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration of one observation run
///
/// Built once on the primary node from validated command-line arguments and
/// then broadcast, read-only, to every secondary node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding the observation's metadata and raw voltage files
    pub input_directory_path: PathBuf,
    /// Observation ID (GPS seconds)
    pub observation_id: u64,
    /// Start time of the signal data to process (GPS seconds)
    pub signal_start_time: u64,
    /// Inverse polyphase filter coefficients file
    pub inv_polyphase_filter_path: PathBuf,
    /// Directory processed signals are written to
    pub output_directory_path: PathBuf,
    /// Keep processing other antenna inputs after one fails
    pub ignore_errors: bool,
}

impl AppConfig {
    /// Create a new app config
    #[must_use]
    pub fn new(
        input_directory_path: impl Into<PathBuf>,
        observation_id: u64,
        signal_start_time: u64,
        inv_polyphase_filter_path: impl Into<PathBuf>,
        output_directory_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            input_directory_path: input_directory_path.into(),
            observation_id,
            signal_start_time,
            inv_polyphase_filter_path: inv_polyphase_filter_path.into(),
            output_directory_path: output_directory_path.into(),
            ignore_errors: false,
        }
    }

    /// Set the ignore-errors flag
    #[must_use]
    pub fn with_ignore_errors(mut self, ignore_errors: bool) -> Self {
        self.ignore_errors = ignore_errors;
        self
    }

    /// File name prefix shared by every file of this observation segment
    #[must_use]
    pub fn file_stem_prefix(&self) -> String {
        format!("{}_{}", self.observation_id, self.signal_start_time)
    }
}
