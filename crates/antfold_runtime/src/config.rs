//! Node runtime options.

use antfold_core::MWA_SAMPLING_FREQ;
use serde::{Deserialize, Serialize};

/// Options shared by every node of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOptions {
    /// Sampling frequency of the recorded signal, in coarse channel units
    pub sampling_freq: u32,
}

impl NodeOptions {
    /// Create new options
    #[must_use]
    pub fn new() -> Self {
        Self {
            sampling_freq: MWA_SAMPLING_FREQ,
        }
    }

    /// Set the original sampling frequency
    #[must_use]
    pub fn with_sampling_freq(mut self, sampling_freq: u32) -> Self {
        self.sampling_freq = sampling_freq;
        self
    }
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(NodeOptions::default().sampling_freq, 512);
        assert_eq!(
            NodeOptions::new().with_sampling_freq(300).sampling_freq,
            300
        );
    }
}
