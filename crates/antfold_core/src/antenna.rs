//! Antenna inputs, work assignments and per-input processing results.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

/// Physical identity of one antenna input (one receiver channel of the array)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AntennaInputPhysID {
    /// Physical tile ID
    pub tile: u32,
    /// Signal chain (polarisation) tag, e.g. `'X'` or `'Y'`
    pub signal_chain: char,
    /// Input was flagged as faulty in the observation metadata
    pub flagged: bool,
}

impl AntennaInputPhysID {
    /// Create a new antenna input ID
    #[must_use]
    pub const fn new(tile: u32, signal_chain: char, flagged: bool) -> Self {
        Self {
            tile,
            signal_chain,
            flagged,
        }
    }
}

/// Antenna inputs and frequency channels of an observation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntennaConfig {
    /// Antenna inputs, indexed by antenna input number
    pub antenna_inputs: Vec<AntennaInputPhysID>,
    /// Coarse frequency channels present in the observation
    pub frequency_channels: BTreeSet<u32>,
}

impl AntennaConfig {
    /// Create a new antenna config
    #[must_use]
    pub fn new(
        antenna_inputs: Vec<AntennaInputPhysID>,
        frequency_channels: impl IntoIterator<Item = u32>,
    ) -> Self {
        Self {
            antenna_inputs,
            frequency_channels: frequency_channels.into_iter().collect(),
        }
    }

    /// Look up an antenna input by index
    #[must_use]
    pub fn antenna_input(&self, index: u32) -> Option<&AntennaInputPhysID> {
        self.antenna_inputs.get(index as usize)
    }
}

/// Inclusive range of antenna input indices assigned to one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AntennaInputRange {
    /// First antenna input (inclusive)
    pub begin: u32,
    /// Last antenna input (inclusive)
    pub end: u32,
}

impl AntennaInputRange {
    /// Create a new range
    #[must_use]
    pub const fn new(begin: u32, end: u32) -> Self {
        Self { begin, end }
    }

    /// A range covering exactly one antenna input
    #[must_use]
    pub const fn single(index: u32) -> Self {
        Self {
            begin: index,
            end: index,
        }
    }

    /// Number of antenna inputs covered
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.end - self.begin + 1
    }

    /// Ranges are never empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Whether `index` falls inside the range
    #[must_use]
    pub const fn contains(&self, index: u32) -> bool {
        self.begin <= index && index <= self.end
    }

    /// Iterate over the covered antenna input indices
    pub fn iter(&self) -> RangeInclusive<u32> {
        self.begin..=self.end
    }
}

/// Outcome of processing one antenna input
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntennaInputProcessingResults {
    /// Whether the input was processed successfully
    pub success: bool,
    /// Channels that contributed to the output signal
    pub used_channels: BTreeSet<u32>,
}

impl AntennaInputProcessingResults {
    /// Create a new result
    #[must_use]
    pub fn new(success: bool, used_channels: impl IntoIterator<Item = u32>) -> Self {
        Self {
            success,
            used_channels: used_channels.into_iter().collect(),
        }
    }

    /// A failed input that used no channels
    #[must_use]
    pub fn failed() -> Self {
        Self::default()
    }
}

/// Processing results of one node, keyed by antenna input index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationProcessingResults {
    /// Per antenna input results
    pub results: BTreeMap<u32, AntennaInputProcessingResults>,
}

impl ObservationProcessingResults {
    /// Create an empty result set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result for one antenna input
    pub fn insert(&mut self, antenna_input: u32, result: AntennaInputProcessingResults) {
        self.results.insert(antenna_input, result);
    }

    /// Number of antenna inputs with a result
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether no antenna input has a result
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Number of antenna inputs processed successfully
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.results.values().filter(|r| r.success).count()
    }

    /// Total number of used channels across all antenna inputs
    #[must_use]
    pub fn used_channel_total(&self) -> usize {
        self.results.values().map(|r| r.used_channels.len()).sum()
    }
}

impl FromIterator<(u32, AntennaInputProcessingResults)> for ObservationProcessingResults {
    fn from_iter<I: IntoIterator<Item = (u32, AntennaInputProcessingResults)>>(iter: I) -> Self {
        Self {
            results: iter.into_iter().collect(),
        }
    }
}
