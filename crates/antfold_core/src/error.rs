//! Core error types for antfold.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
///
/// Every variant is a configuration error: the caller handed an algorithm or
/// validator arguments it cannot work with. None of them are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Sampling frequency is not even
    OddSamplingFrequency {
        /// Offending sampling frequency
        sampling_freq: u32,
    },

    /// A channel lies above the Nyquist frequency of the original sampling rate
    ChannelAboveNyquist {
        /// Offending channel
        channel: u32,
        /// Nyquist frequency it was checked against
        nyquist_freq: u32,
    },

    /// Node count of zero
    NoNodes,

    /// Antenna input count of zero
    NoAntennaInputs,

    /// Argument failed validation
    InvalidArgument {
        /// Argument name
        name: String,
        /// Why it was rejected
        reason: String,
    },
}

impl CoreError {
    /// Shorthand for an [`CoreError::InvalidArgument`]
    #[must_use]
    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OddSamplingFrequency { sampling_freq } => {
                write!(f, "Sampling frequency must be even, got {}", sampling_freq)
            }
            Self::ChannelAboveNyquist {
                channel,
                nyquist_freq,
            } => write!(
                f,
                "Frequency channel {} exceeds the Nyquist frequency {}",
                channel, nyquist_freq
            ),
            Self::NoNodes => write!(f, "Number of nodes must be > 0"),
            Self::NoAntennaInputs => write!(f, "Number of antenna inputs must be > 0"),
            Self::InvalidArgument { name, reason } => write!(f, "Invalid {}: {}", name, reason),
        }
    }
}

impl std::error::Error for CoreError {}
