//! Channel remapping for downsampling.
//!
//! Downsampling a signal folds every frequency above the new Nyquist frequency
//! back into the band, mirrored. Given the channels actually observed, this
//! module finds the smallest even sampling frequency at which no two observed
//! channels fold onto the same new channel, and records where each one lands.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Original sampling frequency of the instrument, in coarse channel units
///
/// Coarse channel numbers run up to 255, so a Nyquist frequency of 256
/// covers all of them.
pub const MWA_SAMPLING_FREQ: u32 = 512;

/// Where an original channel lands after downsampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemappedChannel {
    /// Channel index at the new sampling frequency
    pub new_channel: u32,
    /// Whether the spectrum is mirrored in the new channel
    pub flipped: bool,
}

impl RemappedChannel {
    /// Create a new remapped channel
    #[must_use]
    pub const fn new(new_channel: u32, flipped: bool) -> Self {
        Self {
            new_channel,
            flipped,
        }
    }
}

/// Result of [`compute_channel_remapping`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRemapping {
    /// New (always even) sampling frequency
    pub new_sampling_freq: u32,
    /// Original channel to remapped channel
    pub channel_map: BTreeMap<u32, RemappedChannel>,
}

impl ChannelRemapping {
    /// Create a new remapping
    #[must_use]
    pub fn new(
        new_sampling_freq: u32,
        channel_map: impl IntoIterator<Item = (u32, RemappedChannel)>,
    ) -> Self {
        Self {
            new_sampling_freq,
            channel_map: channel_map.into_iter().collect(),
        }
    }

    /// Nyquist frequency at the new sampling frequency
    #[must_use]
    pub const fn new_nyquist_freq(&self) -> u32 {
        self.new_sampling_freq / 2
    }

    /// Look up where an original channel lands
    #[must_use]
    pub fn remap(&self, channel: u32) -> Option<RemappedChannel> {
        self.channel_map.get(&channel).copied()
    }
}

/// Fold `channel` into the band below `nyquist_freq`.
fn alias_channel(channel: u32, nyquist_freq: u32) -> RemappedChannel {
    let sampling_freq = 2 * nyquist_freq;
    let diff = channel % sampling_freq;
    if diff <= nyquist_freq {
        RemappedChannel::new(diff, false)
    } else {
        RemappedChannel::new(sampling_freq - diff, true)
    }
}

/// Try to fold every channel at `nyquist_freq` without collisions.
fn try_remap(
    channels: &BTreeSet<u32>,
    nyquist_freq: u32,
) -> Option<BTreeMap<u32, RemappedChannel>> {
    let mut taken = HashSet::with_capacity(channels.len());
    let mut map = BTreeMap::new();
    for &channel in channels {
        let alias = alias_channel(channel, nyquist_freq);
        if !taken.insert(alias.new_channel) {
            return None;
        }
        map.insert(channel, alias);
    }
    Some(map)
}

/// Compute the minimal collision-free remapping of `channels`
///
/// # Errors
///
/// Returns a configuration error if `sampling_freq` is odd or any channel
/// exceeds `sampling_freq / 2`.
pub fn compute_channel_remapping(
    sampling_freq: u32,
    channels: &BTreeSet<u32>,
) -> CoreResult<ChannelRemapping> {
    if sampling_freq % 2 != 0 {
        return Err(CoreError::OddSamplingFrequency { sampling_freq });
    }
    let nyquist_freq = sampling_freq / 2;
    if let Some(&channel) = channels.iter().find(|&&c| c > nyquist_freq) {
        return Err(CoreError::ChannelAboveNyquist {
            channel,
            nyquist_freq,
        });
    }

    let mut iter = channels.iter();
    match (iter.next(), iter.next()) {
        (None, _) => Ok(ChannelRemapping::new(sampling_freq, [])),
        // Provisional: a lone channel 0 still gets a sampling frequency of 2.
        (Some(&channel), None) => Ok(ChannelRemapping::new(
            2 * channel.max(1),
            [(channel, RemappedChannel::new(0, false))],
        )),
        _ => {
            // N channels need at least N distinct slots in [0, nyquist].
            let min_nyquist = channels.len() as u32 - 1;
            // The identity mapping at the original Nyquist frequency always succeeds.
            (min_nyquist..=nyquist_freq)
                .find_map(|ny| {
                    try_remap(channels, ny).map(|map| ChannelRemapping::new(2 * ny, map))
                })
                .ok_or(CoreError::ChannelAboveNyquist {
                    channel: channels.last().copied().unwrap_or_default(),
                    nyquist_freq,
                })
        }
    }
}
