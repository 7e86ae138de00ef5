//! Wire format of the internode protocol.
//!
//! All integers are little-endian. Standalone booleans travel as one byte;
//! booleans inside word tuples travel as a `u32` of 0 or 1. Variable-length
//! data is always preceded by a fixed-size header carrying its size, so every
//! receiver can allocate exactly before the payload arrives. Paths travel as
//! their raw bytes.

use crate::error::{CommError, CommResult};
use crate::transport::TransportError;
use antfold_core::{
    AntennaConfig, AntennaInputPhysID, AntennaInputProcessingResults, AntennaInputRange,
    AppConfig, ChannelRemapping, ObservationProcessingResults, RemappedChannel,
};
use bytes::{Buf, BufMut, BytesMut};
use std::path::{Path, PathBuf};

/// Bytes in a protocol word
pub const WORD_LEN: usize = 4;

/// Bytes in a header long word
pub const LONG_LEN: usize = 8;

fn malformed(message: impl Into<String>) -> CommError {
    TransportError::Malformed(message.into()).into()
}

/// Encode words as little-endian bytes
#[must_use]
pub fn encode_words(words: &[u32]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(words.len() * WORD_LEN);
    for &word in words {
        buf.put_u32_le(word);
    }
    buf.to_vec()
}

/// Decode little-endian words
///
/// # Errors
///
/// Fails if the length is not a whole number of words.
pub fn decode_words(mut bytes: &[u8]) -> CommResult<Vec<u32>> {
    if bytes.len() % WORD_LEN != 0 {
        return Err(malformed(format!(
            "{} bytes is not a whole number of words",
            bytes.len()
        )));
    }
    let mut words = Vec::with_capacity(bytes.len() / WORD_LEN);
    while bytes.has_remaining() {
        words.push(bytes.get_u32_le());
    }
    Ok(words)
}

/// Encode a standalone boolean
#[must_use]
pub const fn encode_bool(value: bool) -> u8 {
    value as u8
}

/// Decode a standalone boolean; any non-zero byte is true
#[must_use]
pub const fn decode_bool(byte: u8) -> bool {
    byte != 0
}

fn decode_bool_word(word: u32, what: &str) -> CommResult<bool> {
    match word {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(malformed(format!("{} flag has value {}", what, other))),
    }
}

fn long_to_usize(value: u64, what: &str) -> CommResult<usize> {
    usize::try_from(value).map_err(|_| malformed(format!("{} of {} does not fit", what, value)))
}

/// Raw bytes of a path
#[cfg(unix)]
fn path_bytes<'a>(path: &'a Path, _name: &str) -> CommResult<&'a [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Ok(path.as_os_str().as_bytes())
}

/// Raw bytes of a path; only UTF-8 paths have a portable encoding here
#[cfg(not(unix))]
fn path_bytes<'a>(path: &'a Path, name: &str) -> CommResult<&'a [u8]> {
    path.to_str()
        .map(str::as_bytes)
        .ok_or_else(|| {
            antfold_core::CoreError::invalid_argument(name, "path is not valid UTF-8").into()
        })
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> CommResult<PathBuf> {
    use std::os::unix::ffi::OsStrExt;
    Ok(PathBuf::from(std::ffi::OsStr::from_bytes(bytes)))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> CommResult<PathBuf> {
    std::str::from_utf8(bytes)
        .map(PathBuf::from)
        .map_err(|e| malformed(format!("app config path: {}", e)))
}

/// Fixed-size part of a broadcast [`AppConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppConfigHeader {
    /// Observation ID
    pub observation_id: u64,
    /// Signal start time
    pub signal_start_time: u64,
    /// Ignore-errors flag
    pub ignore_errors: bool,
    /// Byte length of the input directory path
    pub input_len: u64,
    /// Byte length of the filter path
    pub filter_len: u64,
    /// Byte length of the output directory path
    pub output_len: u64,
}

impl AppConfigHeader {
    /// Encoded size: six long words
    pub const LEN: usize = 6 * LONG_LEN;

    /// Describe `config`
    ///
    /// # Errors
    ///
    /// Fails on platforms without raw path bytes if a path is not valid
    /// UTF-8.
    pub fn for_config(config: &AppConfig) -> CommResult<Self> {
        Ok(Self {
            observation_id: config.observation_id,
            signal_start_time: config.signal_start_time,
            ignore_errors: config.ignore_errors,
            input_len: path_bytes(&config.input_directory_path, "input directory path")?.len() as u64,
            filter_len: path_bytes(&config.inv_polyphase_filter_path, "filter path")?.len() as u64,
            output_len: path_bytes(&config.output_directory_path, "output directory path")?.len()
                as u64,
        })
    }

    /// Encode the header
    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        let mut buf = &mut out[..];
        buf.put_u64_le(self.observation_id);
        buf.put_u64_le(self.signal_start_time);
        buf.put_u64_le(u64::from(self.ignore_errors));
        buf.put_u64_le(self.input_len);
        buf.put_u64_le(self.filter_len);
        buf.put_u64_le(self.output_len);
        out
    }

    /// Decode a header
    ///
    /// # Errors
    ///
    /// Fails on a wrong length or an ignore-errors word other than 0 or 1.
    pub fn decode(mut bytes: &[u8]) -> CommResult<Self> {
        if bytes.len() != Self::LEN {
            return Err(malformed(format!(
                "app config header of {} bytes",
                bytes.len()
            )));
        }
        let observation_id = bytes.get_u64_le();
        let signal_start_time = bytes.get_u64_le();
        let ignore_errors = match bytes.get_u64_le() {
            0 => false,
            1 => true,
            other => return Err(malformed(format!("ignore-errors flag has value {}", other))),
        };
        Ok(Self {
            observation_id,
            signal_start_time,
            ignore_errors,
            input_len: bytes.get_u64_le(),
            filter_len: bytes.get_u64_le(),
            output_len: bytes.get_u64_le(),
        })
    }

    /// Size of the path payload that follows
    ///
    /// # Errors
    ///
    /// Fails if the lengths overflow `usize`.
    pub fn payload_len(&self) -> CommResult<usize> {
        [self.input_len, self.filter_len, self.output_len]
            .into_iter()
            .try_fold(0usize, |total, len| {
                total
                    .checked_add(long_to_usize(len, "path length")?)
                    .ok_or_else(|| malformed("path lengths overflow"))
            })
    }
}

/// Concatenated paths of `config`
///
/// # Errors
///
/// Fails on platforms without raw path bytes if a path is not valid UTF-8.
pub fn encode_app_config_payload(config: &AppConfig) -> CommResult<Vec<u8>> {
    let mut buf = BytesMut::new();
    buf.put_slice(path_bytes(&config.input_directory_path, "input directory path")?);
    buf.put_slice(path_bytes(&config.inv_polyphase_filter_path, "filter path")?);
    buf.put_slice(path_bytes(&config.output_directory_path, "output directory path")?);
    Ok(buf.to_vec())
}

/// Rebuild an [`AppConfig`] from its header and path payload
///
/// # Errors
///
/// Fails if the payload does not match the header.
pub fn decode_app_config(header: &AppConfigHeader, payload: &[u8]) -> CommResult<AppConfig> {
    if payload.len() != header.payload_len()? {
        return Err(malformed(format!(
            "app config payload of {} bytes, header promised {}",
            payload.len(),
            header.payload_len()?
        )));
    }
    let input_len = long_to_usize(header.input_len, "path length")?;
    let filter_len = long_to_usize(header.filter_len, "path length")?;
    let (input, rest) = payload.split_at(input_len);
    let (filter, output) = rest.split_at(filter_len);

    Ok(AppConfig::new(
        path_from_bytes(input)?,
        header.observation_id,
        header.signal_start_time,
        path_from_bytes(filter)?,
        path_from_bytes(output)?,
    )
    .with_ignore_errors(header.ignore_errors))
}

/// Fixed-size part of a broadcast [`AntennaConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AntennaConfigHeader {
    /// Number of antenna inputs
    pub input_count: u64,
    /// Number of frequency channels
    pub channel_count: u64,
}

impl AntennaConfigHeader {
    /// Encoded size: two long words
    pub const LEN: usize = 2 * LONG_LEN;

    /// Describe `config`
    #[must_use]
    pub fn for_config(config: &AntennaConfig) -> Self {
        Self {
            input_count: config.antenna_inputs.len() as u64,
            channel_count: config.frequency_channels.len() as u64,
        }
    }

    /// Encode the header
    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        let mut buf = &mut out[..];
        buf.put_u64_le(self.input_count);
        buf.put_u64_le(self.channel_count);
        out
    }

    /// Decode a header
    ///
    /// # Errors
    ///
    /// Fails on a wrong length.
    pub fn decode(mut bytes: &[u8]) -> CommResult<Self> {
        if bytes.len() != Self::LEN {
            return Err(malformed(format!(
                "antenna config header of {} bytes",
                bytes.len()
            )));
        }
        Ok(Self {
            input_count: bytes.get_u64_le(),
            channel_count: bytes.get_u64_le(),
        })
    }

    /// Size of the word payload that follows
    ///
    /// # Errors
    ///
    /// Fails if the counts overflow `usize`.
    pub fn payload_len(&self) -> CommResult<usize> {
        let inputs = long_to_usize(self.input_count, "antenna input count")?;
        let channels = long_to_usize(self.channel_count, "channel count")?;
        inputs
            .checked_mul(3)
            .and_then(|words| words.checked_add(channels))
            .and_then(|words| words.checked_mul(WORD_LEN))
            .ok_or_else(|| malformed("antenna config size overflows"))
    }
}

/// `(tile, signal chain, flagged)` triples followed by the channel list
#[must_use]
pub fn encode_antenna_config_payload(config: &AntennaConfig) -> Vec<u8> {
    let words: Vec<u32> = config
        .antenna_inputs
        .iter()
        .flat_map(|input| {
            [
                input.tile,
                u32::from(input.signal_chain),
                u32::from(input.flagged),
            ]
        })
        .chain(config.frequency_channels.iter().copied())
        .collect();
    encode_words(&words)
}

/// Rebuild an [`AntennaConfig`] from its header and word payload
///
/// # Errors
///
/// Fails if the payload does not match the header or holds an invalid value.
pub fn decode_antenna_config(
    header: &AntennaConfigHeader,
    payload: &[u8],
) -> CommResult<AntennaConfig> {
    if payload.len() != header.payload_len()? {
        return Err(malformed(format!(
            "antenna config payload of {} bytes, header promised {}",
            payload.len(),
            header.payload_len()?
        )));
    }
    let words = decode_words(payload)?;
    let (inputs, channels) = words.split_at(3 * long_to_usize(header.input_count, "count")?);

    let antenna_inputs = inputs
        .chunks_exact(3)
        .map(|triple| {
            let signal_chain = char::from_u32(triple[1])
                .ok_or_else(|| malformed(format!("signal chain {:#x}", triple[1])))?;
            Ok(AntennaInputPhysID::new(
                triple[0],
                signal_chain,
                decode_bool_word(triple[2], "flagged")?,
            ))
        })
        .collect::<CommResult<Vec<_>>>()?;

    Ok(AntennaConfig::new(antenna_inputs, channels.iter().copied()))
}

/// Fixed-size part of a broadcast [`ChannelRemapping`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemappingHeader {
    /// New sampling frequency
    pub new_sampling_freq: u32,
    /// Number of remapped channels
    pub map_len: u32,
}

impl RemappingHeader {
    /// Encoded size: two words
    pub const LEN: usize = 2 * WORD_LEN;

    /// Describe `remapping`
    #[must_use]
    pub fn for_remapping(remapping: &ChannelRemapping) -> Self {
        Self {
            new_sampling_freq: remapping.new_sampling_freq,
            map_len: remapping.channel_map.len() as u32,
        }
    }

    /// Encode the header
    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        let mut buf = &mut out[..];
        buf.put_u32_le(self.new_sampling_freq);
        buf.put_u32_le(self.map_len);
        out
    }

    /// Decode a header
    ///
    /// # Errors
    ///
    /// Fails on a wrong length.
    pub fn decode(mut bytes: &[u8]) -> CommResult<Self> {
        if bytes.len() != Self::LEN {
            return Err(malformed(format!("remapping header of {} bytes", bytes.len())));
        }
        Ok(Self {
            new_sampling_freq: bytes.get_u32_le(),
            map_len: bytes.get_u32_le(),
        })
    }

    /// Size of the triple payload that follows
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.map_len as usize * 3 * WORD_LEN
    }
}

/// `(old, new, flipped)` triples in ascending old-channel order
#[must_use]
pub fn encode_remapping_payload(remapping: &ChannelRemapping) -> Vec<u8> {
    let words: Vec<u32> = remapping
        .channel_map
        .iter()
        .flat_map(|(&old, remapped)| [old, remapped.new_channel, u32::from(remapped.flipped)])
        .collect();
    encode_words(&words)
}

/// Rebuild a [`ChannelRemapping`] from its header and triple payload
///
/// # Errors
///
/// Fails if the payload does not match the header or holds an invalid flag.
pub fn decode_remapping(header: &RemappingHeader, payload: &[u8]) -> CommResult<ChannelRemapping> {
    if payload.len() != header.payload_len() {
        return Err(malformed(format!(
            "remapping payload of {} bytes, header promised {}",
            payload.len(),
            header.payload_len()
        )));
    }
    let map = decode_words(payload)?
        .chunks_exact(3)
        .map(|triple| {
            Ok((
                triple[0],
                RemappedChannel::new(triple[1], decode_bool_word(triple[2], "flipped")?),
            ))
        })
        .collect::<CommResult<Vec<_>>>()?;
    Ok(ChannelRemapping::new(header.new_sampling_freq, map))
}

/// Encoded size of an assignment: three words
pub const ASSIGNMENT_LEN: usize = 3 * WORD_LEN;

/// Encode an assignment as `{has_value, begin, end}`
#[must_use]
pub fn encode_assignment(assignment: Option<AntennaInputRange>) -> [u8; ASSIGNMENT_LEN] {
    let words = match assignment {
        Some(range) => [1, range.begin, range.end],
        None => [0, 0, 0],
    };
    let mut out = [0u8; ASSIGNMENT_LEN];
    let mut buf = &mut out[..];
    for word in words {
        buf.put_u32_le(word);
    }
    out
}

/// Decode an assignment
///
/// # Errors
///
/// Fails on a wrong length, a bad flag or an inverted range.
pub fn decode_assignment(bytes: &[u8]) -> CommResult<Option<AntennaInputRange>> {
    if bytes.len() != ASSIGNMENT_LEN {
        return Err(malformed(format!("assignment of {} bytes", bytes.len())));
    }
    let words = decode_words(bytes)?;
    if !decode_bool_word(words[0], "assignment")? {
        return Ok(None);
    }
    let (begin, end) = (words[1], words[2]);
    if begin > end {
        return Err(malformed(format!("assignment range {}..={}", begin, end)));
    }
    Ok(Some(AntennaInputRange::new(begin, end)))
}

/// One node's processing results, split into the columns gathered in step 7
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultColumns {
    /// Antenna input indices, ascending
    pub antenna_inputs: Vec<u32>,
    /// One success byte per antenna input
    pub successes: Vec<u8>,
    /// Number of used channels per antenna input
    pub used_channel_counts: Vec<u32>,
    /// Used channels of every antenna input, concatenated
    pub used_channels: Vec<u32>,
}

impl ResultColumns {
    /// Split results into columns
    #[must_use]
    pub fn from_results(results: &ObservationProcessingResults) -> Self {
        let mut columns = Self::default();
        for (&antenna_input, result) in &results.results {
            columns.antenna_inputs.push(antenna_input);
            columns.successes.push(encode_bool(result.success));
            columns
                .used_channel_counts
                .push(result.used_channels.len() as u32);
            columns.used_channels.extend(result.used_channels.iter());
        }
        columns
    }

    /// Number of antenna inputs
    #[must_use]
    pub fn len(&self) -> usize {
        self.antenna_inputs.len()
    }

    /// Whether there are no antenna inputs
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.antenna_inputs.is_empty()
    }

    /// Reassemble the results
    ///
    /// # Errors
    ///
    /// Fails if the columns disagree on their lengths.
    pub fn into_results(self) -> CommResult<ObservationProcessingResults> {
        let len = self.antenna_inputs.len();
        if self.successes.len() != len || self.used_channel_counts.len() != len {
            return Err(malformed("result columns differ in length"));
        }
        let total: usize = self.used_channel_counts.iter().map(|&c| c as usize).sum();
        if total != self.used_channels.len() {
            return Err(malformed(format!(
                "{} used channels, counts promised {}",
                self.used_channels.len(),
                total
            )));
        }

        let mut channels = self.used_channels.into_iter();
        Ok(self
            .antenna_inputs
            .into_iter()
            .zip(self.successes)
            .zip(self.used_channel_counts)
            .map(|((antenna_input, success), count)| {
                let used = channels.by_ref().take(count as usize);
                (
                    antenna_input,
                    AntennaInputProcessingResults::new(decode_bool(success), used),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_app_config() -> AppConfig {
        AppConfig::new(
            "/group/mwavcs/myObservation",
            1_000_000_000,
            1_000_000_016,
            "/group/mwavcs/inversePolyphaseFilter.bin",
            "/group/mwavcs/myProcessedObservation",
        )
        .with_ignore_errors(true)
    }

    #[test]
    fn test_words_are_little_endian() {
        assert_eq!(encode_words(&[1, 0x0102_0304]), vec![1, 0, 0, 0, 4, 3, 2, 1]);
        assert_eq!(decode_words(&[4, 3, 2, 1]).unwrap(), vec![0x0102_0304]);
        assert!(decode_words(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_app_config_header_layout() {
        let header = AppConfigHeader::for_config(&sample_app_config()).unwrap();
        assert_eq!(header.input_len, 27);
        assert_eq!(header.filter_len, 40);
        assert_eq!(header.output_len, 36);
        assert_eq!(header.payload_len().unwrap(), 103);

        let bytes = header.encode();
        assert_eq!(&bytes[16..24], &1u64.to_le_bytes());
        assert_eq!(AppConfigHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_app_config_rebuilt() {
        let config = sample_app_config();
        let header = AppConfigHeader::for_config(&config).unwrap();
        let payload = encode_app_config_payload(&config).unwrap();
        assert_eq!(decode_app_config(&header, &payload).unwrap(), config);
        assert!(decode_app_config(&header, &payload[1..]).is_err());
    }

    #[test]
    fn test_app_config_header_rejects_bad_flag() {
        let mut bytes = AppConfigHeader::for_config(&sample_app_config())
            .unwrap()
            .encode();
        bytes[16] = 2;
        assert!(matches!(
            AppConfigHeader::decode(&bytes),
            Err(CommError::Transport(TransportError::Malformed(_)))
        ));
    }

    #[test]
    fn test_antenna_config_payload_layout() {
        let config = AntennaConfig::new(
            vec![
                AntennaInputPhysID::new(0, 'X', false),
                AntennaInputPhysID::new(76, 'Y', true),
            ],
            [231, 3],
        );
        let header = AntennaConfigHeader::for_config(&config);
        let payload = encode_antenna_config_payload(&config);
        assert_eq!(payload.len(), header.payload_len().unwrap());
        assert_eq!(
            decode_words(&payload).unwrap(),
            vec![0, 'X' as u32, 0, 76, 'Y' as u32, 1, 3, 231]
        );
        assert_eq!(decode_antenna_config(&header, &payload).unwrap(), config);
    }

    #[test]
    fn test_antenna_config_rejects_invalid_signal_chain() {
        let header = AntennaConfigHeader {
            input_count: 1,
            channel_count: 0,
        };
        let payload = encode_words(&[0, 0xD800, 0]);
        assert!(decode_antenna_config(&header, &payload).is_err());
    }

    #[test]
    fn test_remapping_payload_layout() {
        let remapping = ChannelRemapping::new(
            14,
            [
                (7, RemappedChannel::new(7, false)),
                (53, RemappedChannel::new(3, true)),
            ],
        );
        let header = RemappingHeader::for_remapping(&remapping);
        assert_eq!(header.encode(), [14, 0, 0, 0, 2, 0, 0, 0]);
        let payload = encode_remapping_payload(&remapping);
        assert_eq!(decode_words(&payload).unwrap(), vec![7, 7, 0, 53, 3, 1]);
        assert_eq!(decode_remapping(&header, &payload).unwrap(), remapping);
    }

    #[test]
    fn test_assignment_encoding() {
        let bytes = encode_assignment(Some(AntennaInputRange::new(14, 18)));
        assert_eq!(decode_words(&bytes).unwrap(), vec![1, 14, 18]);
        assert_eq!(
            decode_assignment(&bytes).unwrap(),
            Some(AntennaInputRange::new(14, 18))
        );

        let none = encode_assignment(None);
        assert_eq!(none, [0u8; ASSIGNMENT_LEN]);
        assert_eq!(decode_assignment(&none).unwrap(), None);

        assert!(decode_assignment(&encode_words(&[1, 9, 3])).is_err());
        assert!(decode_assignment(&encode_words(&[2, 0, 0])).is_err());
    }

    #[test]
    fn test_result_columns() {
        let results: ObservationProcessingResults = [
            (17, AntennaInputProcessingResults::new(true, [92, 95, 120])),
            (18, AntennaInputProcessingResults::failed()),
            (19, AntennaInputProcessingResults::new(false, [100])),
        ]
        .into_iter()
        .collect();

        let columns = ResultColumns::from_results(&results);
        assert_eq!(columns.antenna_inputs, vec![17, 18, 19]);
        assert_eq!(columns.successes, vec![1, 0, 0]);
        assert_eq!(columns.used_channel_counts, vec![3, 0, 1]);
        assert_eq!(columns.used_channels, vec![92, 95, 120, 100]);
        assert_eq!(columns.into_results().unwrap(), results);
    }

    #[test]
    fn test_result_columns_reject_inconsistent_counts() {
        let columns = ResultColumns {
            antenna_inputs: vec![1],
            successes: vec![1],
            used_channel_counts: vec![2],
            used_channels: vec![5],
        };
        assert!(columns.into_results().is_err());
    }

    fn app_config_round_trip(config: &AppConfig) -> AppConfig {
        let header = AppConfigHeader::for_config(config).unwrap();
        let header = AppConfigHeader::decode(&header.encode()).unwrap();
        let payload = encode_app_config_payload(config).unwrap();
        decode_app_config(&header, &payload).unwrap()
    }

    fn antenna_config_round_trip(config: &AntennaConfig) -> AntennaConfig {
        let header = AntennaConfigHeader::for_config(config);
        let header = AntennaConfigHeader::decode(&header.encode()).unwrap();
        decode_antenna_config(&header, &encode_antenna_config_payload(config)).unwrap()
    }

    fn remapping_round_trip(remapping: &ChannelRemapping) -> ChannelRemapping {
        let header = RemappingHeader::for_remapping(remapping);
        let header = RemappingHeader::decode(&header.encode()).unwrap();
        decode_remapping(&header, &encode_remapping_payload(remapping)).unwrap()
    }

    #[test]
    fn test_empty_values_survive() {
        let config = AppConfig::new("", 0, 0, "", "");
        assert_eq!(AppConfigHeader::for_config(&config).unwrap().payload_len().unwrap(), 0);
        assert_eq!(app_config_round_trip(&config), config);

        let antenna = AntennaConfig::default();
        assert!(encode_antenna_config_payload(&antenna).is_empty());
        assert_eq!(antenna_config_round_trip(&antenna), antenna);

        let remapping = ChannelRemapping::new(300, []);
        assert_eq!(remapping_round_trip(&remapping), remapping);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_paths_travel_as_bytes() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let config = AppConfig::new(
            OsStr::from_bytes(b"/data/obs\xff"),
            8,
            16,
            "filter\u{e9}.bin",
            OsStr::from_bytes(b"\xc3("),
        );
        let header = AppConfigHeader::for_config(&config).unwrap();
        assert_eq!(header.input_len, 10);
        assert_eq!(header.filter_len, 12);
        assert_eq!(header.output_len, 2);
        assert_eq!(app_config_round_trip(&config), config);
    }

    proptest! {
        #[test]
        fn prop_garbage_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode_words(&bytes);
            let _ = decode_assignment(&bytes);
            let _ = AppConfigHeader::decode(&bytes);
            let _ = AntennaConfigHeader::decode(&bytes);
            let _ = RemappingHeader::decode(&bytes);
        }

        #[test]
        fn prop_app_config_payload_checked(
            lens in proptest::array::uniform3(0u64..16),
            payload in proptest::collection::vec(any::<u8>(), 0..48),
        ) {
            let header = AppConfigHeader {
                observation_id: 8,
                signal_start_time: 16,
                ignore_errors: false,
                input_len: lens[0],
                filter_len: lens[1],
                output_len: lens[2],
            };
            let decoded = decode_app_config(&header, &payload);
            if payload.len() as u64 != lens.iter().sum::<u64>() {
                prop_assert!(decoded.is_err());
            }
        }

        #[test]
        fn prop_app_config_survives_the_wire(
            input in ".{0,24}",
            filter in ".{0,24}",
            output in ".{0,24}",
            observation_id in any::<u64>(),
            signal_start_time in any::<u64>(),
            ignore_errors in any::<bool>(),
        ) {
            let config = AppConfig::new(input, observation_id, signal_start_time, filter, output)
                .with_ignore_errors(ignore_errors);
            prop_assert_eq!(app_config_round_trip(&config), config);
        }

        #[cfg(unix)]
        #[test]
        fn prop_raw_path_bytes_survive_the_wire(
            input in proptest::collection::vec(any::<u8>(), 0..24),
            output in proptest::collection::vec(any::<u8>(), 0..24),
        ) {
            use std::ffi::OsStr;
            use std::os::unix::ffi::OsStrExt;

            let config = AppConfig::new(
                OsStr::from_bytes(&input),
                8,
                16,
                "filter.bin",
                OsStr::from_bytes(&output),
            );
            let decoded = app_config_round_trip(&config);
            prop_assert_eq!(decoded.input_directory_path.as_os_str().as_bytes(), &input[..]);
            prop_assert_eq!(decoded.output_directory_path.as_os_str().as_bytes(), &output[..]);
        }

        #[test]
        fn prop_antenna_config_survives_the_wire(
            inputs in proptest::collection::vec((any::<u32>(), any::<char>(), any::<bool>()), 0..20),
            channels in proptest::collection::btree_set(any::<u32>(), 0..20),
        ) {
            let config = AntennaConfig::new(
                inputs
                    .into_iter()
                    .map(|(tile, chain, flagged)| AntennaInputPhysID::new(tile, chain, flagged))
                    .collect(),
                channels,
            );
            prop_assert_eq!(antenna_config_round_trip(&config), config);
        }

        #[test]
        fn prop_remapping_survives_the_wire(
            new_sampling_freq in any::<u32>(),
            map in proptest::collection::btree_map(any::<u32>(), (any::<u32>(), any::<bool>()), 0..20),
        ) {
            let remapping = ChannelRemapping::new(
                new_sampling_freq,
                map.into_iter()
                    .map(|(old, (new, flipped))| (old, RemappedChannel::new(new, flipped))),
            );
            prop_assert_eq!(remapping_round_trip(&remapping), remapping);
        }
    }
}
