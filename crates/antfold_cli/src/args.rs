//! Command-line argument validation.
//!
//! Every validator takes the raw argument text and either returns the typed
//! value or a [`CoreError::InvalidArgument`] naming the argument.

use antfold_core::{AppConfig, CoreError, CoreResult};
use clap::Args;
use std::fs;
use std::path::{Path, PathBuf};

/// Positional arguments describing one observation run
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Directory holding the metafits and raw voltage files
    pub input_directory: String,
    /// Observation ID (GPS seconds, divisible by 8)
    pub observation_id: String,
    /// Signal start time (GPS seconds, divisible by 8)
    pub signal_start_time: String,
    /// Inverse polyphase filter coefficients file
    pub inv_polyphase_filter: String,
    /// Directory processed signals are written to
    pub output_directory: String,
    /// Keep going after an antenna input fails (`true` or `false`)
    pub ignore_errors: String,
}

impl RunArgs {
    /// Validate every argument and build the run configuration
    ///
    /// # Errors
    ///
    /// Returns the first argument that fails validation.
    pub fn to_app_config(&self) -> CoreResult<AppConfig> {
        let input = validate_input_directory_path(&self.input_directory)?;
        let observation_id = validate_observation_id(&self.observation_id)?;
        let signal_start_time = validate_signal_start_time(observation_id, &self.signal_start_time)?;
        let filter = validate_inv_polyphase_filter_path(&self.inv_polyphase_filter)?;
        let output = validate_output_directory_path(&self.output_directory)?;
        let ignore_errors = validate_ignore_errors(&self.ignore_errors)?;

        Ok(
            AppConfig::new(input, observation_id, signal_start_time, filter, output)
                .with_ignore_errors(ignore_errors),
        )
    }
}

fn existing(name: &str, raw: &str) -> CoreResult<(PathBuf, fs::Metadata)> {
    let path = PathBuf::from(raw);
    match fs::metadata(&path) {
        Ok(metadata) => Ok((path, metadata)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CoreError::invalid_argument(
            name,
            format!("{} does not exist", raw),
        )),
        Err(e) => Err(CoreError::invalid_argument(
            name,
            format!("{} cannot be read: {}", raw, e),
        )),
    }
}

fn is_empty_dir(path: &Path) -> std::io::Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

/// Validate the input directory: it must exist, be a directory and hold files
///
/// # Errors
///
/// Returns [`CoreError::InvalidArgument`] otherwise.
pub fn validate_input_directory_path(raw: &str) -> CoreResult<PathBuf> {
    const NAME: &str = "input directory";
    let (path, metadata) = existing(NAME, raw)?;
    if !metadata.is_dir() {
        return Err(CoreError::invalid_argument(
            NAME,
            format!("{} is not a directory", raw),
        ));
    }
    match is_empty_dir(&path) {
        Ok(false) => Ok(path),
        Ok(true) => Err(CoreError::invalid_argument(NAME, format!("{} is empty", raw))),
        Err(e) => Err(CoreError::invalid_argument(
            NAME,
            format!("{} cannot be listed: {}", raw, e),
        )),
    }
}

fn gps_seconds(name: &str, raw: &str) -> CoreResult<u64> {
    let value: i128 = raw
        .trim()
        .parse()
        .map_err(|_| CoreError::invalid_argument(name, format!("{} is not a number", raw)))?;
    if value <= 0 {
        return Err(CoreError::invalid_argument(
            name,
            format!("{} must be positive", raw),
        ));
    }
    let value = u64::try_from(value)
        .map_err(|_| CoreError::invalid_argument(name, format!("{} is out of range", raw)))?;
    if value % 8 != 0 {
        return Err(CoreError::invalid_argument(
            name,
            format!("{} must be divisible by 8", raw),
        ));
    }
    Ok(value)
}

/// Validate an observation ID: a positive integer divisible by 8
///
/// # Errors
///
/// Returns [`CoreError::InvalidArgument`] otherwise.
pub fn validate_observation_id(raw: &str) -> CoreResult<u64> {
    gps_seconds("observation ID", raw)
}

/// Validate a signal start time against its observation ID
///
/// # Errors
///
/// Returns [`CoreError::InvalidArgument`] unless the start time is a positive
/// integer divisible by 8 and not before the observation ID.
pub fn validate_signal_start_time(observation_id: u64, raw: &str) -> CoreResult<u64> {
    const NAME: &str = "signal start time";
    let start = gps_seconds(NAME, raw)?;
    if start < observation_id {
        return Err(CoreError::invalid_argument(
            NAME,
            format!(
                "{} must be greater than or equal to the observation ID {}",
                start, observation_id
            ),
        ));
    }
    Ok(start)
}

/// Validate the filter path: it must be a non-empty regular file
///
/// # Errors
///
/// Returns [`CoreError::InvalidArgument`] otherwise.
pub fn validate_inv_polyphase_filter_path(raw: &str) -> CoreResult<PathBuf> {
    const NAME: &str = "inverse polyphase filter path";
    let (path, metadata) = existing(NAME, raw)?;
    if !metadata.is_file() {
        return Err(CoreError::invalid_argument(
            NAME,
            format!("{} is not a regular file", raw),
        ));
    }
    if metadata.len() == 0 {
        return Err(CoreError::invalid_argument(NAME, format!("{} is empty", raw)));
    }
    Ok(path)
}

/// Validate the output directory: it must exist and be a directory
///
/// # Errors
///
/// Returns [`CoreError::InvalidArgument`] otherwise.
pub fn validate_output_directory_path(raw: &str) -> CoreResult<PathBuf> {
    const NAME: &str = "output directory";
    let (path, metadata) = existing(NAME, raw)?;
    if !metadata.is_dir() {
        return Err(CoreError::invalid_argument(
            NAME,
            format!("{} is not a directory", raw),
        ));
    }
    Ok(path)
}

/// Parse the ignore-errors flag, `true` or `false`
///
/// # Errors
///
/// Returns [`CoreError::InvalidArgument`] for anything else.
pub fn validate_ignore_errors(raw: &str) -> CoreResult<bool> {
    match raw {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(CoreError::invalid_argument(
            "ignore errors",
            format!("{} must be either true or false", raw),
        )),
    }
}
