//! Observation metadata read from the input directory.

use antfold_core::{AntennaConfig, AntennaInputPhysID, AppConfig};
use antfold_runtime::MetadataSource;
use anyhow::{Context, bail};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// Voltage file extension
pub const VOLTAGE_EXTENSION: &str = "sub";

/// Signal chains recorded by every tile
pub const SIGNAL_CHAINS: [char; 2] = ['X', 'Y'];

/// Metadata source backed by an observation directory
///
/// Channels come from the `<obs>_<start>_<channel>.sub` voltage files next to
/// the `<obs>.metafits` file. The tile layout is supplied up front.
#[derive(Debug, Clone)]
pub struct DirectoryMetadataSource {
    tiles: u32,
    flagged_tiles: BTreeSet<u32>,
}

impl DirectoryMetadataSource {
    /// Create a new source reporting `tiles` tiles
    #[must_use]
    pub fn new(tiles: u32) -> Self {
        Self {
            tiles,
            flagged_tiles: BTreeSet::new(),
        }
    }

    /// Mark tiles as flagged
    #[must_use]
    pub fn with_flagged_tiles(mut self, tiles: impl IntoIterator<Item = u32>) -> Self {
        self.flagged_tiles.extend(tiles);
        self
    }

    fn antenna_inputs(&self) -> Vec<AntennaInputPhysID> {
        (0..self.tiles)
            .flat_map(|tile| {
                let flagged = self.flagged_tiles.contains(&tile);
                SIGNAL_CHAINS.map(|chain| AntennaInputPhysID::new(tile, chain, flagged))
            })
            .collect()
    }
}

/// Channel of a voltage file name, if it belongs to the segment `prefix`
fn voltage_channel(file_name: &str, prefix: &str) -> Option<u32> {
    let stem = file_name.strip_suffix(VOLTAGE_EXTENSION)?.strip_suffix('.')?;
    let channel = stem.strip_prefix(prefix)?.strip_prefix('_')?;
    if channel.is_empty() || !channel.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    channel.parse().ok()
}

async fn check_metafits(path: &Path) -> anyhow::Result<()> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            bail!("No metafits at specified path {}", path.display())
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Cannot read metafits {}", path.display()));
        }
    };
    if !metadata.is_file() || metadata.len() == 0 {
        bail!("Invalid metafits at specified path {}", path.display());
    }
    Ok(())
}

async fn voltage_channels(dir: &Path, prefix: &str) -> anyhow::Result<BTreeSet<u32>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Cannot list {}", dir.display()))?;

    let mut channels = BTreeSet::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(channel) = name.to_str().and_then(|name| voltage_channel(name, prefix)) else {
            continue;
        };
        let metadata = entry.metadata().await?;
        if metadata.is_file() && metadata.len() > 0 {
            channels.insert(channel);
        } else {
            debug!(file = ?name, "skipping empty voltage file");
        }
    }
    Ok(channels)
}

#[async_trait]
impl MetadataSource for DirectoryMetadataSource {
    async fn antenna_config(&self, app: &AppConfig) -> anyhow::Result<AntennaConfig> {
        let dir = &app.input_directory_path;
        check_metafits(&dir.join(format!("{}.metafits", app.observation_id))).await?;

        let channels = voltage_channels(dir, &app.file_stem_prefix()).await?;
        if channels.is_empty() {
            bail!("Invalid/no voltage files at specified path {}", dir.display());
        }
        debug!(?channels, tiles = self.tiles, "observation metadata loaded");
        Ok(AntennaConfig::new(self.antenna_inputs(), channels))
    }
}
