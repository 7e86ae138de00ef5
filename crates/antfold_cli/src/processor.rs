//! Dry-run antenna input processing.

use antfold_core::{AntennaInputProcessingResults, NodeId, ObservationProcessingResults};
use antfold_runtime::{AbortSignal, AntennaInputProcessor, ProcessingJob};
use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Processor that plans the signal chain without touching any samples
///
/// Unflagged inputs succeed over every remapped channel; flagged inputs fail.
#[derive(Debug, Clone)]
pub struct DryRunProcessor {
    inv_polyphase_filter_path: PathBuf,
}

impl DryRunProcessor {
    /// Create a new dry-run processor
    #[must_use]
    pub fn new(inv_polyphase_filter_path: impl Into<PathBuf>) -> Self {
        Self {
            inv_polyphase_filter_path: inv_polyphase_filter_path.into(),
        }
    }
}

#[async_trait]
impl AntennaInputProcessor for DryRunProcessor {
    async fn prepare(&self, node: NodeId) -> anyhow::Result<()> {
        let metadata = tokio::fs::metadata(&self.inv_polyphase_filter_path)
            .await
            .with_context(|| {
                format!(
                    "{} cannot read filter {}",
                    node,
                    self.inv_polyphase_filter_path.display()
                )
            })?;
        if metadata.len() == 0 {
            bail!(
                "{} found an empty filter {}",
                node,
                self.inv_polyphase_filter_path.display()
            );
        }
        Ok(())
    }

    async fn process(
        &self,
        job: ProcessingJob<'_>,
        abort: &AbortSignal,
    ) -> anyhow::Result<ObservationProcessingResults> {
        let channels: Vec<u32> = job.remapping.channel_map.keys().copied().collect();
        let mut results = ObservationProcessingResults::new();

        for index in job.assignment.iter() {
            if abort.is_raised() {
                warn!(node = %job.node, done = results.len(), "aborting, another node failed");
                break;
            }
            let input = job
                .antenna
                .antenna_input(index)
                .ok_or_else(|| anyhow!("antenna input {} is not in the observation", index))?;
            let result = if input.flagged {
                AntennaInputProcessingResults::failed()
            } else {
                AntennaInputProcessingResults::new(true, channels.iter().copied())
            };
            results.insert(index, result);
        }

        debug!(
            node = %job.node,
            processed = results.len(),
            succeeded = results.success_count(),
            "dry run finished"
        );
        Ok(results)
    }
}
