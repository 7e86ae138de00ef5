//! Collaborator interfaces.
//!
//! The runtime coordinates; it never reads instrument files or touches
//! samples. Metadata comes from a [`MetadataSource`] on the primary and the
//! signal chain runs in an [`AntennaInputProcessor`] on each secondary.

use antfold_comm::CommunicationContext;
use antfold_core::{
    AntennaConfig, AntennaInputRange, AppConfig, ChannelRemapping, NodeId,
    ObservationProcessingResults,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Source of an observation's antenna configuration
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Load the antenna inputs and frequency channels of `app`'s observation
    async fn antenna_config(&self, app: &AppConfig) -> anyhow::Result<AntennaConfig>;
}

/// Everything a secondary knows about its share of the work
#[derive(Debug, Clone, Copy)]
pub struct ProcessingJob<'a> {
    /// Node doing the work
    pub node: NodeId,
    /// Run configuration
    pub app: &'a AppConfig,
    /// Antenna configuration of the observation
    pub antenna: &'a AntennaConfig,
    /// Where each channel lands after downsampling
    pub remapping: &'a ChannelRemapping,
    /// Antenna inputs to process
    pub assignment: AntennaInputRange,
}

/// Cluster-wide abort flag as seen by a processor
///
/// Raised once any node indicates an error. Reads are cheap; processors
/// should poll between antenna inputs.
#[derive(Clone, Default)]
pub struct AbortSignal {
    context: Option<Arc<CommunicationContext>>,
}

impl AbortSignal {
    /// A signal that is never raised
    #[must_use]
    pub fn never() -> Self {
        Self::default()
    }

    pub(crate) fn from_context(context: Arc<CommunicationContext>) -> Self {
        Self {
            context: Some(context),
        }
    }

    /// Whether processing should stop
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.context
            .as_ref()
            .is_some_and(|context| context.error_status())
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AbortSignal").field(&self.is_raised()).finish()
    }
}

/// Local signal processing on a secondary node
#[async_trait]
pub trait AntennaInputProcessor: Send + Sync {
    /// Node-local setup, before any configuration arrives
    ///
    /// A failure is reported to the primary, which then assigns this node no
    /// work.
    async fn prepare(&self, node: NodeId) -> anyhow::Result<()>;

    /// Process the assigned antenna inputs
    ///
    /// Returns one result per processed antenna input. An error means the
    /// whole assignment failed.
    async fn process(
        &self,
        job: ProcessingJob<'_>,
        abort: &AbortSignal,
    ) -> anyhow::Result<ObservationProcessingResults>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_raised() {
        let abort = AbortSignal::never();
        assert!(!abort.is_raised());
        assert_eq!(format!("{:?}", abort), "AbortSignal(false)");
    }
}
