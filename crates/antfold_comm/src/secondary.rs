//! Secondary node side of the observation protocol.
//!
//! Mirrors [`PrimaryNodeCommunicator`](crate::primary::PrimaryNodeCommunicator)
//! step for step.

use crate::communicator::InternodeCommunicator;
use crate::context::CommunicationContext;
use crate::error::{CommError, CommResult};
use crate::primary::{ASSIGNMENT_TAG, ROOT};
use crate::wire::{
    self, ASSIGNMENT_LEN, AntennaConfigHeader, AppConfigHeader, RemappingHeader, ResultColumns,
};
use antfold_core::{
    AntennaConfig, AntennaInputRange, AppConfig, ChannelRemapping, ObservationProcessingResults,
};
use std::sync::Arc;
use tracing::debug;

/// Communicator for every node other than 0
#[derive(Debug, Clone)]
pub struct SecondaryNodeCommunicator {
    context: Arc<CommunicationContext>,
}

impl SecondaryNodeCommunicator {
    /// Create a secondary communicator
    ///
    /// # Errors
    ///
    /// Returns [`CommError::ProtocolMisuse`] on node 0.
    pub fn new(context: Arc<CommunicationContext>) -> CommResult<Self> {
        if context.node_id().is_primary() {
            return Err(CommError::misuse("secondary communicator used on node_0"));
        }
        Ok(Self { context })
    }

    /// Step 1: whether the primary started up successfully
    ///
    /// # Errors
    ///
    /// Fails if the transport fails.
    pub async fn receive_app_startup_status(&self) -> CommResult<bool> {
        let mut buffer = [0u8; 1];
        self.context.transport().broadcast(ROOT, &mut buffer).await?;
        let status = wire::decode_bool(buffer[0]);
        debug!(step = 1, node = %self.node_id(), status, "received startup status");
        Ok(status)
    }

    /// Step 2: report this node's setup status
    ///
    /// # Errors
    ///
    /// Fails if the transport fails.
    pub async fn send_node_setup_status(&self, status: bool) -> CommResult<()> {
        debug!(step = 2, node = %self.node_id(), status, "sending setup status");
        self.context
            .transport()
            .gather(ROOT, &[wire::encode_bool(status)], None)
            .await?;
        Ok(())
    }

    /// Step 3: receive the app config
    ///
    /// # Errors
    ///
    /// Fails if the transport fails or the data is malformed.
    pub async fn receive_app_config(&self) -> CommResult<AppConfig> {
        let transport = self.context.transport();
        let mut header = [0u8; AppConfigHeader::LEN];
        transport.broadcast(ROOT, &mut header).await?;
        let header = AppConfigHeader::decode(&header)?;

        let mut payload = vec![0u8; header.payload_len()?];
        transport.broadcast(ROOT, &mut payload).await?;
        debug!(step = 3, node = %self.node_id(), "received app config");
        wire::decode_app_config(&header, &payload)
    }

    /// Step 4: receive the antenna config
    ///
    /// # Errors
    ///
    /// Fails if the transport fails or the data is malformed.
    pub async fn receive_antenna_config(&self) -> CommResult<AntennaConfig> {
        let transport = self.context.transport();
        let mut header = [0u8; AntennaConfigHeader::LEN];
        transport.broadcast(ROOT, &mut header).await?;
        let header = AntennaConfigHeader::decode(&header)?;

        let mut payload = vec![0u8; header.payload_len()?];
        transport.broadcast(ROOT, &mut payload).await?;
        debug!(
            step = 4,
            node = %self.node_id(),
            inputs = header.input_count,
            "received antenna config"
        );
        wire::decode_antenna_config(&header, &payload)
    }

    /// Step 5: receive the channel remapping
    ///
    /// # Errors
    ///
    /// Fails if the transport fails or the data is malformed.
    pub async fn receive_channel_remapping(&self) -> CommResult<ChannelRemapping> {
        let transport = self.context.transport();
        let mut header = [0u8; RemappingHeader::LEN];
        transport.broadcast(ROOT, &mut header).await?;
        let header = RemappingHeader::decode(&header)?;

        let mut payload = vec![0u8; header.payload_len()];
        transport.broadcast(ROOT, &mut payload).await?;
        debug!(
            step = 5,
            node = %self.node_id(),
            new_sampling_freq = header.new_sampling_freq,
            "received channel remapping"
        );
        wire::decode_remapping(&header, &payload)
    }

    /// Step 6: receive this node's antenna input assignment
    ///
    /// # Errors
    ///
    /// Fails if the transport fails or the data is malformed.
    pub async fn receive_antenna_input_assignment(&self) -> CommResult<Option<AntennaInputRange>> {
        let mut buffer = [0u8; ASSIGNMENT_LEN];
        let status = self
            .context
            .transport()
            .recv(Some(ROOT), ASSIGNMENT_TAG, &mut buffer)
            .await?;
        let assignment = wire::decode_assignment(&buffer[..status.len])?;
        debug!(step = 6, node = %self.node_id(), ?assignment, "received assignment");
        Ok(assignment)
    }

    /// Step 7: report this node's processing results
    ///
    /// # Errors
    ///
    /// Fails if the transport fails.
    pub async fn send_processing_results(
        &self,
        results: &ObservationProcessingResults,
    ) -> CommResult<()> {
        let columns = ResultColumns::from_results(results);
        debug!(
            step = 7,
            node = %self.node_id(),
            inputs = columns.len(),
            channels = columns.used_channels.len(),
            "sending processing results"
        );

        let transport = self.context.transport();
        let count = (columns.len() as u32).to_le_bytes();
        transport.gather(ROOT, &count, None).await?;
        transport
            .gatherv(ROOT, &wire::encode_words(&columns.antenna_inputs), None)
            .await?;
        transport.gatherv(ROOT, &columns.successes, None).await?;
        transport
            .gatherv(ROOT, &wire::encode_words(&columns.used_channel_counts), None)
            .await?;
        transport
            .gatherv(ROOT, &wire::encode_words(&columns.used_channels), None)
            .await?;
        Ok(())
    }
}

impl InternodeCommunicator for SecondaryNodeCommunicator {
    fn context(&self) -> &Arc<CommunicationContext> {
        &self.context
    }
}
