//! Primary node side of the observation protocol.
//!
//! Each method pairs with one method of
//! [`SecondaryNodeCommunicator`](crate::secondary::SecondaryNodeCommunicator),
//! and both sides must make the calls in the same order:
//!
//! 1. [`send_app_startup_status`](PrimaryNodeCommunicator::send_app_startup_status)
//! 2. [`receive_node_setup_status`](PrimaryNodeCommunicator::receive_node_setup_status)
//! 3. [`send_app_config`](PrimaryNodeCommunicator::send_app_config)
//! 4. [`send_antenna_config`](PrimaryNodeCommunicator::send_antenna_config)
//! 5. [`send_channel_remapping`](PrimaryNodeCommunicator::send_channel_remapping)
//! 6. [`send_antenna_input_assignment`](PrimaryNodeCommunicator::send_antenna_input_assignment),
//!    once per secondary
//! 7. [`receive_processing_results`](PrimaryNodeCommunicator::receive_processing_results)

use crate::communicator::InternodeCommunicator;
use crate::context::CommunicationContext;
use crate::error::{CommError, CommResult};
use crate::transport::{GatherLayout, displacements};
use crate::wire::{
    self, AntennaConfigHeader, AppConfigHeader, RemappingHeader, ResultColumns, WORD_LEN,
};
use antfold_core::{
    AntennaConfig, AntennaInputRange, AppConfig, ChannelRemapping, CoreError, NodeId,
    ObservationProcessingResults,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Root of every collective in the protocol
pub(crate) const ROOT: u32 = NodeId::PRIMARY.rank();

/// Tag of assignment messages on the world transport
pub(crate) const ASSIGNMENT_TAG: u32 = 0;

/// Communicator for node 0
#[derive(Debug, Clone)]
pub struct PrimaryNodeCommunicator {
    context: Arc<CommunicationContext>,
}

impl PrimaryNodeCommunicator {
    /// Create a primary communicator
    ///
    /// # Errors
    ///
    /// Returns [`CommError::ProtocolMisuse`] on any node other than 0.
    pub fn new(context: Arc<CommunicationContext>) -> CommResult<Self> {
        if !context.node_id().is_primary() {
            return Err(CommError::misuse(format!(
                "primary communicator used on {}",
                context.node_id()
            )));
        }
        Ok(Self { context })
    }

    /// Step 1: tell every secondary whether startup succeeded
    ///
    /// # Errors
    ///
    /// Fails if the transport fails.
    pub async fn send_app_startup_status(&self, status: bool) -> CommResult<()> {
        debug!(step = 1, status, "sending startup status");
        let mut buffer = [wire::encode_bool(status)];
        self.context.transport().broadcast(ROOT, &mut buffer).await?;
        Ok(())
    }

    /// Step 2: collect every secondary's setup status
    ///
    /// # Errors
    ///
    /// Fails if the transport fails.
    pub async fn receive_node_setup_status(&self) -> CommResult<BTreeMap<NodeId, bool>> {
        let node_count = self.node_count();
        let mut statuses = vec![0u8; node_count as usize];
        // The root's own contribution is discarded.
        let root_status = [wire::encode_bool(true)];
        self.context
            .transport()
            .gather(ROOT, &root_status, Some(statuses.as_mut_slice()))
            .await?;

        let statuses: BTreeMap<NodeId, bool> = NodeId::secondaries(node_count)
            .map(|node| (node, wire::decode_bool(statuses[node.index()])))
            .collect();
        debug!(
            step = 2,
            ready = statuses.values().filter(|&&ok| ok).count(),
            "received setup status"
        );
        Ok(statuses)
    }

    /// Step 3: broadcast the app config
    ///
    /// # Errors
    ///
    /// Fails with a configuration error, before any transfer, if a path is
    /// not valid UTF-8. Fails if the transport fails.
    pub async fn send_app_config(&self, config: &AppConfig) -> CommResult<()> {
        let header = AppConfigHeader::for_config(config)?;
        let mut payload = wire::encode_app_config_payload(config)?;
        debug!(step = 3, payload_len = payload.len(), "sending app config");

        let transport = self.context.transport();
        transport.broadcast(ROOT, &mut header.encode()).await?;
        transport.broadcast(ROOT, &mut payload).await?;
        Ok(())
    }

    /// Step 4: broadcast the antenna config
    ///
    /// # Errors
    ///
    /// Fails if the transport fails.
    pub async fn send_antenna_config(&self, config: &AntennaConfig) -> CommResult<()> {
        let header = AntennaConfigHeader::for_config(config);
        let mut payload = wire::encode_antenna_config_payload(config);
        debug!(
            step = 4,
            inputs = header.input_count,
            channels = header.channel_count,
            "sending antenna config"
        );

        let transport = self.context.transport();
        transport.broadcast(ROOT, &mut header.encode()).await?;
        transport.broadcast(ROOT, &mut payload).await?;
        Ok(())
    }

    /// Step 5: broadcast the channel remapping
    ///
    /// # Errors
    ///
    /// Fails if the transport fails.
    pub async fn send_channel_remapping(&self, remapping: &ChannelRemapping) -> CommResult<()> {
        let header = RemappingHeader::for_remapping(remapping);
        let mut payload = wire::encode_remapping_payload(remapping);
        debug!(
            step = 5,
            new_sampling_freq = header.new_sampling_freq,
            channels = header.map_len,
            "sending channel remapping"
        );

        let transport = self.context.transport();
        transport.broadcast(ROOT, &mut header.encode()).await?;
        transport.broadcast(ROOT, &mut payload).await?;
        Ok(())
    }

    /// Step 6: send one secondary its antenna input assignment
    ///
    /// # Errors
    ///
    /// Fails with a configuration error, before any transfer, if `node` is
    /// the primary or outside the cluster. Fails if the transport fails.
    pub async fn send_antenna_input_assignment(
        &self,
        node: NodeId,
        assignment: Option<AntennaInputRange>,
    ) -> CommResult<()> {
        if node.is_primary() {
            return Err(CoreError::invalid_argument("node", "must not be the primary node").into());
        }
        if node.rank() >= self.node_count() {
            return Err(CoreError::invalid_argument(
                "node",
                format!("{} is outside a cluster of {} nodes", node, self.node_count()),
            )
            .into());
        }

        debug!(step = 6, %node, ?assignment, "sending assignment");
        self.context
            .transport()
            .send(node.rank(), ASSIGNMENT_TAG, &wire::encode_assignment(assignment))
            .await?;
        Ok(())
    }

    /// Step 7: collect every secondary's processing results
    ///
    /// Five chained gathers: antenna input counts, then antenna inputs,
    /// success bytes and used channel counts sized by those, then the used
    /// channels sized by each node's channel total.
    ///
    /// # Errors
    ///
    /// Fails if the transport fails or the columns are inconsistent.
    pub async fn receive_processing_results(
        &self,
    ) -> CommResult<BTreeMap<NodeId, ObservationProcessingResults>> {
        let transport = self.context.transport();
        let node_count = self.node_count() as usize;

        let mut count_bytes = vec![0u8; node_count * WORD_LEN];
        let root_count = 0u32.to_le_bytes();
        transport
            .gather(ROOT, &root_count, Some(count_bytes.as_mut_slice()))
            .await?;
        let input_counts: Vec<usize> = wire::decode_words(&count_bytes)?
            .into_iter()
            .map(|count| count as usize)
            .collect();
        let total_inputs: usize = input_counts.iter().sum();
        let input_offsets = displacements(&input_counts);
        let word_counts: Vec<usize> = input_counts.iter().map(|c| c * WORD_LEN).collect();
        let word_offsets = displacements(&word_counts);
        debug!(step = 7, total_inputs, "receiving processing results");

        let mut input_bytes = vec![0u8; total_inputs * WORD_LEN];
        let layout = GatherLayout::new(&mut input_bytes, &word_counts, &word_offsets);
        transport.gatherv(ROOT, &[], Some(layout)).await?;

        let mut successes = vec![0u8; total_inputs];
        let layout = GatherLayout::new(&mut successes, &input_counts, &input_offsets);
        transport.gatherv(ROOT, &[], Some(layout)).await?;

        let mut used_count_bytes = vec![0u8; total_inputs * WORD_LEN];
        let layout = GatherLayout::new(&mut used_count_bytes, &word_counts, &word_offsets);
        transport.gatherv(ROOT, &[], Some(layout)).await?;

        let antenna_inputs = wire::decode_words(&input_bytes)?;
        let used_channel_counts = wire::decode_words(&used_count_bytes)?;
        let channel_counts: Vec<usize> = (0..node_count)
            .map(|node| {
                let start = input_offsets[node];
                used_channel_counts[start..start + input_counts[node]]
                    .iter()
                    .map(|&count| count as usize)
                    .sum()
            })
            .collect();
        let channel_offsets = displacements(&channel_counts);
        let channel_word_counts: Vec<usize> =
            channel_counts.iter().map(|c| c * WORD_LEN).collect();
        let channel_word_offsets = displacements(&channel_word_counts);
        let total_channels: usize = channel_counts.iter().sum();

        let mut channel_bytes = vec![0u8; total_channels * WORD_LEN];
        let layout = GatherLayout::new(
            &mut channel_bytes,
            &channel_word_counts,
            &channel_word_offsets,
        );
        transport.gatherv(ROOT, &[], Some(layout)).await?;
        let used_channels = wire::decode_words(&channel_bytes)?;

        NodeId::secondaries(node_count as u32)
            .map(|node| {
                let i = node.index();
                let inputs = input_offsets[i]..input_offsets[i] + input_counts[i];
                let channels = channel_offsets[i]..channel_offsets[i] + channel_counts[i];
                let columns = ResultColumns {
                    antenna_inputs: antenna_inputs[inputs.clone()].to_vec(),
                    successes: successes[inputs.clone()].to_vec(),
                    used_channel_counts: used_channel_counts[inputs].to_vec(),
                    used_channels: used_channels[channels].to_vec(),
                };
                Ok((node, columns.into_results()?))
            })
            .collect()
    }
}

impl InternodeCommunicator for PrimaryNodeCommunicator {
    fn context(&self) -> &Arc<CommunicationContext> {
        &self.context
    }
}
