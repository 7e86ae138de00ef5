//! Per-node drivers for one observation run.
//!
//! [`run_primary`] and [`run_secondary`] walk through the protocol steps in
//! the same order, so every node must call exactly one of them.

use crate::collab::{AbortSignal, AntennaInputProcessor, MetadataSource, ProcessingJob};
use crate::config::NodeOptions;
use crate::error::{RuntimeError, RuntimeResult};
use crate::summary::{RunSummary, SecondaryReport};
use antfold_comm::wire::encode_app_config_payload;
use antfold_comm::{InternodeCommunicator, PrimaryNodeCommunicator, SecondaryNodeCommunicator};
use antfold_core::{
    AntennaConfig, AntennaInputProcessingResults, AntennaInputRange, AppConfig, ChannelRemapping,
    NodeId, ObservationProcessingResults, assign_node_antenna_inputs, compute_channel_remapping,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Spread `input_count` antenna inputs over the `ready` secondaries
///
/// Every secondary of the cluster gets an entry; nodes not in `ready` get
/// `None`.
///
/// No ready nodes or no inputs yields a plan without work.
///
/// # Errors
///
/// Propagates assigner errors.
pub fn plan_assignments(
    node_count: u32,
    ready: &[NodeId],
    input_count: u32,
) -> RuntimeResult<BTreeMap<NodeId, Option<AntennaInputRange>>> {
    let mut plan: BTreeMap<NodeId, Option<AntennaInputRange>> =
        NodeId::secondaries(node_count).map(|node| (node, None)).collect();
    if ready.is_empty() || input_count == 0 {
        return Ok(plan);
    }

    let ranges = assign_node_antenna_inputs(ready.len() as u32, input_count)?;
    for (&node, range) in ready.iter().zip(ranges) {
        plan.insert(node, range);
    }
    Ok(plan)
}

async fn load_plan(
    app: &AppConfig,
    metadata: &dyn MetadataSource,
    options: &NodeOptions,
) -> RuntimeResult<(AntennaConfig, ChannelRemapping)> {
    // Paths must be sendable before any node is told to start.
    encode_app_config_payload(app).map_err(|e| RuntimeError::Startup(e.to_string()))?;
    let antenna = metadata
        .antenna_config(app)
        .await
        .map_err(|e| RuntimeError::Startup(format!("{:#}", e)))?;
    let remapping = compute_channel_remapping(options.sampling_freq, &antenna.frequency_channels)
        .map_err(|e| RuntimeError::Startup(e.to_string()))?;
    Ok((antenna, remapping))
}

/// Drive the primary node through a run
///
/// If the antenna configuration cannot be loaded or remapped, a failed
/// startup status is broadcast and every node stops after step 1.
///
/// # Errors
///
/// Returns [`RuntimeError::Startup`] after a failed startup, or the first
/// communication failure.
pub async fn run_primary(
    primary: &PrimaryNodeCommunicator,
    app: &AppConfig,
    metadata: &dyn MetadataSource,
    options: &NodeOptions,
) -> RuntimeResult<RunSummary> {
    info!(
        observation_id = app.observation_id,
        signal_start_time = app.signal_start_time,
        nodes = primary.node_count(),
        "starting observation run"
    );

    let (antenna, remapping) = match load_plan(app, metadata, options).await {
        Ok(plan) => plan,
        Err(err) => {
            error!(error = %err, "startup failed, stopping all nodes");
            primary.send_app_startup_status(false).await?;
            return Err(err);
        }
    };
    primary.send_app_startup_status(true).await?;

    let setup = primary.receive_node_setup_status().await?;
    let ready: Vec<NodeId> = setup
        .iter()
        .filter_map(|(&node, &ok)| ok.then_some(node))
        .collect();
    let failed_setup: Vec<NodeId> = setup
        .iter()
        .filter_map(|(&node, &ok)| (!ok).then_some(node))
        .collect();
    if !failed_setup.is_empty() {
        warn!(nodes = ?failed_setup, "secondaries failed setup and get no work");
    }

    primary.send_app_config(app).await?;
    primary.send_antenna_config(&antenna).await?;
    primary.send_channel_remapping(&remapping).await?;
    info!(
        inputs = antenna.antenna_inputs.len(),
        channels = antenna.frequency_channels.len(),
        new_sampling_freq = remapping.new_sampling_freq,
        "configuration distributed"
    );

    let assignments = plan_assignments(
        primary.node_count(),
        &ready,
        antenna.antenna_inputs.len() as u32,
    )?;
    if ready.is_empty() && !antenna.antenna_inputs.is_empty() {
        warn!("no secondary is ready, nothing will be processed");
    }
    for (&node, &assignment) in &assignments {
        primary
            .send_antenna_input_assignment(node, assignment)
            .await?;
    }

    let results = primary.receive_processing_results().await?;
    let summary = RunSummary {
        observation_id: app.observation_id,
        signal_start_time: app.signal_start_time,
        node_count: primary.node_count(),
        new_sampling_freq: remapping.new_sampling_freq,
        antenna_input_count: antenna.antenna_inputs.len(),
        failed_setup,
        assignments,
        results,
        distributed_error: primary.error_status(),
    };
    info!(
        processed = summary.processed_inputs(),
        succeeded = summary.successful_inputs(),
        "results collected"
    );
    Ok(summary)
}

/// Drive a secondary node through a run
///
/// # Errors
///
/// Returns the first communication failure. Collaborator failures are
/// reported through the protocol instead.
pub async fn run_secondary(
    secondary: &SecondaryNodeCommunicator,
    processor: &dyn AntennaInputProcessor,
) -> RuntimeResult<SecondaryReport> {
    let node = secondary.node_id();
    let mut report = SecondaryReport::default();

    report.started = secondary.receive_app_startup_status().await?;
    if !report.started {
        info!(%node, "primary failed startup, stopping");
        return Ok(report);
    }

    report.prepared = match processor.prepare(node).await {
        Ok(()) => true,
        Err(e) => {
            let reason = format!("{:#}", e);
            warn!(%node, error = %reason, "setup failed");
            false
        }
    };
    secondary.send_node_setup_status(report.prepared).await?;

    let app = secondary.receive_app_config().await?;
    let antenna = secondary.receive_antenna_config().await?;
    let remapping = secondary.receive_channel_remapping().await?;
    report.assignment = secondary.receive_antenna_input_assignment().await?;

    let results = match report.assignment {
        Some(assignment) if report.prepared => {
            let job = ProcessingJob {
                node,
                app: &app,
                antenna: &antenna,
                remapping: &remapping,
                assignment,
            };
            process(secondary, processor, job).await?
        }
        Some(assignment) => {
            warn!(%node, ?assignment, "ignoring assignment to a node that failed setup");
            ObservationProcessingResults::new()
        }
        None => {
            debug!(%node, "no work assigned");
            ObservationProcessingResults::new()
        }
    };

    report.processed = results.len();
    report.succeeded = results.success_count();
    secondary.send_processing_results(&results).await?;
    Ok(report)
}

async fn process(
    secondary: &SecondaryNodeCommunicator,
    processor: &dyn AntennaInputProcessor,
    job: ProcessingJob<'_>,
) -> RuntimeResult<ObservationProcessingResults> {
    let abort = AbortSignal::from_context(Arc::clone(secondary.context()));
    debug!(node = %job.node, assignment = ?job.assignment, "processing");

    match processor.process(job, &abort).await {
        Ok(results) => Ok(results),
        Err(e) => {
            let reason = format!("{:#}", e);
            error!(node = %job.node, error = %reason, "processing failed");
            if !job.app.ignore_errors {
                secondary.indicate_error().await?;
            }
            Ok(job
                .assignment
                .iter()
                .map(|input| (input, AntennaInputProcessingResults::failed()))
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plan_skips_unready_nodes() {
        let plan = plan_assignments(4, &[NodeId::new(1), NodeId::new(3)], 10).unwrap();
        assert_eq!(
            plan.into_iter().collect::<Vec<_>>(),
            vec![
                (NodeId::new(1), Some(AntennaInputRange::new(0, 4))),
                (NodeId::new(2), None),
                (NodeId::new(3), Some(AntennaInputRange::new(5, 9))),
            ]
        );
    }

    #[test]
    fn test_plan_without_work() {
        let plan = plan_assignments(3, &[], 10).unwrap();
        assert!(plan.values().all(Option::is_none));

        let plan = plan_assignments(3, &[NodeId::new(1)], 0).unwrap();
        assert!(plan.values().all(Option::is_none));

        assert!(plan_assignments(1, &[], 10).unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn prop_plan_covers_every_input_once(
            node_count in 2u32..16,
            ready_mask in any::<u16>(),
            input_count in 1u32..300,
        ) {
            let ready: Vec<NodeId> = NodeId::secondaries(node_count)
                .filter(|node| ready_mask & (1 << node.rank()) != 0)
                .collect();
            let plan = plan_assignments(node_count, &ready, input_count).unwrap();
            prop_assert_eq!(plan.len(), node_count as usize - 1);

            let mut covered = vec![0u32; input_count as usize];
            for (node, range) in &plan {
                if let Some(range) = range {
                    prop_assert!(ready.contains(node));
                    for input in range.iter() {
                        covered[input as usize] += 1;
                    }
                }
            }
            let expected = u32::from(!ready.is_empty());
            prop_assert!(covered.iter().all(|&c| c == expected));
        }
    }
}
