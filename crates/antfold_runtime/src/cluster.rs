//! Whole-cluster runs in one process.

use crate::collab::{AntennaInputProcessor, MetadataSource};
use crate::config::NodeOptions;
use crate::error::{RuntimeError, RuntimeResult};
use crate::node::{run_primary, run_secondary};
use crate::summary::{RunSummary, SecondaryReport};
use antfold_comm::{CommunicationContext, Communicator, LocalCluster, LocalClusterConfig};
use antfold_core::AppConfig;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::sync::Arc;
use tracing::{error, info, instrument};

enum NodeOutcome {
    Primary(RuntimeResult<RunSummary>),
    Secondary(RuntimeResult<SecondaryReport>),
}

async fn run_node(
    context: Arc<CommunicationContext>,
    app: Arc<AppConfig>,
    metadata: Arc<dyn MetadataSource>,
    processor: Arc<dyn AntennaInputProcessor>,
    options: NodeOptions,
) -> RuntimeResult<NodeOutcome> {
    let outcome = match context.communicator()? {
        Communicator::Primary(primary) => {
            NodeOutcome::Primary(run_primary(&primary, &app, metadata.as_ref(), &options).await)
        }
        Communicator::Secondary(secondary) => {
            NodeOutcome::Secondary(run_secondary(&secondary, processor.as_ref()).await)
        }
    };

    let stranded = match &outcome {
        NodeOutcome::Primary(Err(e)) | NodeOutcome::Secondary(Err(e)) => strands_peers(e),
        _ => false,
    };
    if !stranded {
        context.shutdown().await?;
    }

    // The listener has drained every error message once shutdown returns.
    Ok(match outcome {
        NodeOutcome::Primary(Ok(mut summary)) => {
            summary.distributed_error = context.error_status();
            NodeOutcome::Primary(Ok(summary))
        }
        other => other,
    })
}

/// Whether a node failing with `err` leaves its peers waiting mid-protocol
///
/// Only a failed startup is announced to every node; any later failure stops
/// one node between collectives.
fn strands_peers(err: &RuntimeError) -> bool {
    !matches!(err, RuntimeError::Startup(_))
}

/// Run one observation over an in-process cluster
///
/// Every node runs as its own task. Returns the primary's summary once every
/// node has shut down. A node failing after startup aborts every other node.
///
/// # Errors
///
/// Returns the primary's error if it failed, otherwise the first secondary
/// error.
#[instrument(skip_all, fields(nodes = config.node_count, observation_id = app.observation_id))]
pub async fn run_local_cluster(
    config: LocalClusterConfig,
    app: AppConfig,
    metadata: Arc<dyn MetadataSource>,
    processor: Arc<dyn AntennaInputProcessor>,
    options: NodeOptions,
) -> RuntimeResult<RunSummary> {
    let cluster = LocalCluster::new(config).map_err(antfold_comm::CommError::from)?;
    let app = Arc::new(app);

    let handles: Vec<_> = cluster
        .into_endpoints()
        .into_iter()
        .map(|endpoint| {
            let app = Arc::clone(&app);
            let metadata = Arc::clone(&metadata);
            let processor = Arc::clone(&processor);
            tokio::spawn(async move {
                let context = CommunicationContext::initialise(endpoint)?;
                run_node(context, app, metadata, processor, options).await
            })
        })
        .collect();
    let aborts: Vec<_> = handles.iter().map(|handle| handle.abort_handle()).collect();
    let mut pending: FuturesUnordered<_> = handles
        .into_iter()
        .enumerate()
        .map(|(rank, handle)| async move { (rank as u32, handle.await) })
        .collect();

    let mut summary = None;
    let mut first_error = None;
    while let Some((rank, joined)) = pending.next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => continue,
            Err(e) => Err(RuntimeError::NodeFailed {
                node: rank,
                reason: e.to_string(),
            }),
        };
        let stranded = match outcome {
            Ok(NodeOutcome::Primary(Ok(result))) => {
                summary = Some(Ok(result));
                continue;
            }
            Ok(NodeOutcome::Secondary(Ok(report))) => {
                info!(node = rank, ?report, "secondary finished");
                continue;
            }
            Ok(NodeOutcome::Primary(Err(e))) => {
                let stranded = strands_peers(&e);
                summary = Some(Err(e));
                stranded
            }
            Ok(NodeOutcome::Secondary(Err(e))) | Err(e) => {
                let stranded = strands_peers(&e);
                first_error.get_or_insert(e);
                stranded
            }
        };
        if stranded {
            error!(node = rank, "node failed mid-run, stopping the cluster");
            aborts.iter().for_each(|abort| abort.abort());
        }
    }

    match (summary, first_error) {
        (Some(Err(e)), _) => Err(e),
        (_, Some(e)) => Err(e),
        (Some(Ok(summary)), None) => Ok(summary),
        (None, None) => Err(RuntimeError::NodeFailed {
            node: 0,
            reason: "primary produced no summary".to_string(),
        }),
    }
}
