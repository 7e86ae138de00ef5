//! Test harness: run one task per node over a local cluster.

use crate::context::CommunicationContext;
use crate::local::{LocalCluster, LocalClusterConfig};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Run `node` on every node of a fresh cluster, shut every context down and
/// return the outputs ordered by node ID.
pub(crate) async fn run_cluster<F, Fut, T>(node_count: u32, node: F) -> Vec<T>
where
    F: Fn(Arc<CommunicationContext>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let cluster = LocalCluster::new(LocalClusterConfig::new(node_count)).unwrap();
    let handles = cluster.into_endpoints().into_iter().map(|endpoint| {
        let node = node.clone();
        tokio::spawn(async move {
            let context = CommunicationContext::initialise(endpoint).unwrap();
            let output = node(Arc::clone(&context)).await;
            context.shutdown().await.unwrap();
            output
        })
    });

    tokio::time::timeout(Duration::from_secs(30), join_all(handles))
        .await
        .expect("cluster deadlocked")
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect()
}
