//! In-process cluster transport.
//!
//! Every simulated node gets a [`LocalEndpoint`]. Endpoints exchange messages
//! through per-rank mailboxes; receivers match on `(source, tag)` the way a
//! message-passing library does, so unrelated messages wait in the mailbox
//! until someone asks for them. Sends never block. Collectives are built from
//! point-to-point messages under reserved tags, rooted at the root rank.

use crate::transport::{
    GatherLayout, Status, ThreadSupport, Transport, TransportError, TransportResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use tracing::trace;

/// Local cluster configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalClusterConfig {
    /// Number of simulated nodes
    pub node_count: u32,
    /// Thread support reported by every endpoint
    pub thread_support: ThreadSupport,
}

impl LocalClusterConfig {
    /// Create a new config
    #[must_use]
    pub fn new(node_count: u32) -> Self {
        Self {
            node_count,
            thread_support: ThreadSupport::Multiple,
        }
    }

    /// Set the thread support level endpoints report
    #[must_use]
    pub fn with_thread_support(mut self, thread_support: ThreadSupport) -> Self {
        self.thread_support = thread_support;
        self
    }
}

impl Default for LocalClusterConfig {
    fn default() -> Self {
        Self::new(4)
    }
}

/// Message kind; user tags never collide with collective traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    User(u32),
    Barrier,
    Release,
    Broadcast,
    Gather,
}

#[derive(Debug)]
struct Envelope {
    source: u32,
    tag: Tag,
    payload: Bytes,
}

#[derive(Debug, Default)]
struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    arrived: Notify,
}

impl Mailbox {
    fn deliver(&self, envelope: Envelope) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(envelope);
        self.arrived.notify_waiters();
    }

    fn try_take(&self, source: Option<u32>, tag: Tag) -> Option<Envelope> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let position = queue
            .iter()
            .position(|e| e.tag == tag && source.is_none_or(|s| s == e.source))?;
        queue.remove(position)
    }

    async fn take(&self, source: Option<u32>, tag: Tag) -> Envelope {
        loop {
            let arrived = self.arrived.notified();
            tokio::pin!(arrived);
            // Register before checking so a delivery in between still wakes us.
            arrived.as_mut().enable();
            if let Some(envelope) = self.try_take(source, tag) {
                return envelope;
            }
            arrived.await;
        }
    }
}

/// Mailboxes of every rank for one channel
#[derive(Debug)]
struct Channel {
    mailboxes: Vec<Mailbox>,
}

impl Channel {
    fn new(size: u32) -> Self {
        Self {
            mailboxes: (0..size).map(|_| Mailbox::default()).collect(),
        }
    }
}

/// Shared by every endpoint of a cluster
///
/// Channels stay registered until every rank has finalized; endpoints keep
/// their own handle to the channel they talk on.
#[derive(Debug)]
struct Hub {
    size: u32,
    channels: Mutex<HashMap<u32, Arc<Channel>>>,
    finalized: AtomicU32,
}

impl Hub {
    fn channel(&self, id: u32) -> Arc<Channel> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            channels
                .entry(id)
                .or_insert_with(|| Arc::new(Channel::new(self.size))),
        )
    }

    #[cfg(test)]
    fn registered_channels(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Record one rank finalizing; the last one releases every channel
    fn rank_finalized(&self) {
        if self.finalized.fetch_add(1, Ordering::AcqRel) + 1 == self.size {
            let released = std::mem::take(
                &mut *self.channels.lock().unwrap_or_else(PoisonError::into_inner),
            );
            trace!(channels = released.len(), "every rank finalized, channels released");
        }
    }
}

/// Per-process state, shared by an endpoint and its duplicates
#[derive(Debug)]
struct ProcessState {
    thread_support: ThreadSupport,
    initialised: AtomicBool,
    finalized: AtomicBool,
    next_channel: AtomicU32,
}

/// A cluster of endpoints living in one process
#[derive(Debug)]
pub struct LocalCluster {
    endpoints: Vec<Arc<LocalEndpoint>>,
}

impl LocalCluster {
    /// Build a cluster
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::EmptyCluster`] for a node count of zero.
    pub fn new(config: LocalClusterConfig) -> TransportResult<Self> {
        if config.node_count == 0 {
            return Err(TransportError::EmptyCluster);
        }
        let hub = Arc::new(Hub {
            size: config.node_count,
            channels: Mutex::new(HashMap::new()),
            finalized: AtomicU32::new(0),
        });
        let world = hub.channel(0);
        let endpoints = (0..config.node_count)
            .map(|rank| {
                Arc::new(LocalEndpoint {
                    rank,
                    channel_id: 0,
                    hub: Arc::clone(&hub),
                    channel: Arc::clone(&world),
                    process: Arc::new(ProcessState {
                        thread_support: config.thread_support,
                        initialised: AtomicBool::new(false),
                        finalized: AtomicBool::new(false),
                        next_channel: AtomicU32::new(1),
                    }),
                })
            })
            .collect();
        Ok(Self { endpoints })
    }

    /// Number of nodes
    #[must_use]
    pub fn node_count(&self) -> u32 {
        self.endpoints.len() as u32
    }

    /// Endpoints ordered by rank
    #[must_use]
    pub fn endpoints(&self) -> &[Arc<LocalEndpoint>] {
        &self.endpoints
    }

    /// Take the endpoints, ordered by rank
    #[must_use]
    pub fn into_endpoints(self) -> Vec<Arc<LocalEndpoint>> {
        self.endpoints
    }
}

/// One node's view of a [`LocalCluster`] channel
#[derive(Debug)]
pub struct LocalEndpoint {
    rank: u32,
    channel_id: u32,
    hub: Arc<Hub>,
    channel: Arc<Channel>,
    process: Arc<ProcessState>,
}

impl LocalEndpoint {
    fn ensure_active(&self) -> TransportResult<()> {
        if !self.process.initialised.load(Ordering::Acquire) {
            return Err(TransportError::NotInitialised);
        }
        if self.process.finalized.load(Ordering::Acquire) {
            return Err(TransportError::Finalized);
        }
        Ok(())
    }

    fn check_rank(&self, rank: u32) -> TransportResult<()> {
        if rank >= self.hub.size {
            return Err(TransportError::InvalidRank {
                rank,
                size: self.hub.size,
            });
        }
        Ok(())
    }

    fn post(&self, dest: u32, tag: Tag, payload: Bytes) {
        trace!(
            channel = self.channel_id,
            from = self.rank,
            to = dest,
            ?tag,
            len = payload.len(),
            "post"
        );
        self.channel.mailboxes[dest as usize].deliver(Envelope {
            source: self.rank,
            tag,
            payload,
        });
    }

    async fn take(&self, source: Option<u32>, tag: Tag) -> Envelope {
        self.channel.mailboxes[self.rank as usize]
            .take(source, tag)
            .await
    }

    fn others(&self, root: u32) -> impl Iterator<Item = u32> + use<> {
        (0..self.hub.size).filter(move |&rank| rank != root)
    }
}

#[async_trait]
impl Transport for LocalEndpoint {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.hub.size
    }

    fn initialise(&self, _required: ThreadSupport) -> TransportResult<ThreadSupport> {
        if self.process.initialised.swap(true, Ordering::AcqRel) {
            return Err(TransportError::AlreadyInitialised);
        }
        Ok(self.process.thread_support)
    }

    async fn barrier(&self) -> TransportResult<()> {
        self.ensure_active()?;
        if self.rank == 0 {
            for source in self.others(0) {
                self.take(Some(source), Tag::Barrier).await;
            }
            for dest in self.others(0) {
                self.post(dest, Tag::Release, Bytes::new());
            }
        } else {
            self.post(0, Tag::Barrier, Bytes::new());
            self.take(Some(0), Tag::Release).await;
        }
        Ok(())
    }

    async fn broadcast(&self, root: u32, buffer: &mut [u8]) -> TransportResult<()> {
        self.ensure_active()?;
        self.check_rank(root)?;
        if self.rank == root {
            let payload = Bytes::copy_from_slice(buffer);
            for dest in self.others(root) {
                self.post(dest, Tag::Broadcast, payload.clone());
            }
            return Ok(());
        }

        let envelope = self.take(Some(root), Tag::Broadcast).await;
        if envelope.payload.len() != buffer.len() {
            return Err(TransportError::SizeMismatch {
                operation: "broadcast",
                expected: buffer.len(),
                actual: envelope.payload.len(),
            });
        }
        buffer.copy_from_slice(&envelope.payload);
        Ok(())
    }

    async fn gather(
        &self,
        root: u32,
        send: &[u8],
        recv: Option<&mut [u8]>,
    ) -> TransportResult<()> {
        self.ensure_active()?;
        self.check_rank(root)?;
        if self.rank != root {
            self.post(root, Tag::Gather, Bytes::copy_from_slice(send));
            return Ok(());
        }

        let block = send.len();
        let recv = recv.ok_or_else(|| {
            TransportError::InvalidLayout("root must supply a receive buffer".to_string())
        })?;
        let expected = block * self.hub.size as usize;
        if recv.len() != expected {
            return Err(TransportError::SizeMismatch {
                operation: "gather",
                expected,
                actual: recv.len(),
            });
        }

        let offset = root as usize * block;
        recv[offset..offset + block].copy_from_slice(send);
        for source in self.others(root) {
            let envelope = self.take(Some(source), Tag::Gather).await;
            if envelope.payload.len() != block {
                return Err(TransportError::SizeMismatch {
                    operation: "gather",
                    expected: block,
                    actual: envelope.payload.len(),
                });
            }
            let offset = source as usize * block;
            recv[offset..offset + block].copy_from_slice(&envelope.payload);
        }
        Ok(())
    }

    async fn gatherv(
        &self,
        root: u32,
        send: &[u8],
        recv: Option<GatherLayout<'_>>,
    ) -> TransportResult<()> {
        self.ensure_active()?;
        self.check_rank(root)?;
        if self.rank != root {
            self.post(root, Tag::Gather, Bytes::copy_from_slice(send));
            return Ok(());
        }

        let layout = recv.ok_or_else(|| {
            TransportError::InvalidLayout("root must supply a receive layout".to_string())
        })?;
        layout.validate(self.hub.size)?;
        let GatherLayout {
            buffer,
            counts,
            displacements,
        } = layout;

        let mut place = |rank: u32, block: &[u8]| -> TransportResult<()> {
            let count = counts[rank as usize];
            if block.len() != count {
                return Err(TransportError::SizeMismatch {
                    operation: "gatherv",
                    expected: count,
                    actual: block.len(),
                });
            }
            let offset = displacements[rank as usize];
            buffer[offset..offset + count].copy_from_slice(block);
            Ok(())
        };

        place(root, send)?;
        for source in self.others(root) {
            let envelope = self.take(Some(source), Tag::Gather).await;
            place(source, &envelope.payload)?;
        }
        Ok(())
    }

    async fn send(&self, dest: u32, tag: u32, data: &[u8]) -> TransportResult<()> {
        self.ensure_active()?;
        self.check_rank(dest)?;
        self.post(dest, Tag::User(tag), Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn recv(
        &self,
        source: Option<u32>,
        tag: u32,
        buffer: &mut [u8],
    ) -> TransportResult<Status> {
        self.ensure_active()?;
        if let Some(source) = source {
            self.check_rank(source)?;
        }
        let envelope = self.take(source, Tag::User(tag)).await;
        let len = envelope.payload.len();
        if len > buffer.len() {
            return Err(TransportError::Truncated {
                capacity: buffer.len(),
                actual: len,
            });
        }
        buffer[..len].copy_from_slice(&envelope.payload);
        Ok(Status {
            source: envelope.source,
            len,
        })
    }

    fn duplicate(&self) -> TransportResult<Arc<dyn Transport>> {
        self.ensure_active()?;
        let channel_id = self.process.next_channel.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(LocalEndpoint {
            rank: self.rank,
            channel_id,
            hub: Arc::clone(&self.hub),
            channel: self.hub.channel(channel_id),
            process: Arc::clone(&self.process),
        }))
    }

    async fn finalize(&self) -> TransportResult<()> {
        self.ensure_active()?;
        if !self.process.finalized.swap(true, Ordering::AcqRel) {
            self.hub.rank_finalized();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::displacements;
    use futures::future::join_all;

    fn cluster(node_count: u32) -> Vec<Arc<LocalEndpoint>> {
        let endpoints = LocalCluster::new(LocalClusterConfig::new(node_count))
            .unwrap()
            .into_endpoints();
        for endpoint in &endpoints {
            endpoint.initialise(ThreadSupport::Multiple).unwrap();
        }
        endpoints
    }

    #[test]
    fn test_empty_cluster_rejected() {
        assert!(matches!(
            LocalCluster::new(LocalClusterConfig::new(0)),
            Err(TransportError::EmptyCluster)
        ));
    }

    #[test]
    fn test_initialise_once() {
        let cluster = LocalCluster::new(
            LocalClusterConfig::new(2).with_thread_support(ThreadSupport::Funneled),
        )
        .unwrap();
        let endpoint = &cluster.endpoints()[1];
        assert_eq!(
            endpoint.initialise(ThreadSupport::Multiple),
            Ok(ThreadSupport::Funneled)
        );
        assert_eq!(
            endpoint.initialise(ThreadSupport::Multiple),
            Err(TransportError::AlreadyInitialised)
        );
        // Other ranks are separate processes.
        assert!(cluster.endpoints()[0].initialise(ThreadSupport::Multiple).is_ok());
    }

    #[tokio::test]
    async fn test_operations_require_initialisation() {
        let cluster = LocalCluster::new(LocalClusterConfig::new(1)).unwrap();
        let endpoint = &cluster.endpoints()[0];
        assert_eq!(endpoint.barrier().await, Err(TransportError::NotInitialised));

        endpoint.initialise(ThreadSupport::Multiple).unwrap();
        endpoint.barrier().await.unwrap();
        endpoint.finalize().await.unwrap();
        assert_eq!(endpoint.barrier().await, Err(TransportError::Finalized));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_broadcast() {
        let nodes = cluster(4);
        let results = join_all(nodes.into_iter().map(|node| {
            tokio::spawn(async move {
                let mut buffer = if node.rank() == 0 {
                    b"hello".to_vec()
                } else {
                    vec![0u8; 5]
                };
                node.broadcast(0, &mut buffer).await.map(|_| buffer)
            })
        }))
        .await;
        for result in results {
            assert_eq!(result.unwrap().unwrap(), b"hello");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_broadcast_size_mismatch() {
        let nodes = cluster(2);
        let root = Arc::clone(&nodes[0]);
        let leaf = Arc::clone(&nodes[1]);
        let sender = tokio::spawn(async move { root.broadcast(0, &mut [1, 2, 3]).await });
        let mut small = [0u8; 2];
        let err = leaf.broadcast(0, &mut small).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::SizeMismatch {
                operation: "broadcast",
                expected: 2,
                actual: 3
            }
        );
        sender.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_gather_orders_by_rank() {
        let nodes = cluster(4);
        let results = join_all(nodes.into_iter().map(|node| {
            tokio::spawn(async move {
                let send = [node.rank() as u8 * 10, node.rank() as u8 * 10 + 1];
                if node.rank() == 0 {
                    let mut recv = vec![0u8; 8];
                    node.gather(0, &send, Some(recv.as_mut_slice())).await.map(|_| recv)
                } else {
                    node.gather(0, &send, None).await.map(|_| Vec::new())
                }
            })
        }))
        .await;
        let gathered = results[0].as_ref().unwrap().as_ref().unwrap();
        assert_eq!(gathered, &vec![0, 1, 10, 11, 20, 21, 30, 31]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_gatherv_variable_blocks() {
        let nodes = cluster(3);
        let counts = vec![0usize, 3, 1];
        let displs = displacements(&counts);
        let results = join_all(nodes.into_iter().map(|node| {
            let counts = counts.clone();
            let displs = displs.clone();
            tokio::spawn(async move {
                match node.rank() {
                    0 => {
                        let mut buffer = vec![0u8; 4];
                        let layout = GatherLayout::new(&mut buffer, &counts, &displs);
                        node.gatherv(0, &[], Some(layout)).await.map(|_| buffer)
                    }
                    1 => node.gatherv(0, &[7, 8, 9], None).await.map(|_| Vec::new()),
                    _ => node.gatherv(0, &[5], None).await.map(|_| Vec::new()),
                }
            })
        }))
        .await;
        assert_eq!(
            results[0].as_ref().unwrap().as_ref().unwrap(),
            &vec![7, 8, 9, 5]
        );
    }

    #[tokio::test]
    async fn test_point_to_point_matching() {
        let nodes = cluster(3);
        nodes[1].send(0, 7, b"seven").await.unwrap();
        nodes[2].send(0, 3, b"three").await.unwrap();

        let mut buffer = [0u8; 16];
        let status = nodes[0].recv(None, 3, &mut buffer).await.unwrap();
        assert_eq!(status, Status { source: 2, len: 5 });
        assert_eq!(&buffer[..5], b"three");

        let status = nodes[0].recv(Some(1), 7, &mut buffer).await.unwrap();
        assert_eq!(status.source, 1);
        assert_eq!(&buffer[..status.len], b"seven");
    }

    #[tokio::test]
    async fn test_recv_truncation() {
        let nodes = cluster(2);
        nodes[1].send(0, 0, &[1, 2, 3, 4]).await.unwrap();
        let mut buffer = [0u8; 2];
        assert_eq!(
            nodes[0].recv(Some(1), 0, &mut buffer).await,
            Err(TransportError::Truncated {
                capacity: 2,
                actual: 4
            })
        );
    }

    #[tokio::test]
    async fn test_invalid_rank() {
        let nodes = cluster(2);
        assert_eq!(
            nodes[0].send(5, 0, &[]).await,
            Err(TransportError::InvalidRank { rank: 5, size: 2 })
        );
    }

    #[tokio::test]
    async fn test_duplicate_channels_are_isolated() {
        let nodes = cluster(2);
        let private0 = nodes[0].duplicate().unwrap();
        let private1 = nodes[1].duplicate().unwrap();

        nodes[1].send(0, 0, b"world").await.unwrap();
        private1.send(0, 0, b"private").await.unwrap();

        let mut buffer = [0u8; 16];
        let status = private0.recv(Some(1), 0, &mut buffer).await.unwrap();
        assert_eq!(&buffer[..status.len], b"private");
        let status = nodes[0].recv(Some(1), 0, &mut buffer).await.unwrap();
        assert_eq!(&buffer[..status.len], b"world");
    }

    #[tokio::test]
    async fn test_channels_released_after_last_finalize() {
        let nodes = cluster(3);
        let duplicates: Vec<_> = nodes
            .iter()
            .map(|node| node.duplicate().unwrap())
            .collect();
        let hub = Arc::clone(&nodes[0].hub);
        assert_eq!(hub.registered_channels(), 2);

        nodes[0].finalize().await.unwrap();
        assert_eq!(duplicates[0].finalize().await, Err(TransportError::Finalized));
        nodes[1].finalize().await.unwrap();
        assert_eq!(hub.registered_channels(), 2);

        duplicates[2].finalize().await.unwrap();
        assert_eq!(hub.registered_channels(), 0);
        assert_eq!(nodes[2].send(0, 0, &[]).await, Err(TransportError::Finalized));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_repeated_barriers() {
        let nodes = cluster(4);
        let results = join_all(nodes.into_iter().map(|node| {
            tokio::spawn(async move {
                for _ in 0..50 {
                    node.barrier().await?;
                }
                Ok::<_, TransportError>(())
            })
        }))
        .await;
        for result in results {
            result.unwrap().unwrap();
        }
    }
}
