//! Asynchronous cluster-wide error flag.
//!
//! Each node holds one flag that only ever goes from false to true. Raising it
//! sends a message to every other node on a private channel, where a listener
//! task sets their flags in turn. Nothing waits for acknowledgement, so a
//! remote node sees the error eventually rather than at a synchronization
//! point.

use crate::transport::{Transport, TransportError, TransportResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Tag used for every message on the error channel
pub const ERROR_TAG: u32 = 0;

/// Messages understood by the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum Message {
    ErrorOccurred = 0,
    ExitThread = 1,
}

impl Message {
    fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::ErrorOccurred),
            1 => Some(Self::ExitThread),
            _ => None,
        }
    }

    fn encode(self) -> [u8; 4] {
        (self as u32).to_le_bytes()
    }
}

/// Set-once error flag shared across the cluster
pub struct ErrorCommunicator {
    channel: Arc<dyn Transport>,
    status: Arc<AtomicBool>,
    listener: Mutex<Option<JoinHandle<TransportResult<()>>>>,
}

impl ErrorCommunicator {
    /// Open a private channel and start the listener
    ///
    /// Must be called from within a tokio runtime, on every node, in the same
    /// order relative to other channel duplications.
    ///
    /// # Errors
    ///
    /// Fails if the private channel cannot be opened.
    pub fn start(world: &dyn Transport) -> TransportResult<Self> {
        let channel = world.duplicate()?;
        let status = Arc::new(AtomicBool::new(false));
        let listener = tokio::spawn(listen(Arc::clone(&channel), Arc::clone(&status)));
        debug!(node = channel.rank(), "error listener started");
        Ok(Self {
            channel,
            status,
            listener: Mutex::new(Some(listener)),
        })
    }

    /// Whether any node has raised the flag, as far as this node knows
    pub fn error_status(&self) -> bool {
        self.status.load(Ordering::Acquire)
    }

    /// Raise the flag and tell every other node
    ///
    /// Only the first call on a node sends anything, including when the flag
    /// was already set by a message from elsewhere.
    ///
    /// # Errors
    ///
    /// Fails if a send fails.
    pub async fn indicate_error(&self) -> TransportResult<()> {
        if self
            .status
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let this = self.channel.rank();
        warn!(node = this, "indicating error to cluster");
        let message = Message::ErrorOccurred.encode();
        for node in (0..self.channel.size()).filter(|&node| node != this) {
            self.channel.send(node, ERROR_TAG, &message).await?;
        }
        Ok(())
    }

    /// Stop the listener
    ///
    /// Collective: waits for every node so no error message is still in
    /// flight. Calling it again does nothing.
    ///
    /// # Errors
    ///
    /// Fails if the barrier or exit message fails, or the listener ended
    /// abnormally.
    pub async fn shutdown(&self) -> TransportResult<()> {
        let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };

        self.channel.barrier().await?;
        self.channel
            .send(self.channel.rank(), ERROR_TAG, &Message::ExitThread.encode())
            .await?;
        let result = listener
            .await
            .map_err(|e| TransportError::ListenerFailed(e.to_string()))?;
        debug!(node = self.channel.rank(), "error listener stopped");
        result
    }
}

impl std::fmt::Debug for ErrorCommunicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorCommunicator")
            .field("node", &self.channel.rank())
            .field("status", &self.error_status())
            .finish_non_exhaustive()
    }
}

impl Drop for ErrorCommunicator {
    fn drop(&mut self) {
        let listener = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener.abort();
        }
    }
}

async fn listen(channel: Arc<dyn Transport>, status: Arc<AtomicBool>) -> TransportResult<()> {
    let mut buffer = [0u8; 4];
    loop {
        let received = match channel.recv(None, ERROR_TAG, &mut buffer).await {
            Ok(received) => received,
            Err(e) => {
                warn!(node = channel.rank(), error = %e, "error listener failed");
                return Err(e);
            }
        };
        if received.len != buffer.len() {
            warn!(
                node = channel.rank(),
                from = received.source,
                len = received.len,
                "ignoring short error channel message"
            );
            continue;
        }

        match Message::from_code(u32::from_le_bytes(buffer)) {
            Some(Message::ExitThread) => return Ok(()),
            Some(Message::ErrorOccurred) => {
                debug!(node = channel.rank(), from = received.source, "error received");
                status.store(true, Ordering::Release);
            }
            None => warn!(
                node = channel.rank(),
                from = received.source,
                code = u32::from_le_bytes(buffer),
                "ignoring unknown error channel message"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{LocalCluster, LocalClusterConfig};
    use crate::transport::ThreadSupport;
    use futures::future::join_all;
    use std::time::Duration;

    fn cluster(node_count: u32) -> Vec<Arc<dyn Transport>> {
        LocalCluster::new(LocalClusterConfig::new(node_count))
            .unwrap()
            .into_endpoints()
            .into_iter()
            .map(|endpoint| {
                endpoint.initialise(ThreadSupport::Multiple).unwrap();
                endpoint as Arc<dyn Transport>
            })
            .collect()
    }

    async fn wait_for_error(errors: &ErrorCommunicator) -> bool {
        for _ in 0..500 {
            if errors.error_status() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[test]
    fn test_message_codes() {
        assert_eq!(Message::from_code(0), Some(Message::ErrorOccurred));
        assert_eq!(Message::from_code(1), Some(Message::ExitThread));
        assert_eq!(Message::from_code(2), None);
        assert_eq!(Message::ExitThread.encode(), [1, 0, 0, 0]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_error_by_default() {
        let results = join_all(cluster(3).into_iter().map(|world| {
            tokio::spawn(async move {
                let errors = ErrorCommunicator::start(world.as_ref())?;
                let status = errors.error_status();
                errors.shutdown().await?;
                Ok::<_, TransportError>(status)
            })
        }))
        .await;
        for result in results {
            assert!(!result.unwrap().unwrap());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_error_reaches_every_node() {
        for indicating in 0..4u32 {
            let results = join_all(cluster(4).into_iter().map(|world| {
                tokio::spawn(async move {
                    let errors = ErrorCommunicator::start(world.as_ref())?;
                    world.barrier().await?;
                    if world.rank() == indicating {
                        errors.indicate_error().await?;
                    }
                    let seen = wait_for_error(&errors).await;
                    errors.shutdown().await?;
                    Ok::<_, TransportError>(seen)
                })
            }))
            .await;
            for result in results {
                assert!(result.unwrap().unwrap(), "node {} raised it", indicating);
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_nodes_indicate() {
        let results = join_all(cluster(4).into_iter().map(|world| {
            tokio::spawn(async move {
                let errors = ErrorCommunicator::start(world.as_ref())?;
                world.barrier().await?;
                errors.indicate_error().await?;
                errors.indicate_error().await?;
                let seen = wait_for_error(&errors).await;
                errors.shutdown().await?;
                Ok::<_, TransportError>(seen)
            })
        }))
        .await;
        for result in results {
            assert!(result.unwrap().unwrap());
        }
    }

    #[tokio::test]
    async fn test_unknown_message_ignored() {
        let nodes = cluster(1);
        let errors = ErrorCommunicator::start(nodes[0].as_ref()).unwrap();
        errors
            .channel
            .send(0, ERROR_TAG, &7u32.to_le_bytes())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!errors.error_status());
        errors.shutdown().await.unwrap();
        // Second shutdown is a no-op.
        errors.shutdown().await.unwrap();
    }
}
