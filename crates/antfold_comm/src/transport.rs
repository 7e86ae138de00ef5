//! Collective-communication transport.
//!
//! The protocol needs a small set of primitives: rank and size queries, a
//! full-cluster barrier, rooted broadcast and gather (fixed and variable
//! block sizes), tagged point-to-point messages, and private channels that do
//! not interfere with traffic on the main one.
//!
//! Receivers always pre-size their buffers. A collective block whose length
//! differs from what the receiver allocated is an error, never a silent
//! truncation, so every variable-length transfer must be preceded by one that
//! carries its size.

use async_trait::async_trait;
use std::sync::Arc;

/// Transport result type
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport errors
///
/// None of these are expected in a correct program; they indicate a logic
/// error or a broken cluster and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Initialisation was attempted a second time
    #[error("Transport already initialised")]
    AlreadyInitialised,

    /// An operation was attempted before initialisation
    #[error("Transport not initialised")]
    NotInitialised,

    /// An operation was attempted after finalization
    #[error("Transport already finalized")]
    Finalized,

    /// The transport cannot be used from several threads at once
    #[error("Insufficient thread support: required {required:?}, provided {provided:?}")]
    InsufficientThreadSupport {
        /// Level asked for
        required: ThreadSupport,
        /// Level the transport offers
        provided: ThreadSupport,
    },

    /// A cluster must have at least one node
    #[error("Cluster has no nodes")]
    EmptyCluster,

    /// Rank outside the cluster
    #[error("Invalid rank {rank} for a cluster of {size} nodes")]
    InvalidRank {
        /// Offending rank
        rank: u32,
        /// Cluster size
        size: u32,
    },

    /// A collective block did not match the receiver's buffer
    #[error("Size mismatch in {operation}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Collective operation
        operation: &'static str,
        /// Bytes the receiver expected
        expected: usize,
        /// Bytes that arrived
        actual: usize,
    },

    /// A point-to-point message did not fit the receive buffer
    #[error("Message of {actual} bytes truncated into a {capacity} byte buffer")]
    Truncated {
        /// Receive buffer size
        capacity: usize,
        /// Message size
        actual: usize,
    },

    /// Gather counts or displacements do not describe the receive buffer
    #[error("Invalid gather layout: {0}")]
    InvalidLayout(String),

    /// Received bytes do not decode to a protocol message
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// The error listener task ended abnormally
    #[error("Error listener failed: {0}")]
    ListenerFailed(String),
}

/// Level of concurrent use a transport supports
///
/// Ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ThreadSupport {
    /// Only one thread exists
    Single,
    /// Only the main thread makes transport calls
    Funneled,
    /// Any thread may call, one at a time
    Serialized,
    /// Any thread may call at any time
    Multiple,
}

/// Outcome of a point-to-point receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Rank the message came from
    pub source: u32,
    /// Number of bytes received
    pub len: usize,
}

/// Receive-side layout of a variable-size gather
///
/// `counts[r]` bytes from rank `r` are written at `buffer[displacements[r]..]`.
#[derive(Debug)]
pub struct GatherLayout<'a> {
    /// Receive buffer
    pub buffer: &'a mut [u8],
    /// Bytes contributed by each rank
    pub counts: &'a [usize],
    /// Offset of each rank's block in `buffer`
    pub displacements: &'a [usize],
}

impl<'a> GatherLayout<'a> {
    /// Create a new layout
    #[must_use]
    pub fn new(buffer: &'a mut [u8], counts: &'a [usize], displacements: &'a [usize]) -> Self {
        Self {
            buffer,
            counts,
            displacements,
        }
    }

    /// Check the layout against a cluster of `size` ranks
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidLayout`] if a table has the wrong
    /// length or a block falls outside the buffer.
    pub fn validate(&self, size: u32) -> TransportResult<()> {
        let size = size as usize;
        if self.counts.len() != size || self.displacements.len() != size {
            return Err(TransportError::InvalidLayout(format!(
                "expected {} counts and displacements, got {} and {}",
                size,
                self.counts.len(),
                self.displacements.len()
            )));
        }
        for (rank, (&count, &displacement)) in
            self.counts.iter().zip(self.displacements).enumerate()
        {
            if displacement + count > self.buffer.len() {
                return Err(TransportError::InvalidLayout(format!(
                    "block of rank {} ends at {} beyond buffer of {} bytes",
                    rank,
                    displacement + count,
                    self.buffer.len()
                )));
            }
        }
        Ok(())
    }
}

/// Packed displacements for per-rank counts (exclusive prefix sums)
#[must_use]
pub fn displacements(counts: &[usize]) -> Vec<usize> {
    counts
        .iter()
        .scan(0, |offset, &count| {
            let displacement = *offset;
            *offset += count;
            Some(displacement)
        })
        .collect()
}

/// A collective-communication channel between the nodes of a cluster
///
/// Collective operations block until every rank makes the matching call, in
/// the same order. There are no timeouts.
#[async_trait]
pub trait Transport: Send + Sync {
    /// This process's rank
    fn rank(&self) -> u32;

    /// Number of ranks in the cluster
    fn size(&self) -> u32;

    /// Initialise the transport, returning the thread support provided
    ///
    /// May succeed at most once per process.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AlreadyInitialised`] on a repeat call.
    fn initialise(&self, required: ThreadSupport) -> TransportResult<ThreadSupport>;

    /// Block until every rank arrives
    async fn barrier(&self) -> TransportResult<()>;

    /// Copy `buffer` from `root` into `buffer` on every other rank
    async fn broadcast(&self, root: u32, buffer: &mut [u8]) -> TransportResult<()>;

    /// Collect equal-size blocks at `root`, ordered by rank
    ///
    /// `recv` is only read on the root, where it must hold `size * send.len()`
    /// bytes.
    async fn gather(&self, root: u32, send: &[u8], recv: Option<&mut [u8]>)
    -> TransportResult<()>;

    /// Collect variable-size blocks at `root`
    ///
    /// `recv` is only read on the root.
    async fn gatherv(
        &self,
        root: u32,
        send: &[u8],
        recv: Option<GatherLayout<'_>>,
    ) -> TransportResult<()>;

    /// Send a tagged message; never waits for the receiver
    async fn send(&self, dest: u32, tag: u32, data: &[u8]) -> TransportResult<()>;

    /// Receive a tagged message from `source`, or from any rank if `None`
    async fn recv(&self, source: Option<u32>, tag: u32, buffer: &mut [u8])
    -> TransportResult<Status>;

    /// Open a private channel over the same ranks
    ///
    /// Every rank must duplicate in the same order.
    fn duplicate(&self) -> TransportResult<Arc<dyn Transport>>;

    /// Release the transport; no further calls are allowed
    async fn finalize(&self) -> TransportResult<()>;
}

impl std::fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("rank", &self.rank())
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_displacements() {
        assert_eq!(displacements(&[0, 3, 0, 5, 2]), vec![0, 0, 3, 3, 8]);
        assert!(displacements(&[]).is_empty());
    }

    #[test]
    fn test_thread_support_ordering() {
        assert!(ThreadSupport::Multiple > ThreadSupport::Serialized);
        assert!(ThreadSupport::Funneled > ThreadSupport::Single);
    }

    #[test]
    fn test_layout_validation() {
        let mut buffer = [0u8; 8];
        let counts = [0, 3, 5];
        let displs = displacements(&counts);
        let layout = GatherLayout::new(&mut buffer, &counts, &displs);
        assert!(layout.validate(3).is_ok());
        assert!(matches!(
            layout.validate(4),
            Err(TransportError::InvalidLayout(_))
        ));

        let mut small = [0u8; 7];
        let layout = GatherLayout::new(&mut small, &counts, &displs);
        assert!(matches!(
            layout.validate(3),
            Err(TransportError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_error_display() {
        let err = TransportError::SizeMismatch {
            operation: "broadcast",
            expected: 48,
            actual: 40,
        };
        assert_eq!(
            err.to_string(),
            "Size mismatch in broadcast: expected 48 bytes, got 40"
        );
    }
}
