//! Node identifiers.
//!
//! A node is identified by its rank in the cluster transport. Rank 0 is the
//! coordinating (primary) node.

use serde::{Deserialize, Serialize};

/// Node identifier - the cluster-assigned rank of one participating process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// The coordinating node
    pub const PRIMARY: Self = Self(0);

    /// Create from a transport rank
    #[must_use]
    pub const fn new(rank: u32) -> Self {
        Self(rank)
    }

    /// Get the transport rank
    #[must_use]
    pub const fn rank(&self) -> u32 {
        self.0
    }

    /// Get the rank as a buffer index
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }

    /// Whether this is the coordinating node
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.0 == 0
    }

    /// Iterate over the secondary node ids of a cluster of `node_count` nodes
    pub fn secondaries(node_count: u32) -> impl Iterator<Item = NodeId> {
        (1..node_count).map(NodeId)
    }
}

impl From<u32> for NodeId {
    fn from(rank: u32) -> Self {
        Self(rank)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node_{}", self.0)
    }
}
