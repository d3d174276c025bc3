//! Node status events: last known finalized round, lag since that round was
//! produced, and an optional checkpoint string.

use crate::block::NodeId;

/// One status update from a single upstream node. Status events from
/// different nodes may interleave arbitrarily; ordering is node-local only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub last_round: u64,
    pub lag_ms: i64,
    /// `<round>#<hash>` form, when the node reports one.
    pub last_checkpoint: Option<String>,
}

impl NodeStatus {
    pub fn new(node_id: NodeId, last_round: u64, lag_ms: i64) -> Self {
        Self {
            node_id,
            last_round,
            lag_ms,
            last_checkpoint: None,
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: impl Into<String>) -> Self {
        self.last_checkpoint = Some(checkpoint.into());
        self
    }
}
