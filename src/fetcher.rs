//! Per-node fetcher: pulls finalized blocks from one algod node and forwards
//! them (plus periodic status) toward the merge stage.
//!
//! State machine ported from `internal/algod/algod.go`'s `AlgodStream` loop:
//! probe the node's current tip, catch up block-by-block from the start
//! round while behind, then settle into long-polling
//! `status/wait-for-block-after` once caught up. Every network call is
//! wrapped in [`crate::retry::retry_forever`] — a fetcher never gives up on
//! its own, it only stops on cancellation or reaching `last_round`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::algod::{AlgodClient, NodeConfig};
use crate::block::BlockEnvelope;
use crate::error::PipelineError;
use crate::retry::{retry_forever, Backoff};
use crate::round::GlobalMaxRound;
use crate::status::NodeStatus;

const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// The fetcher's internal phase. `Probing` only ever runs once, at startup;
/// after that the fetcher alternates between catching up on already-final
/// rounds and waiting on the node for the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Probing,
    CatchingUp,
    WaitingForRound,
}

/// Drives one node end-to-end until `last_round` is reached (when bounded)
/// or `token` is cancelled.
///
/// `first_round < 0` means "start at the node's current tip"; `last_round <
/// 0` means unbounded. Decoded blocks are sent as `BlockEnvelope` on
/// `blocks_tx`; the merge stage is the sole consumer and may receive the
/// same round more than once across fetchers — deduping is its job, not
/// this one's.
pub async fn run(
    node: NodeConfig,
    first_round: i64,
    last_round: i64,
    blocks_tx: mpsc::Sender<BlockEnvelope>,
    statuses_tx: mpsc::Sender<NodeStatus>,
    global_max_round: Arc<GlobalMaxRound>,
    token: CancellationToken,
) -> Result<(), PipelineError> {
    let client = AlgodClient::new(&node).map_err(|e| {
        PipelineError::Config(format!("building algod client for '{}': {e}", node.id))
    })?;

    let mut phase = Phase::Probing;
    let mut next_round: u64 = if first_round >= 0 { first_round as u64 } else { 0 };

    loop {
        if token.is_cancelled() {
            return Ok(());
        }
        if last_round >= 0 && next_round > last_round as u64 {
            tracing::info!(node = %node.id, last_round, "reached configured last round, stopping");
            return Ok(());
        }

        match phase {
            Phase::Probing => {
                let status = fetch_status(&client, &token).await?;
                tracing::info!(node = %node.id, tip = status.last_round, "probed node tip");
                let _ = statuses_tx.send(to_node_status(&node.id, &status)).await;

                if first_round < 0 {
                    next_round = status.last_round;
                }
                phase = if next_round < status.last_round {
                    Phase::CatchingUp
                } else {
                    Phase::WaitingForRound
                };
            }

            Phase::CatchingUp => {
                // Skip-ahead: another fetcher may already be further along
                // than this node's own catch-up cursor. Jumping to the
                // shared high-water mark is a pure latency win; the merge
                // stage still filters anything stale or duplicate.
                if let Some(shared_max) = global_max_round.get() {
                    if shared_max >= next_round {
                        next_round = shared_max + 1;
                    }
                }

                let round_to_fetch = next_round;
                let raw = fetch_block(&client, round_to_fetch, &token).await?;
                let envelope = match BlockEnvelope::new(raw, node.id.clone()) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        tracing::warn!(node = %node.id, round = round_to_fetch, error = %err, "decode failed, retrying same round");
                        continue;
                    }
                };

                if blocks_tx.send(envelope).await.is_err() {
                    return Ok(());
                }
                next_round = round_to_fetch + 1;

                let status = fetch_status(&client, &token).await?;
                phase = if next_round <= status.last_round {
                    Phase::CatchingUp
                } else {
                    Phase::WaitingForRound
                };
            }

            Phase::WaitingForRound => {
                let wait_round = next_round.saturating_sub(1);
                let status = fetch_status_after(&client, wait_round, &token).await?;
                let _ = statuses_tx.send(to_node_status(&node.id, &status)).await;
                phase = if next_round <= status.last_round {
                    Phase::CatchingUp
                } else {
                    Phase::WaitingForRound
                };
            }
        }
    }
}

/// Builds the `NodeStatus` event emitted for one algod status response,
/// carrying the node's last-catchpoint string through when it reports one.
fn to_node_status(node_id: &str, status: &crate::algod::AlgodStatus) -> NodeStatus {
    let base = NodeStatus::new(node_id.to_string(), status.last_round, status.lag_ms());
    match &status.last_catchpoint {
        Some(checkpoint) => base.with_checkpoint(checkpoint.clone()),
        None => base,
    }
}

async fn fetch_status(
    client: &AlgodClient,
    token: &CancellationToken,
) -> Result<crate::algod::AlgodStatus, PipelineError> {
    retry_forever(token, ATTEMPT_TIMEOUT, Backoff::default(), |_child| {
        client.status()
    })
    .await
    .map_err(|_| PipelineError::Cancelled)
}

async fn fetch_status_after(
    client: &AlgodClient,
    round: u64,
    token: &CancellationToken,
) -> Result<crate::algod::AlgodStatus, PipelineError> {
    retry_forever(token, ATTEMPT_TIMEOUT, Backoff::default(), |_child| {
        client.status_after_block(round)
    })
    .await
    .map_err(|_| PipelineError::Cancelled)
}

async fn fetch_block(
    client: &AlgodClient,
    round: u64,
    token: &CancellationToken,
) -> Result<bytes::Bytes, PipelineError> {
    retry_forever(token, ATTEMPT_TIMEOUT, Backoff::default(), |_child| {
        client.block(round)
    })
    .await
    .map_err(|_| PipelineError::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_ahead_jumps_to_one_past_shared_max() {
        let g = GlobalMaxRound::new();
        g.set(100);
        // Mirrors the CatchingUp branch's jump rule without driving the
        // full async state machine.
        let mut next_round = 10u64;
        if let Some(shared_max) = g.get() {
            if shared_max >= next_round {
                next_round = shared_max + 1;
            }
        }
        assert_eq!(next_round, 101);
    }

    #[test]
    fn to_node_status_carries_last_catchpoint_through() {
        let status = crate::algod::AlgodStatus {
            last_round: 42,
            time_since_last_round_ns: 1_000_000,
            last_catchpoint: Some("42#abcdef".to_string()),
        };
        let node_status = to_node_status("n1", &status);
        assert_eq!(node_status.last_round, 42);
        assert_eq!(node_status.last_checkpoint.as_deref(), Some("42#abcdef"));
    }

    #[test]
    fn to_node_status_omits_checkpoint_when_absent() {
        let status = crate::algod::AlgodStatus {
            last_round: 7,
            time_since_last_round_ns: 0,
            last_catchpoint: None,
        };
        let node_status = to_node_status("n1", &status);
        assert_eq!(node_status.last_checkpoint, None);
    }
}
