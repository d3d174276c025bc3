//! Sink dispatcher: fans the deduped block/status stream out to every
//! enabled sink's intake queues.
//!
//! Grounded on `internal/isink/isink.go`'s fan-out loop (`for range
//! sinks { sink.ProcessBlock(...) }` per incoming block) generalized to a
//! `tokio::select!` over both input streams so a status update doesn't wait
//! behind a stalled block queue, or vice versa.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::block::BlockEnvelope;
use crate::error::PipelineError;
use crate::sink::SinkHandle;
use crate::status::NodeStatus;

/// Runs until the block stream closes or `token` fires, pushing every
/// block and status update to every handle in `sinks` in registration
/// order.
///
/// The block stream (fed through the merge stage) and the status stream
/// (fed directly by every fetcher) don't close in lockstep — every
/// fetcher exiting closes `statuses_rx` immediately, while `blocks_rx`
/// only closes once the merge stage also observes that and drains. Once
/// `statuses_rx` closes, its `select!` arm is disabled rather than
/// polled forever, matching every sink worker's "a closed channel ends
/// its part of the loop" convention instead of busy-spinning on a
/// permanently-ready `None`; the dispatcher itself only returns once the
/// block stream closes too (or cancellation fires).
///
/// A [`crate::error::SinkError::WouldBlock`] from any sink is fatal to the
/// whole pipeline — the operator asked for non-blocking mode and a sink
/// fell behind, which is the signal to stop rather than silently drop
/// data.
pub async fn run(
    mut blocks_rx: tokio::sync::mpsc::Receiver<Arc<BlockEnvelope>>,
    mut statuses_rx: tokio::sync::mpsc::Receiver<NodeStatus>,
    sinks: Vec<Arc<SinkHandle>>,
    token: CancellationToken,
) -> Result<(), PipelineError> {
    let mut statuses_open = true;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),

            block = blocks_rx.recv() => {
                let Some(block) = block else { return Ok(()) };
                for sink in &sinks {
                    dispatch_block(sink, block.clone(), &token).await?;
                }
            }

            status = statuses_rx.recv(), if statuses_open => {
                match status {
                    Some(status) => {
                        for sink in &sinks {
                            dispatch_status(sink, status.clone(), &token).await?;
                        }
                    }
                    None => statuses_open = false,
                }
            }
        }
    }
}

async fn dispatch_block(
    sink: &Arc<SinkHandle>,
    block: Arc<BlockEnvelope>,
    token: &CancellationToken,
) -> Result<(), PipelineError> {
    match sink.send_block(block, token).await {
        Ok(()) => Ok(()),
        Err(crate::error::SinkError::Cancelled) => Ok(()),
        Err(crate::error::SinkError::WouldBlock) => Err(PipelineError::WouldBlock {
            name: sink.name.clone(),
        }),
        Err(err) => Err(PipelineError::SinkFatal {
            name: sink.name.clone(),
            source: err,
        }),
    }
}

async fn dispatch_status(
    sink: &Arc<SinkHandle>,
    status: NodeStatus,
    token: &CancellationToken,
) -> Result<(), PipelineError> {
    match sink.send_status(status, token).await {
        Ok(()) => Ok(()),
        Err(crate::error::SinkError::Cancelled) => Ok(()),
        Err(crate::error::SinkError::WouldBlock) => Err(PipelineError::WouldBlock {
            name: sink.name.clone(),
        }),
        Err(err) => Err(PipelineError::SinkFatal {
            name: sink.name.clone(),
            source: err,
        }),
    }
}
