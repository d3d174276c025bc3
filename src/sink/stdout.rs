//! The reference sink: prints each block's pre-rendered strict JSON to
//! stdout and drops status updates on the floor.
//!
//! Ported from `internal/isink/stdout/stdout.go`'s `handleBlockStdOut`,
//! which encodes with `protocol.JSONStrictHandle` and `fmt.Println`s the
//! result — this sink does the equivalent using the JSON already rendered
//! once at ingest by [`crate::block::BlockEnvelope`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::block::{BlockEnvelope, TxEnvelope};
use crate::error::SinkError;
use crate::sink::{Sink, SinkFactory};
use crate::status::NodeStatus;

pub struct StdoutSink;

#[async_trait]
impl Sink for StdoutSink {
    async fn start(
        &self,
        mut blocks: mpsc::Receiver<Arc<BlockEnvelope>>,
        mut statuses: mpsc::Receiver<NodeStatus>,
        mut txs: mpsc::Receiver<Arc<TxEnvelope>>,
        token: CancellationToken,
    ) -> Result<(), SinkError> {
        tokio::spawn(async move {
            let mut statuses_open = true;
            let mut txs_open = true;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    block = blocks.recv() => {
                        let Some(block) = block else { return };
                        println!("{}", block.json.strict);
                    }
                    status = statuses.recv(), if statuses_open => {
                        // No-op: stdout has nothing useful to do with a
                        // status update, matching the Go sink's empty case.
                        if status.is_none() { statuses_open = false; }
                    }
                    tx = txs.recv(), if txs_open => {
                        if tx.is_none() { txs_open = false; }
                    }
                }
            }
        });
        Ok(())
    }

    async fn last_committed_round(&self) -> Result<u64, SinkError> {
        Err(SinkError::NotImplemented)
    }
}

pub struct StdoutSinkFactory;

impl SinkFactory for StdoutSinkFactory {
    fn build(&self, _name: String, _cfg: &serde_json::Value) -> Result<Arc<dyn Sink>, SinkError> {
        Ok(Arc::new(StdoutSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn last_committed_round_is_not_implemented() {
        let sink = StdoutSink;
        assert!(matches!(
            sink.last_committed_round().await,
            Err(SinkError::NotImplemented)
        ));
    }

    #[tokio::test]
    async fn start_drains_until_channels_close() {
        let sink = StdoutSink;
        let (blocks_tx, blocks_rx) = mpsc::channel(1);
        let (statuses_tx, statuses_rx) = mpsc::channel(1);
        let (txs_tx, txs_rx) = mpsc::channel(1);
        let token = CancellationToken::new();

        sink.start(blocks_rx, statuses_rx, txs_rx, token.clone())
            .await
            .unwrap();

        let raw = crate::block::tests_support::sample_block(1, 0);
        let envelope = Arc::new(BlockEnvelope::new(raw, "n1".to_string()).unwrap());
        blocks_tx.send(envelope).await.unwrap();

        drop(blocks_tx);
        drop(statuses_tx);
        drop(txs_tx);
        // Give the spawned task a tick to observe the closed channels.
        tokio::task::yield_now().await;
    }
}
