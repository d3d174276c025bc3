//! The sink abstraction: a pluggable fan-out target for blocks, node status
//! updates, and (optionally) transactions.
//!
//! Grounded on `internal/isink/isink.go`'s `Sink` interface and
//! `SinkCommon` backpressure helpers, and on the registered-handle pattern
//! `client-rust`'s `Producer` uses for a bounded outbound queue paired with
//! a background worker task.

pub mod redis_stream;
pub mod stdout;
pub mod stub;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::block::{BlockEnvelope, TxEnvelope};
use crate::error::SinkError;
use crate::status::NodeStatus;

/// Backpressure behavior shared by every sink's intake queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    /// Block the caller until there's room, or until cancellation.
    Block,
    /// Return `SinkError::WouldBlock` immediately when the queue is full.
    NonBlocking,
}

/// A running sink's intake: three independently-bounded channels so a slow
/// transaction subscriber can't stall block delivery, and vice versa.
pub struct SinkHandle {
    pub name: String,
    blocks_tx: mpsc::Sender<Arc<BlockEnvelope>>,
    statuses_tx: mpsc::Sender<NodeStatus>,
    txs_tx: mpsc::Sender<Arc<TxEnvelope>>,
    mode: Backpressure,
}

impl SinkHandle {
    pub fn new(
        name: String,
        queue: usize,
        mode: Backpressure,
    ) -> (
        Self,
        mpsc::Receiver<Arc<BlockEnvelope>>,
        mpsc::Receiver<NodeStatus>,
        mpsc::Receiver<Arc<TxEnvelope>>,
    ) {
        let (blocks_tx, blocks_rx) = mpsc::channel(queue);
        let (statuses_tx, statuses_rx) = mpsc::channel(queue);
        let (txs_tx, txs_rx) = mpsc::channel(queue);
        (
            Self {
                name,
                blocks_tx,
                statuses_tx,
                txs_tx,
                mode,
            },
            blocks_rx,
            statuses_rx,
            txs_rx,
        )
    }

    pub async fn send_block(
        &self,
        block: Arc<BlockEnvelope>,
        token: &CancellationToken,
    ) -> Result<(), SinkError> {
        send_with_backpressure(&self.blocks_tx, block, self.mode, token).await
    }

    pub async fn send_status(
        &self,
        status: NodeStatus,
        token: &CancellationToken,
    ) -> Result<(), SinkError> {
        send_with_backpressure(&self.statuses_tx, status, self.mode, token).await
    }

    /// Part of the uniform sink contract; unused by this build's
    /// dispatcher, fetchers, or merge stage — no `TxEnvelope` is
    /// ever derived from a block's payset here (see
    /// [`crate::block::TxEnvelope`]'s docs), so no caller currently has one
    /// to send. Kept so a sink implementation has somewhere to receive
    /// transactions the moment a payset-decoding producer exists.
    pub async fn send_tx(
        &self,
        tx: Arc<TxEnvelope>,
        token: &CancellationToken,
    ) -> Result<(), SinkError> {
        send_with_backpressure(&self.txs_tx, tx, self.mode, token).await
    }
}

/// The shared enqueue contract: non-blocking mode returns `WouldBlock`
/// immediately on a full queue; blocking mode waits for capacity, racing
/// cancellation so a stuck sink can't wedge shutdown.
async fn send_with_backpressure<T: Send>(
    tx: &mpsc::Sender<T>,
    value: T,
    mode: Backpressure,
    token: &CancellationToken,
) -> Result<(), SinkError> {
    match mode {
        Backpressure::NonBlocking => match tx.try_send(value) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SinkError::WouldBlock),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkError::Cancelled),
        },
        Backpressure::Block => tokio::select! {
            biased;
            _ = token.cancelled() => Err(SinkError::Cancelled),
            result = tx.send(value) => result.map_err(|_| SinkError::Cancelled),
        },
    }
}

/// A pluggable fan-out target. Implementations own a background task
/// started from [`start`](Sink::start) that drains the receivers handed to
/// it and talks to whatever external system it wraps.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Spawn the sink's worker task(s). Returning `Err` here is treated as
    /// a startup failure and aborts the whole pipeline — a sink that can't
    /// even connect is assumed to be misconfigured, not transiently down.
    async fn start(
        &self,
        blocks: mpsc::Receiver<Arc<BlockEnvelope>>,
        statuses: mpsc::Receiver<NodeStatus>,
        txs: mpsc::Receiver<Arc<TxEnvelope>>,
        token: CancellationToken,
    ) -> Result<(), SinkError>;

    /// The highest round this sink has durably committed, for resume.
    /// Sinks with no persistent state return `SinkError::NotImplemented`.
    async fn last_committed_round(&self) -> Result<u64, SinkError>;
}

/// Builds a [`Sink`] from its `cfg` payload. One factory per registered
/// kind, replacing the Go side's side-effecting `init()` registration with
/// an explicit table built at startup.
pub trait SinkFactory: Send + Sync {
    fn build(&self, name: String, cfg: &serde_json::Value) -> Result<Arc<dyn Sink>, SinkError>;
}

/// The explicit registry of sink kinds known to this binary.
#[derive(Default)]
pub struct SinkRegistry {
    factories: HashMap<String, Box<dyn SinkFactory>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, factory: Box<dyn SinkFactory>) {
        self.factories.insert(kind.into(), factory);
    }

    pub fn build(
        &self,
        kind: &str,
        name: String,
        cfg: &serde_json::Value,
    ) -> Result<Arc<dyn Sink>, SinkError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| SinkError::Config(format!("no sink kind registered for '{kind}'")))?;
        factory.build(name, cfg)
    }

    /// The registry used by the binary: stdout and the Redis Streams sink
    /// are fully wired; the remaining kinds are transport stubs (see
    /// [`stub`]) kept so a config file listing them still resolves and
    /// participates in the resume coordinator uniformly.
    pub fn with_builtin_factories() -> Self {
        let mut registry = Self::new();
        registry.register("stdout", Box::new(stdout::StdoutSinkFactory));
        registry.register("redis", Box::new(redis_stream::RedisStreamSinkFactory));
        registry.register("kafka", Box::new(stub::StubSinkFactory::new("kafka")));
        registry.register("rabbitmq", Box::new(stub::StubSinkFactory::new("rabbitmq")));
        registry.register("mqtt", Box::new(stub::StubSinkFactory::new("mqtt")));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nonblocking_handle_returns_would_block_when_full() {
        let (handle, mut blocks_rx, _statuses_rx, _txs_rx) =
            SinkHandle::new("test".to_string(), 1, Backpressure::NonBlocking);
        let token = CancellationToken::new();

        let raw = crate::block::tests_support::sample_block(1, 0);
        let envelope = Arc::new(crate::block::BlockEnvelope::new(raw, "n1".to_string()).unwrap());

        handle.send_block(envelope.clone(), &token).await.unwrap();
        let err = handle.send_block(envelope, &token).await.unwrap_err();
        assert!(matches!(err, SinkError::WouldBlock));

        blocks_rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn blocking_handle_unblocks_on_cancellation() {
        let (handle, _blocks_rx, mut statuses_rx, _txs_rx) =
            SinkHandle::new("test".to_string(), 0, Backpressure::Block);
        let _ = statuses_rx.close();
        let token = CancellationToken::new();
        token.cancel();

        let status = NodeStatus::new("n1".to_string(), 1, 0);
        let err = handle.send_status(status, &token).await.unwrap_err();
        assert!(matches!(err, SinkError::Cancelled));
    }
}
