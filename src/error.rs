//! Error types for the streaming pipeline.

use thiserror::Error;

/// Fatal errors that can terminate the pipeline.
///
/// Transient errors (upstream RPC failures, sink publish failures) never
/// reach this type — they are absorbed by the retry harness or the sink
/// worker's internal retry loop. Only failures that should cancel the whole
/// process surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("sink '{name}' failed to start: {source}")]
    SinkStartup {
        name: String,
        #[source]
        source: SinkError,
    },

    #[error("sink '{name}' would block and the pipeline is running in non-blocking mode")]
    WouldBlock { name: String },

    #[error("sink '{name}' reported a fatal error: {source}")]
    SinkFatal {
        name: String,
        #[source]
        source: SinkError,
    },

    #[error("cancelled")]
    Cancelled,
}

/// Errors surfaced by a [`crate::sink::Sink`] implementation.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// The sink's intake queue is full and the caller asked not to block.
    #[error("would block")]
    WouldBlock,

    /// The operation is cancellation-aware and the token fired first.
    #[error("cancelled")]
    Cancelled,

    /// The sink does not track history (no resume hint available).
    #[error("not implemented")]
    NotImplemented,

    /// The sink's external system rejected the request at construction time
    /// or during a non-retryable operation.
    #[error("transport error: {0}")]
    Transport(String),

    /// The sink's config payload failed to parse.
    #[error("invalid sink configuration: {0}")]
    Config(String),
}

/// Errors from decoding a raw block payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("msgpack decode error: {0}")]
    Msgpack(#[from] rmp_serde::decode::Error),

    #[error("json encode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from the algod RPC client.
#[derive(Debug, Error)]
pub enum AlgodError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("node returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("response decode error: {0}")]
    Decode(#[from] DecodeError),
}
