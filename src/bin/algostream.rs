//! CLI entry point: loads config, resolves the start round, wires up
//! fetchers, the merge stage, the dispatcher and sinks, and runs until a
//! shutdown signal arrives.
//!
//! Wiring follows `cmd/algostream/main.go`/`alogd.go`'s shape (load config
//! -> build algod client(s) -> spawn the fetch loop -> spawn the sink
//! pusher) generalized from "one node, one sink" to N of each.

use std::path::Path;
use std::sync::Arc;

use algo_streamer::algod::NodeConfig;
use algo_streamer::config::{CliArgs, PipelineConfig};
use algo_streamer::error::PipelineError;
use algo_streamer::round::GlobalMaxRound;
use algo_streamer::sink::{Sink, SinkHandle, SinkRegistry};
use algo_streamer::{dispatcher, fetcher, merge, resume};

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    init_logging();

    let cli = CliArgs::parse();
    let cfg = PipelineConfig::load(Path::new(&cli.config), &cli)?;

    let registry = SinkRegistry::with_builtin_factories();
    let backpressure = if cli.no_block {
        algo_streamer::sink::Backpressure::NonBlocking
    } else {
        algo_streamer::sink::Backpressure::Block
    };

    let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
    let mut handles: Vec<Arc<SinkHandle>> = Vec::new();
    let mut receivers = Vec::new();

    for def in cfg.sinks.values() {
        if !def.enabled {
            continue;
        }
        let sink = registry
            .build(&def.kind, def.name.clone(), &def.cfg)
            .map_err(|source| PipelineError::SinkStartup {
                name: def.name.clone(),
                source,
            })?;
        let (handle, blocks_rx, statuses_rx, txs_rx) =
            SinkHandle::new(def.name.clone(), cfg.algod.queue.max(1) as usize, backpressure);
        sinks.push(sink);
        handles.push(Arc::new(handle));
        receivers.push((blocks_rx, statuses_rx, txs_rx));
    }

    let token = CancellationToken::new();

    for (sink, (blocks_rx, statuses_rx, txs_rx)) in sinks.iter().zip(receivers.into_iter()) {
        sink.start(blocks_rx, statuses_rx, txs_rx, token.child_token())
            .await
            .map_err(|source| PipelineError::SinkStartup {
                name: "sink".to_string(),
                source,
            })?;
    }

    let start_round = resume::resolve_start_round(cfg.algod.first, &sinks).await;
    if let Some(round) = start_round {
        tracing::info!(round, "resuming from reconciled start round");
    } else {
        tracing::info!("no resume hint from any sink, starting at node tip");
    }
    let first_round = start_round.map(|r| r as i64).unwrap_or(-1);

    // `algod.queue` governs the depth of every inter-stage channel (raw
    // block fan-in, deduped block fan-out, status fan-in) -- the per-sink
    // intake channels above already apply the same value.
    let queue_depth = cfg.algod.queue.max(1) as usize;
    let global_max_round = Arc::new(GlobalMaxRound::new());
    let (raw_blocks_tx, raw_blocks_rx) = mpsc::channel(queue_depth);
    let (merged_blocks_tx, merged_blocks_rx) = mpsc::channel(queue_depth);
    let (statuses_tx, statuses_rx) = mpsc::channel(queue_depth);

    let mut fetcher_handles = Vec::new();
    for node_def in &cfg.algod.nodes {
        let node = NodeConfig {
            id: node_def.id.clone(),
            address: node_def.address.clone(),
            token: node_def.token.clone(),
        };
        let blocks_tx = raw_blocks_tx.clone();
        let statuses_tx = statuses_tx.clone();
        let global_max_round = global_max_round.clone();
        let token = token.child_token();
        let last_round = cfg.algod.last;

        fetcher_handles.push(tokio::spawn(async move {
            fetcher::run(
                node,
                first_round,
                last_round,
                blocks_tx,
                statuses_tx,
                global_max_round,
                token,
            )
            .await
        }));
    }
    drop(raw_blocks_tx);
    drop(statuses_tx);

    let merge_handle = tokio::spawn(merge::run(
        raw_blocks_rx,
        merged_blocks_tx,
        global_max_round.clone(),
        token.child_token(),
    ));

    let mut dispatcher_handle = tokio::spawn(dispatcher::run(
        merged_blocks_rx,
        statuses_rx,
        handles,
        token.child_token(),
    ));

    // The dispatcher can finish on its own — a finite `-l` stopping round
    // drains every fetcher, which drains the merge stage, which closes the
    // dispatcher's input — and that must end the process just as surely as
    // an external shutdown signal does (§6: exit 0 "on reaching the last
    // round", not just on cancellation).
    let dispatcher_result = tokio::select! {
        _ = wait_for_shutdown_signal() => {
            tracing::info!("shutdown signal received, cancelling pipeline");
            token.cancel();
            dispatcher_handle.await
        }
        result = &mut dispatcher_handle => {
            tracing::info!("pipeline finished without an external shutdown signal, stopping");
            token.cancel();
            result
        }
    };

    for handle in fetcher_handles {
        if let Err(err) = handle.await {
            tracing::warn!(error = %err, "fetcher task panicked");
        }
    }
    let _ = merge_handle.await;

    match dispatcher_result {
        Ok(result) => result?,
        Err(err) => tracing::warn!(error = %err, "dispatcher task panicked"),
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to install SIGTERM handler, watching SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
