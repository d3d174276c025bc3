//! Merge/dedup stage: the single consumer of every fetcher's raw block
//! stream, responsible for turning N overlapping per-node streams into one
//! strictly monotone round stream.
//!
//! There is exactly one of these per pipeline, fed by the cloned `Sender`
//! half of one channel that every fetcher holds a clone of — the classic
//! N-producer/1-consumer shape. Ordering within a single channel is FIFO,
//! but rounds across different nodes can still arrive out of order (one
//! node catching up, another already at the tip); this stage is what turns
//! that into a clean forward-only stream.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::block::BlockEnvelope;
use crate::round::GlobalMaxRound;

/// The fetcher that won the race to have a given round forwarded first,
/// and when its envelope was received — kept only for the current
/// high-water round, just long enough to compute a duplicate's lag against
/// it (§3: "record the source id and timestamp as the 'leader' for this
/// round").
struct Leader {
    round: u64,
    source: String,
    received_at: SystemTime,
}

/// Drains `blocks_rx` until every sender is dropped or `token` fires,
/// forwarding each block whose round is strictly greater than the last one
/// forwarded. A round equal to the last one forwarded (another fetcher's
/// redundant copy) is dropped with a log line noting its lag behind the
/// leader; a round strictly behind the last one forwarded (stale —
/// typically a fetcher catching up past a skip-ahead) is dropped silently.
pub async fn run(
    mut blocks_rx: mpsc::Receiver<BlockEnvelope>,
    out_tx: mpsc::Sender<Arc<BlockEnvelope>>,
    global_max_round: Arc<GlobalMaxRound>,
    token: CancellationToken,
) {
    let mut leader: Option<Leader> = None;

    loop {
        let received = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            received = blocks_rx.recv() => received,
        };

        let Some(envelope) = received else {
            return;
        };

        let round = envelope.round();
        if let Some(current) = &leader {
            if round == current.round {
                let lag_ms = envelope
                    .received_at
                    .duration_since(current.received_at)
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0);
                tracing::warn!(
                    round,
                    leader_source = %current.source,
                    lagging_source = %envelope.source,
                    lag_ms,
                    "dropping duplicate round, behind the leader"
                );
                continue;
            }
            if round < current.round {
                continue;
            }
        }

        leader = Some(Leader {
            round,
            source: envelope.source.clone(),
            received_at: envelope.received_at,
        });
        publish_if_higher(&global_max_round, round);

        if out_tx.send(Arc::new(envelope)).await.is_err() {
            return;
        }
    }
}

/// Advances the shared high-water mark if `round` is newer than whatever is
/// already published. This stage is the sole writer; fetchers only read it
/// for the skip-ahead optimization.
fn publish_if_higher(global_max_round: &GlobalMaxRound, round: u64) {
    let should_advance = match global_max_round.get() {
        None => true,
        Some(current) => round > current,
    };
    if should_advance {
        global_max_round.set(round);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::tests_support::sample_block;

    async fn envelope(round: u64) -> BlockEnvelope {
        BlockEnvelope::new(sample_block(round, 0), "node-a".to_string()).unwrap()
    }

    #[tokio::test]
    async fn forwards_strictly_increasing_rounds_and_drops_the_rest() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let global_max_round = Arc::new(GlobalMaxRound::new());
        let token = CancellationToken::new();

        let handle = tokio::spawn(run(in_rx, out_tx, global_max_round.clone(), token.clone()));

        in_tx.send(envelope(1).await).await.unwrap();
        in_tx.send(envelope(2).await).await.unwrap();
        in_tx.send(envelope(2).await).await.unwrap(); // duplicate, from another node
        in_tx.send(envelope(1).await).await.unwrap(); // stale
        in_tx.send(envelope(3).await).await.unwrap();
        drop(in_tx);

        let mut seen = Vec::new();
        while let Some(envelope) = out_rx.recv().await {
            seen.push(envelope.round());
        }
        handle.await.unwrap();

        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(global_max_round.get(), Some(3));
    }

    #[tokio::test]
    async fn stops_promptly_on_cancellation() {
        let (_in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, _out_rx) = mpsc::channel(8);
        let global_max_round = Arc::new(GlobalMaxRound::new());
        let token = CancellationToken::new();
        token.cancel();

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            run(in_rx, out_tx, global_max_round, token),
        )
        .await;
        assert!(result.is_ok());
    }
}
