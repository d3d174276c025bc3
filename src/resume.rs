//! Resume coordinator: decides which round the pipeline should start
//! fetching from, reconciling the user's requested start with whatever
//! sinks already have durably committed.
//!
//! A pure function over a slice of sinks, easily unit-tested with a fake
//! `Sink` rather than any real transport.

use std::sync::Arc;

use crate::error::SinkError;
use crate::sink::Sink;

/// `max(user_first_round, max over sinks of last_committed_round())`.
///
/// A negative `user_first_round` means "no user-supplied lower bound" (the
/// CLI/config default, meaning "start at the node's current tip" once no
/// sink has a hint either). Sinks that return
/// [`SinkError::NotImplemented`] are treated as having no opinion, not as
/// an error — they simply don't participate in the max. A sink that
/// returns any other error is logged and skipped the same way: resume is
/// best-effort and optimistic, so one sink being down or otherwise unable
/// to answer must never stop the reconciliation from using every other
/// sink's hint.
///
/// Sinks report the highest round they have already durably committed, so
/// resuming at that literal value (not `+1`) can mean re-delivering a round
/// a sink already has; this is intentional; sinks are required to make
/// their block-ingest idempotent at round granularity so an overlapping
/// resume never double-counts anything externally visible.
pub async fn resolve_start_round(
    user_first_round: i64,
    sinks: &[Arc<dyn Sink>],
) -> Option<u64> {
    let mut max_committed: Option<u64> = None;

    for sink in sinks {
        match sink.last_committed_round().await {
            Ok(round) => {
                max_committed = Some(match max_committed {
                    Some(current) => current.max(round),
                    None => round,
                });
            }
            Err(SinkError::NotImplemented) => continue,
            Err(err) => {
                // Resume is best-effort and optimistic: a sink that can't
                // answer right now still leaves every other sink's hint in
                // play, rather than aborting the whole reconciliation.
                tracing::warn!(error = %err, "sink failed to report its resume hint, skipping it");
                continue;
            }
        }
    }

    let user_round = if user_first_round >= 0 {
        Some(user_first_round as u64)
    } else {
        None
    };

    match (user_round, max_committed) {
        (Some(u), Some(m)) => Some(u.max(m)),
        (Some(u), None) => Some(u),
        (None, Some(m)) => Some(m),
        (None, None) => None,
    }
}
