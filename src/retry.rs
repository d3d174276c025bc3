//! The retry harness: a general-purpose, cancellation-aware operation
//! wrapper with exponential backoff.
//!
//! Every outbound RPC in this pipeline — algod status/block polling, sink
//! publishes that choose to use it — goes through [`retry_forever`]. The
//! harness is *eternal* by default: it only returns on success or outer
//! cancellation, reflecting the design choice that upstream RPC failures
//! are always transient. Retries are silent to the caller; they are
//! observable only via `tracing`.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Backoff policy: initial delay, doubled on each failure, capped at a
/// maximum. Distinct from a retry *count* limit — this harness has none,
/// by design (§4.1: "eternal by default").
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(15),
        }
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// The wait before attempt `attempt` (0-indexed), full jitter applied.
    ///
    /// `wait(n) = min(max, initial * 2^n)`, i.e. monotonically non-decreasing
    /// in `n` before jitter is applied.
    fn base_wait(&self, attempt: u32) -> Duration {
        let shift = attempt.min(20); // avoid overflow on pathological attempt counts
        let scaled = self.initial.as_secs_f64() * 2f64.powi(shift as i32);
        Duration::from_secs_f64(scaled.min(self.max.as_secs_f64()))
    }

    fn jittered_wait(&self, attempt: u32) -> Duration {
        let base = self.base_wait(attempt);
        let frac = rand::thread_rng().gen_range(0.5..=1.0);
        Duration::from_secs_f64(base.as_secs_f64() * frac)
    }
}

/// Run `worker` until it succeeds or `token` is cancelled.
///
/// `worker` receives a child token derived from `token`, handed out mostly
/// so callers that want to cooperate with cancellation inside the attempt
/// can do so; the harness itself enforces `attempt_timeout` by racing the
/// worker's future against a timer, so a worker that ignores its token and
/// simply hangs still gets bounded to one attempt's worth of wall time. On
/// error (or timeout) the harness sleeps (backoff, doubled per attempt,
/// capped) and retries; the sleep itself races the outer token so
/// cancellation during a backoff wait is immediate.
pub async fn retry_forever<T, E, F, Fut>(
    token: &CancellationToken,
    attempt_timeout: Duration,
    backoff: Backoff,
    mut worker: F,
) -> Result<T, Cancelled>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        if token.is_cancelled() {
            return Err(Cancelled);
        }

        let attempt_token = token.child_token();
        let attempted = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            outcome = tokio::time::timeout(attempt_timeout, worker(attempt_token.clone())) => Some(outcome),
        };

        match attempted {
            None => return Err(Cancelled),
            Some(Ok(Ok(value))) => return Ok(value),
            Some(Ok(Err(err))) => {
                tracing::warn!(attempt, error = %err, "retryable operation failed, backing off");
            }
            Some(Err(_elapsed)) => {
                tracing::warn!(attempt, ?attempt_timeout, "attempt timed out, backing off");
            }
        }

        let wait = backoff.jittered_wait(attempt);
        attempt = attempt.saturating_add(1);

        tokio::select! {
            _ = token.cancelled() => return Err(Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

/// Marker error: the outer cancellation token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cancelled")
    }
}

impl std::error::Error for Cancelled {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn base_wait_doubles_and_caps() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(backoff.base_wait(0), Duration::from_millis(100));
        assert_eq!(backoff.base_wait(1), Duration::from_millis(200));
        assert_eq!(backoff.base_wait(2), Duration::from_millis(400));
        assert_eq!(backoff.base_wait(3), Duration::from_millis(800));
        // 100ms * 2^4 = 1600ms, capped at 1000ms
        assert_eq!(backoff.base_wait(4), Duration::from_secs(1));
        assert_eq!(backoff.base_wait(10), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let token = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts2 = attempts.clone();

        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(5));
        let result = retry_forever(
            &token,
            Duration::from_secs(1),
            backoff,
            move |_child| {
                let attempts = attempts2.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err("not yet")
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();

        let backoff = Backoff::default();
        let result: Result<(), Cancelled> = retry_forever(
            &token,
            Duration::from_secs(1),
            backoff,
            |_child| async { Err::<(), _>("never runs") },
        )
        .await;

        assert_eq!(result, Err(Cancelled));
    }

    #[tokio::test]
    async fn cancellation_during_backoff_is_immediate() {
        let token = CancellationToken::new();
        let token2 = token.clone();

        let backoff = Backoff::new(Duration::from_secs(30), Duration::from_secs(60));
        let handle = tokio::spawn(async move {
            retry_forever(
                &token2,
                Duration::from_secs(1),
                backoff,
                |_child| async { Err::<(), _>("always fails") },
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("retry_forever should observe cancellation quickly")
            .unwrap();
        assert_eq!(result, Err(Cancelled));
    }

    #[tokio::test]
    async fn attempt_timeout_is_enforced_even_if_worker_hangs() {
        let token = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts2 = attempts.clone();

        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(5));
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            retry_forever(
                &token,
                Duration::from_millis(20),
                backoff,
                move |_child| {
                    let attempts = attempts2.clone();
                    async move {
                        let n = attempts.fetch_add(1, Ordering::SeqCst);
                        if n < 2 {
                            // Never resolves on its own; only the harness's
                            // own timeout should move this along.
                            std::future::pending::<()>().await;
                        }
                        Ok::<_, &str>(n)
                    }
                },
            ),
        )
        .await
        .expect("retry_forever should not hang past the attempt timeout");

        assert_eq!(result, Ok(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
