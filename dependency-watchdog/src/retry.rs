//! A small cancellable retry helper.
//!
//! The teacher reaches for the `backoff` crate's `ExponentialBackoff`
//! wherever it retries (`podmanager/server_check.rs`,
//! `podmanager/event_watcher.rs`), always driven through a `select!` against
//! a cancellation signal. This spec is explicit about its own retry shapes —
//! three attempts with a 100 ms linear back-off for scale operations, a
//! fixed 500 ms back-off for watch reconnects — none of which are
//! exponential series, so this module reimplements just the cancellable
//! `select!` idiom the teacher already uses, without the exponential
//! back-off machinery the spec doesn't call for.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Returned when a retry loop is abandoned because its token was cancelled
/// rather than because the underlying operation kept failing.
#[derive(Debug, thiserror::Error)]
#[error("operation was cancelled")]
pub struct Cancelled;

/// A fixed or linearly-growing sequence of back-off durations.
#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * attempt_index` (1-based), e.g. 100ms, 200ms, 300ms, ...
    Linear(Duration),
}

impl Backoff {
    fn duration_for(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(d) => *d,
            Backoff::Linear(base) => *base * attempt,
        }
    }
}

/// Runs `op` up to `max_attempts` times, sleeping `backoff.duration_for(n)`
/// between attempts, stopping early on success or on cancellation of
/// `token`. Returns the last error if every attempt failed.
pub async fn retry<T, E, F, Fut>(
    token: &CancellationToken,
    max_attempts: u32,
    backoff: Backoff,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        if token.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(RetryError::Cancelled),
            result = op() => result,
        };
        match result {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts => return Err(RetryError::Exhausted(err)),
            Err(_) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(backoff.duration_for(attempt)) => {}
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("operation was cancelled")]
    Cancelled,
    #[error("operation failed after all retry attempts: {0}")]
    Exhausted(#[source] E),
}

/// The classification an attempt passed to [`retry_classified`] gives its
/// own error: `Retriable` errors count toward `max_attempts` and are
/// retried after a backoff sleep; `Terminal` errors end the loop on the
/// spot, on the very first attempt that produces one.
pub enum Outcome<E> {
    Retriable(E),
    Terminal(E),
}

/// Like [`retry`], but lets `op` mark an error as terminal (e.g. a 404 that
/// retrying can never fix) so it short-circuits the loop immediately
/// instead of being retried up to `max_attempts` times.
pub async fn retry_classified<T, E, F, Fut>(
    token: &CancellationToken,
    max_attempts: u32,
    backoff: Backoff,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Outcome<E>>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        if token.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(RetryError::Cancelled),
            result = op() => result,
        };
        match result {
            Ok(value) => return Ok(value),
            Err(Outcome::Terminal(err)) => return Err(RetryError::Exhausted(err)),
            Err(Outcome::Retriable(err)) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted(err))
            }
            Err(Outcome::Retriable(_)) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(backoff.duration_for(attempt)) => {}
                }
            }
        }
    }
}

/// Sleeps `duration` unless `token` is cancelled first, in which case it
/// returns immediately. Used by every suspension point named in spec §5 —
/// the inter-tick wait, `initialDelay` sleeps, wait-gate polling.
pub async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) {
    tokio::select! {
        biased;
        _ = token.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_first_try_without_sleeping() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<_, RetryError<&str>> =
            retry(&token, 3, Backoff::Fixed(Duration::from_secs(1)), || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, &str>(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<i32, RetryError<&str>> =
            retry(&token, 3, Backoff::Linear(Duration::from_millis(100)), || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("boom")
                }
            })
            .await;
        assert!(matches!(result, Err(RetryError::Exhausted("boom"))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_outcome_is_not_retried() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<i32, RetryError<&str>> =
            retry_classified(&token, 3, Backoff::Fixed(Duration::from_secs(1)), || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(Outcome::Terminal("not found"))
                }
            })
            .await;
        assert!(matches!(result, Err(RetryError::Exhausted("not found"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_the_loop() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<i32, RetryError<&str>> =
            retry(&token, 5, Backoff::Fixed(Duration::from_secs(10)), || async {
                Err::<i32, _>("never reached in spirit, but loop still probes once")
            })
            .await;
        assert!(matches!(result, Err(RetryError::Cancelled)));
    }
}
