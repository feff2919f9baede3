#![warn(missing_docs)]
//! Wraps a fallible async unit with bounded attempts and exponential
//! backoff.
//!
//! The executor itself holds no semaphore permit: callers pass
//! `release`/`reacquire` hooks so a retry's backoff sleep happens outside
//! the swarm's concurrency bound, matching the scheduling invariant that a
//! backing-off unit does not occupy a permit.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Configuration for one retry-wrapped unit.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first. `1` means no retry.
    pub max_attempts: u32,
    /// Base backoff in milliseconds; attempt `n` (1-indexed) sleeps
    /// `backoff_ms * 2^(n-1)` before attempt `n+1`.
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig { max_attempts: 1, backoff_ms: 0 }
    }
}

impl RetryConfig {
    /// Construct a config that retries `max_attempts` times with the given
    /// base backoff.
    pub fn new(max_attempts: u32, backoff_ms: u64) -> Self {
        RetryConfig { max_attempts: max_attempts.max(1), backoff_ms }
    }

    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

/// The outcome of [`execute`]: the final attempt's value and how many
/// retries (attempts beyond the first) were taken.
pub struct RetryOutcome<T> {
    /// The value returned by the attempt that stopped the loop — either
    /// the first one `retry_on` rejected, or the last one taken.
    pub value: T,
    /// Number of retries taken, i.e. `attempts - 1`.
    pub retries: u32,
}

/// Run `unit` up to `config.max_attempts` times, stopping as soon as
/// `retry_on` returns `false` for a result or attempts are exhausted.
///
/// `unit` is invoked with the 1-based attempt number. Between attempts,
/// `release_permit` runs before the backoff sleep and `reacquire_permit`
/// runs after it, so the caller's concurrency permit is not held while
/// backing off.
pub async fn execute<T, Fut, Unit, RetryOn, Release, ReleaseFut, Reacquire, ReacquireFut>(
    config: RetryConfig,
    mut unit: Unit,
    retry_on: RetryOn,
    mut release_permit: Release,
    mut reacquire_permit: Reacquire,
) -> RetryOutcome<T>
where
    Fut: Future<Output = T>,
    Unit: FnMut(u32) -> Fut,
    RetryOn: Fn(&T) -> bool,
    Release: FnMut() -> ReleaseFut,
    ReleaseFut: Future<Output = ()>,
    Reacquire: FnMut() -> ReacquireFut,
    ReacquireFut: Future<Output = ()>,
{
    let mut attempt = 1u32;
    loop {
        let value = unit(attempt).await;

        let should_retry = attempt < config.max_attempts && retry_on(&value);
        if !should_retry {
            return RetryOutcome { value, retries: attempt - 1 };
        }

        debug!(target: "evolve.retry", attempt, max_attempts = config.max_attempts, "retrying after backoff");
        release_permit().await;
        tokio::time::sleep(config.backoff_for_attempt(attempt)).await;
        reacquire_permit().await;

        attempt += 1;
    }
}

/// `execute` with no-op permit hooks, for callers outside a semaphore-bound
/// swarm (e.g. a standalone retry-wrapped session run).
pub async fn execute_unbounded<T, Fut, Unit, RetryOn>(
    config: RetryConfig,
    unit: Unit,
    retry_on: RetryOn,
) -> RetryOutcome<T>
where
    Fut: Future<Output = T>,
    Unit: FnMut(u32) -> Fut,
    RetryOn: Fn(&T) -> bool,
{
    execute(config, unit, retry_on, || async {}, || async {}).await
}
