//! Async retry helper for flaky remote APIs.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Fixed-delay retry schedule: `retries` additional attempts spaced
/// `delay_ms` apart.
pub fn fixed_retry_strategy(delay_ms: u64, retries: usize) -> impl Iterator<Item = Duration> {
    std::iter::repeat(Duration::from_millis(delay_ms)).take(retries)
}

/// Runs `f` until it succeeds or the schedule is exhausted. Each item of the
/// schedule is the delay slept before the corresponding re-attempt; the last
/// error is returned once no delays remain.
pub async fn retry_async<I, F, Fut, T, E>(strategy: I, mut f: F) -> Result<T, E>
where
    I: IntoIterator<Item = Duration>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delays = strategy.into_iter();
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => match delays.next() {
                Some(delay) => {
                    warn!("Retrying after error: {err}");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err),
            },
        }
    }
}
