use std::future::Future;
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

/// Interval between readiness checks
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Poll `check` until it reports ready or `deadline` elapses.
///
/// Returns `Ok(true)` once ready and `Ok(false)` when the deadline passes
/// first. Errors from `check` end the poll immediately.
pub async fn poll_until<F, Fut, E>(
    what: &str,
    deadline: Duration,
    interval: Duration,
    mut check: F,
) -> Result<bool, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if check().await? {
            debug!(target: "readiness", what = what, attempts = attempts,
                elapsed_ms = start.elapsed().as_millis() as u64, "ready");
            return Ok(true);
        }

        let elapsed = start.elapsed();
        if elapsed >= deadline {
            debug!(target: "readiness", what = what, attempts = attempts, "deadline reached");
            return Ok(false);
        }

        sleep(interval.min(deadline - elapsed)).await;
    }
}
