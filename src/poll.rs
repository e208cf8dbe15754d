//! Deadline-bounded polling

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// How a [`poll`] loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut,
    Cancelled,
}

/// Call `probe` until it yields a value or `timeout` has passed.
///
/// The probe always runs at least once. Between attempts the loop sleeps
/// for `interval`; cancelling `cancel` cuts the sleep short.
pub async fn poll<T, F, Fut>(
    mut probe: F,
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;

    loop {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }
        if let Some(value) = probe().await {
            return PollOutcome::Ready(value);
        }
        if Instant::now() >= deadline {
            return PollOutcome::TimedOut;
        }

        tokio::select! {
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            _ = sleep(interval) => {}
        }
    }
}
