use std::future::Future;

use chrono::{SecondsFormat, Utc};
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::retry::{RetryError, RetryPolicy, RetryState};

/// 128 random bits, lowercase hex.
pub fn generate_notification_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Sleeps for `duration` unless `shutdown` fires first. Returns `false` when
/// the wait was cut short.
pub async fn sleep_or_cancelled(duration: Duration, shutdown: &CancellationToken) -> bool {
    if shutdown.is_cancelled() {
        return false;
    }

    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

/// Runs `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, or the policy's budget is spent. Waits `base_delay * attempt`
/// between attempts; an attempt already running is never interrupted, but no
/// new wait starts once `shutdown` is cancelled.
pub async fn retry_with_policy<F, Fut, T, E, R>(
    policy: &RetryPolicy,
    shutdown: &CancellationToken,
    is_retryable: R,
    mut operation: F,
) -> Result<(T, u32), RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let mut state = RetryState::new(policy);

    loop {
        let attempt = state.begin_attempt();

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        attempt,
                        max_attempts = state.max_attempts,
                        "Retry succeeded"
                    );
                }
                return Ok((result, attempt));
            }
            Err(e) if !is_retryable(&e) => {
                warn!(attempt, error = %e, "Non-retryable failure, giving up");
                return Err(RetryError::Fatal { attempts: attempt, error: e });
            }
            Err(e) => {
                let Some(delay) = state.next_delay() else {
                    warn!(
                        max_attempts = state.max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                };

                debug!(
                    attempt,
                    max_attempts = state.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retry attempt failed, backing off"
                );

                if !sleep_or_cancelled(delay, shutdown).await {
                    return Err(RetryError::Cancelled {
                        attempts: attempt,
                        last_error: e,
                    });
                }
            }
        }
    }
}
