//! Async retry loop: run an operation until success or the policy says stop.

use std::future::Future;

use super::policy::{ErrorKind, RetryDecision, RetryPolicy};

/// Outcome of [`run_with_retry`] together with the number of attempts made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Runs `op(attempt)` until it succeeds or the policy stops retrying.
///
/// `attempt` is 1-based. Backoff waits on the tokio timer, so a waiting
/// retry never holds a worker thread.
pub async fn run_with_retry<T, E, C, F, Fut>(
    policy: &RetryPolicy,
    classify: C,
    mut op: F,
) -> Result<Attempted<T>, Attempted<E>>
where
    C: Fn(&E) -> ErrorKind,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1u32;
    loop {
        match op(attempt).await {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                })
            }
            Err(e) => {
                let kind = classify(&e);
                match policy.decide(attempt, kind) {
                    RetryDecision::NoRetry => {
                        return Err(Attempted {
                            value: e,
                            attempts: attempt,
                        })
                    }
                    RetryDecision::RetryAfter(delay) => {
                        tracing::debug!(
                            attempt,
                            ?kind,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                }
            }
        }
    }
}
