use std::time::Duration;

/// Classification of a failure for retry purposes.
///
/// Everything except `Permanent` is transient and consumes retry budget;
/// `Permanent` aborts regardless of the remaining budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation timed out (connect/read).
    Timeout,
    /// Server asked us to slow down (e.g. 429, 503).
    Throttled,
    /// Network-level failure (connection reset, DNS, short body, etc.).
    Connection,
    /// Retryable 5xx.
    Http5xx(u16),
    /// 404 on a well-formed request to an affinity-bound backend: the
    /// load balancer routed it to a node that doesn't hold the token.
    BackendMiss,
    /// Malformed request, authentication failure, unsupported range, disk error.
    Permanent,
}

impl ErrorKind {
    pub fn is_transient(self) -> bool {
        !matches!(self, ErrorKind::Permanent)
    }
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Give up: budget exhausted or permanent failure.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Capped exponential backoff with a fixed attempt budget.
///
/// `max_attempts` counts every attempt including the first, so a host that
/// declares `max_retries = 5` gets exactly five tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Same backoff, different attempt budget (host-declared `max_retries`).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Decide what to do after attempt number `attempt` (1-based) failed with `kind`.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if !kind.is_transient() || attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.backoff(attempt, kind))
    }

    /// base * 2^(attempt-1), capped at `max_delay`. Throttling starts one step higher.
    fn backoff(&self, attempt: u32, kind: ErrorKind) -> Duration {
        let step = match kind {
            ErrorKind::Throttled => attempt,
            _ => attempt.saturating_sub(1),
        };
        let factor = 1u32 << step.min(8);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}
