use std::time::Duration;

use crate::captcha::MalformedCaptchaError;
use crate::http::AffinityViolationError;
use crate::retry::{classify_http_status, ErrorKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid share URL {0:?}")]
    InvalidUrl(String),
    /// Share page could not be fetched. `status` is `None` for transport failures.
    #[error("fetch share page {url}: {reason}")]
    PageFetch {
        url: String,
        status: Option<u32>,
        reason: String,
    },
    /// Page structure changed; retrying will not help.
    #[error("download form not found on {0}")]
    FormNotFound(String),
    #[error(transparent)]
    MalformedCaptcha(#[from] MalformedCaptchaError),
    /// Form went out (or the server says it went out) before the countdown ended.
    #[error("form submitted {elapsed:?} after page fetch, host requires {required:?}")]
    CountdownViolation { elapsed: Duration, required: Duration },
    /// Redirect missing or the host answered with an error payload.
    #[error("resolution failed: {0}")]
    Resolution(String),
    #[error(transparent)]
    Affinity(#[from] AffinityViolationError),
}

impl ResolveError {
    /// Classification for the orchestrator's resolve retry loop.
    pub fn retry_kind(&self) -> ErrorKind {
        match self {
            ResolveError::PageFetch { status: None, .. } => ErrorKind::Connection,
            ResolveError::PageFetch {
                status: Some(code), ..
            } => classify_http_status(*code, false),
            ResolveError::Resolution(_) => ErrorKind::Connection,
            ResolveError::InvalidUrl(_)
            | ResolveError::FormNotFound(_)
            | ResolveError::MalformedCaptcha(_)
            | ResolveError::CountdownViolation { .. }
            | ResolveError::Affinity(_) => ErrorKind::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_fetch_and_resolution_are_retryable() {
        let transport = ResolveError::PageFetch {
            url: "u".into(),
            status: None,
            reason: "reset".into(),
        };
        assert!(transport.retry_kind().is_transient());
        let busy = ResolveError::PageFetch {
            url: "u".into(),
            status: Some(503),
            reason: "HTTP 503".into(),
        };
        assert_eq!(busy.retry_kind(), ErrorKind::Throttled);
        assert!(ResolveError::Resolution("no redirect".into())
            .retry_kind()
            .is_transient());
    }

    #[test]
    fn structural_failures_are_permanent() {
        let gone = ResolveError::PageFetch {
            url: "u".into(),
            status: Some(404),
            reason: "HTTP 404".into(),
        };
        assert_eq!(gone.retry_kind(), ErrorKind::Permanent);
        assert_eq!(ResolveError::FormNotFound("u".into()).retry_kind(), ErrorKind::Permanent);
        assert_eq!(
            ResolveError::MalformedCaptcha(MalformedCaptchaError::Empty).retry_kind(),
            ErrorKind::Permanent
        );
    }
}
