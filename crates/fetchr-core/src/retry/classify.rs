//! Map HTTP statuses, transport failures and segment errors to [`ErrorKind`].

use super::error::SegmentError;
use super::policy::ErrorKind;
use crate::http::TransportError;

/// Classify an HTTP status for retry decisions.
///
/// A 404 from a backend reached through a pinned proxy is a routing miss
/// (the load balancer sent us to a node without the token) and is retried.
/// Without affinity a 404 means the resource does not exist.
pub fn classify_http_status(code: u32, affinity_bound: bool) -> ErrorKind {
    match code {
        404 if affinity_bound => ErrorKind::BackendMiss,
        408 => ErrorKind::Timeout,
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code as u16),
        _ => ErrorKind::Permanent,
    }
}

pub fn classify_transport_error(e: &TransportError) -> ErrorKind {
    match e {
        TransportError::Timeout(_) => ErrorKind::Timeout,
        TransportError::Connection(_) | TransportError::Other(_) => ErrorKind::Connection,
        TransportError::InvalidRequest(_) | TransportError::BodyWrite(_) => ErrorKind::Permanent,
    }
}

pub fn classify_segment_error(e: &SegmentError, affinity_bound: bool) -> ErrorKind {
    match e {
        SegmentError::Transport(t) => classify_transport_error(t),
        SegmentError::Http(code) => classify_http_status(*code, affinity_bound),
        SegmentError::PartialTransfer { .. } => ErrorKind::Connection,
        SegmentError::RangeIgnored | SegmentError::Storage(_) | SegmentError::Affinity(_) => {
            ErrorKind::Permanent
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_429_and_503_throttled() {
        assert_eq!(classify_http_status(429, false), ErrorKind::Throttled);
        assert_eq!(classify_http_status(503, true), ErrorKind::Throttled);
    }

    #[test]
    fn http_5xx_retryable() {
        assert_eq!(classify_http_status(500, false), ErrorKind::Http5xx(500));
        assert_eq!(classify_http_status(502, false), ErrorKind::Http5xx(502));
        assert!(classify_http_status(504, false).is_transient());
    }

    #[test]
    fn http_404_depends_on_affinity() {
        assert_eq!(classify_http_status(404, true), ErrorKind::BackendMiss);
        assert_eq!(classify_http_status(404, false), ErrorKind::Permanent);
    }

    #[test]
    fn http_4xx_permanent() {
        for code in [400, 401, 403, 410, 416] {
            assert_eq!(classify_http_status(code, true), ErrorKind::Permanent, "{code}");
        }
        assert_eq!(classify_http_status(408, false), ErrorKind::Timeout);
    }

    #[test]
    fn segment_errors() {
        let short = SegmentError::PartialTransfer {
            expected: 10,
            received: 3,
        };
        assert_eq!(classify_segment_error(&short, false), ErrorKind::Connection);
        assert_eq!(
            classify_segment_error(&SegmentError::RangeIgnored, false),
            ErrorKind::Permanent
        );
        let disk = SegmentError::Storage(std::io::Error::new(
            std::io::ErrorKind::Other,
            "no space left on device",
        ));
        assert_eq!(classify_segment_error(&disk, true), ErrorKind::Permanent);
        let timeout = SegmentError::Transport(TransportError::Timeout("read".into()));
        assert_eq!(classify_segment_error(&timeout, false), ErrorKind::Timeout);
        let invalid = SegmentError::Transport(TransportError::InvalidRequest("bad url".into()));
        assert_eq!(classify_segment_error(&invalid, false), ErrorKind::Permanent);
    }
}
