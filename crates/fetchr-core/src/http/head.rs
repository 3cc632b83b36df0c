//! HEAD probing and response-header parsing.

use std::collections::BTreeMap;
use std::time::Duration;

use super::{ClientError, HttpRequest, TaskClient};

/// Range support as advertised by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeSupport {
    Supported,
    NotSupported,
    #[default]
    Unknown,
}

/// Headers needed for segmented download and resume checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadResult {
    pub content_length: Option<u64>,
    /// `Accept-Ranges: bytes` was present.
    pub accept_ranges: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_disposition: Option<String>,
}

impl HeadResult {
    pub fn range_support(&self) -> RangeSupport {
        if self.accept_ranges {
            RangeSupport::Supported
        } else {
            RangeSupport::NotSupported
        }
    }
}

/// Parse final-response header pairs into a [`HeadResult`].
pub fn parse_headers(headers: &[(String, String)]) -> HeadResult {
    let mut out = HeadResult::default();
    for (name, value) in headers {
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "content-length" => {
                if let Ok(n) = value.parse::<u64>() {
                    out.content_length = Some(n);
                }
            }
            "accept-ranges" => out.accept_ranges = value.eq_ignore_ascii_case("bytes"),
            "etag" => out.etag = Some(value.trim_matches('"').to_string()),
            "last-modified" => out.last_modified = Some(value.to_string()),
            "content-disposition" => out.content_disposition = Some(value.to_string()),
            _ => {}
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("HEAD {url} returned HTTP {status}")]
    Status { url: String, status: u32 },
}

/// HEAD `url` through `client`, following redirects.
///
/// A 404 is retried up to `attempts` times with `pause` between tries; other
/// failures return at once.
pub async fn probe(
    client: &TaskClient,
    url: &str,
    headers: &BTreeMap<String, String>,
    attempts: u32,
    pause: Duration,
) -> Result<HeadResult, ProbeError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        let resp = client
            .send(HttpRequest::head(url).with_headers(headers))
            .await?;
        if resp.is_success() {
            return Ok(parse_headers(&resp.headers));
        }
        if resp.status != 404 || attempt >= attempts {
            return Err(ProbeError::Status {
                url: url.to_string(),
                status: resp.status,
            });
        }
        tracing::debug!(url, attempt, "HEAD returned 404, retrying");
        tokio::time::sleep(pause).await;
        attempt += 1;
    }
}
