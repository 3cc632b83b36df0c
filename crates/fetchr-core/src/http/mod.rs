//! HTTP transport seam.
//!
//! Everything that touches the network goes through [`HttpTransport`]:
//! share-page fetches, form submits, HEAD probes and ranged segment GETs.
//! [`CurlTransport`] is the production implementation (libcurl on the
//! blocking pool); tests plug in scripted transports. [`TaskClient`] binds a
//! transport to one task's route so every request of that task leaves through
//! the same proxy.

mod client;
mod curl_transport;
mod head;

use async_trait::async_trait;
use std::borrow::Cow;
use std::io;

use crate::proxy::ProxyIdentity;

pub use client::{AffinityViolationError, ClientError, Route, TaskClient};
pub use curl_transport::{CurlOptions, CurlTransport};
pub use head::{parse_headers, probe, HeadResult, ProbeError, RangeSupport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
}

/// One outbound request. `range` is half-open `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// `application/x-www-form-urlencoded` body for POST.
    pub form: Option<Vec<(String, String)>>,
    pub range: Option<(u64, u64)>,
    pub follow_redirects: bool,
    /// Proxy to route through; stamped by [`TaskClient`], never set by callers.
    pub proxy: Option<ProxyIdentity>,
}

impl HttpRequest {
    fn new(method: Method, url: &str) -> Self {
        Self {
            method,
            url: url.to_string(),
            headers: Vec::new(),
            form: None,
            range: None,
            follow_redirects: true,
            proxy: None,
        }
    }

    pub fn get(url: &str) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn head(url: &str) -> Self {
        Self::new(Method::Head, url)
    }

    /// Form POST with redirects disabled (the redirect *is* the answer).
    pub fn post_form(url: &str, fields: Vec<(String, String)>) -> Self {
        let mut req = Self::new(Method::Post, url);
        req.form = Some(fields);
        req.follow_redirects = false;
        req
    }

    pub fn with_range(mut self, start: u64, end: u64) -> Self {
        self.range = Some((start, end));
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_headers<'a, I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (k, v) in headers {
            self.headers.push((k.clone(), v.clone()));
        }
        self
    }

    /// Encoded form body, if any.
    pub fn form_body(&self) -> Option<String> {
        self.form.as_ref().map(|fields| {
            url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .finish()
        })
    }
}

/// Final response of a request (after redirects, when followed).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u32,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// First header with this name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location").filter(|l| !l.is_empty())
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Failure below HTTP: no status line was received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("transport failure: {0}")]
    Other(String),
    /// The body sink refused a chunk; the transfer was aborted.
    #[error("body write failed: {0}")]
    BodyWrite(String),
}

/// Receives a response body chunk by chunk as it arrives.
pub trait BodySink: Send + 'static {
    /// Asked once, before the first chunk. A rejected body is kept in the
    /// returned [`HttpResponse`] instead.
    fn accept(&mut self, status: u32) -> bool;

    fn write(&mut self, data: &[u8]) -> io::Result<()>;
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Like [`execute`](Self::execute), but an accepted body goes to `sink`
    /// and the returned response has an empty body. The default buffers the
    /// whole response first; streaming transports override it.
    async fn execute_into(
        &self,
        request: HttpRequest,
        mut sink: Box<dyn BodySink>,
    ) -> Result<HttpResponse, TransportError> {
        let mut resp = self.execute(request).await?;
        if resp.body.is_empty() || !sink.accept(resp.status) {
            return Ok(resp);
        }
        let body = std::mem::take(&mut resp.body);
        tokio::task::spawn_blocking(move || sink.write(&body))
            .await
            .map_err(|e| TransportError::Other(format!("body write task failed: {e}")))?
            .map_err(|e| TransportError::BodyWrite(e.to_string()))?;
        Ok(resp)
    }
}

#[cfg(test)]
pub(crate) mod testing;
