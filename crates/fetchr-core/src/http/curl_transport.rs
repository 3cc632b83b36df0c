//! libcurl-backed transport. Each request runs on the blocking pool.

use async_trait::async_trait;
use curl::easy::{Easy, List};
use std::cell::Cell;
use std::io;
use std::str;
use std::time::Duration;

use super::{BodySink, HttpRequest, HttpResponse, HttpTransport, Method, TransportError};

/// Timeouts and identity for [`CurlTransport`].
#[derive(Debug, Clone)]
pub struct CurlOptions {
    pub connect_timeout: Duration,
    /// Hard wall-clock cap for a single request.
    pub timeout: Duration,
    /// Abort when throughput stays below `low_speed_limit` bytes/s for `low_speed_time`.
    pub low_speed_limit: u32,
    pub low_speed_time: Duration,
    pub user_agent: String,
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            timeout: Duration::from_secs(3600),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
            user_agent: concat!("fetchr/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CurlTransport {
    opts: CurlOptions,
}

impl CurlTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(opts: CurlOptions) -> Self {
        Self { opts }
    }
}

#[async_trait]
impl HttpTransport for CurlTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let opts = self.opts.clone();
        tokio::task::spawn_blocking(move || perform(&opts, &request, None))
            .await
            .map_err(|e| TransportError::Other(format!("transfer task failed: {e}")))?
    }

    async fn execute_into(
        &self,
        request: HttpRequest,
        sink: Box<dyn BodySink>,
    ) -> Result<HttpResponse, TransportError> {
        let opts = self.opts.clone();
        tokio::task::spawn_blocking(move || perform(&opts, &request, Some(sink)))
            .await
            .map_err(|e| TransportError::Other(format!("transfer task failed: {e}")))?
    }
}

/// Where body chunks go: straight to a sink once it accepts the status,
/// otherwise into memory.
struct BodyTarget {
    sink: Option<Box<dyn BodySink>>,
    accepted: Option<bool>,
    buffer: Vec<u8>,
    error: Option<io::Error>,
}

impl BodyTarget {
    fn new(sink: Option<Box<dyn BodySink>>) -> Self {
        Self {
            sink,
            accepted: None,
            buffer: Vec::new(),
            error: None,
        }
    }

    /// False aborts the transfer.
    fn take(&mut self, status: u32, data: &[u8]) -> bool {
        let Some(sink) = self.sink.as_mut() else {
            self.buffer.extend_from_slice(data);
            return true;
        };
        if !*self.accepted.get_or_insert_with(|| sink.accept(status)) {
            self.buffer.extend_from_slice(data);
            return true;
        }
        match sink.write(data) {
            Ok(()) => true,
            Err(e) => {
                self.error = Some(e);
                false
            }
        }
    }
}

/// Code from an `HTTP/1.1 206 Partial Content` status line.
fn status_code(line: &str) -> Option<u32> {
    if !line.starts_with("HTTP/") {
        return None;
    }
    line.split_whitespace().nth(1)?.parse().ok()
}

fn setopt(e: curl::Error) -> TransportError {
    TransportError::InvalidRequest(e.to_string())
}

fn map_curl_error(e: curl::Error) -> TransportError {
    if e.is_operation_timedout() {
        return TransportError::Timeout(e.to_string());
    }
    if e.is_url_malformed() || e.is_unsupported_protocol() {
        return TransportError::InvalidRequest(e.to_string());
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
    {
        return TransportError::Connection(e.to_string());
    }
    TransportError::Other(e.to_string())
}

fn perform(
    opts: &CurlOptions,
    req: &HttpRequest,
    sink: Option<Box<dyn BodySink>>,
) -> Result<HttpResponse, TransportError> {
    let mut easy = Easy::new();
    easy.url(&req.url).map_err(setopt)?;
    match req.method {
        Method::Get => easy.get(true).map_err(setopt)?,
        Method::Head => easy.nobody(true).map_err(setopt)?,
        Method::Post => {
            let body = req.form_body().unwrap_or_default();
            easy.post(true).map_err(setopt)?;
            easy.post_fields_copy(body.as_bytes()).map_err(setopt)?;
        }
    }
    easy.follow_location(req.follow_redirects).map_err(setopt)?;
    easy.connect_timeout(opts.connect_timeout).map_err(setopt)?;
    easy.low_speed_limit(opts.low_speed_limit).map_err(setopt)?;
    easy.low_speed_time(opts.low_speed_time).map_err(setopt)?;
    easy.timeout(opts.timeout).map_err(setopt)?;
    easy.useragent(&opts.user_agent).map_err(setopt)?;

    if let Some(proxy) = &req.proxy {
        easy.proxy(proxy.as_str()).map_err(setopt)?;
    }
    match req.range {
        Some((start, end)) => {
            easy.range(&format!("{}-{}", start, end.saturating_sub(1)))
                .map_err(setopt)?;
        }
        // Compressed bodies would break byte offsets, so only whole responses
        // may be encoded.
        None => easy.accept_encoding("").map_err(setopt)?,
    }

    if !req.headers.is_empty() {
        let mut list = List::new();
        for (k, v) in &req.headers {
            list.append(&format!("{}: {}", k.trim(), v.trim()))
                .map_err(setopt)?;
        }
        easy.http_headers(list).map_err(setopt)?;
    }

    let mut target = BodyTarget::new(sink);
    let mut header_lines: Vec<String> = Vec::new();
    // Status of the latest header block; bodies of followed redirects never
    // reach the write callback.
    let last_status = Cell::new(0u32);
    let performed = {
        let mut transfer = easy.transfer();
        transfer
            .write_function(|data| {
                if target.take(last_status.get(), data) {
                    Ok(data.len())
                } else {
                    Ok(0)
                }
            })
            .map_err(setopt)?;
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    let line = s.trim_end();
                    if let Some(code) = status_code(line) {
                        last_status.set(code);
                    }
                    header_lines.push(line.to_string());
                }
                true
            })
            .map_err(setopt)?;
        transfer.perform()
    };
    if let Some(e) = target.error.take() {
        return Err(TransportError::BodyWrite(e.to_string()));
    }
    performed.map_err(map_curl_error)?;

    let status = easy.response_code().map_err(map_curl_error)?;
    Ok(HttpResponse {
        status,
        headers: final_header_block(&header_lines),
        body: target.buffer,
    })
}

/// Headers of the last response only; redirects and `100 Continue` each start
/// a new block with a status line.
fn final_header_block(lines: &[String]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for line in lines {
        if line.starts_with("HTTP/") {
            out.clear();
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            out.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    out
}
