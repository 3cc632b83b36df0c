//! Minimal HTTP/1.1 server with HEAD and Range GET for integration tests.
//!
//! Serves one static body at any path. GETs can be told to answer 404 for a
//! while, the way an affinity-bound backend does when a request lands on the
//! wrong node.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RangeServerOptions {
    /// If false, HEAD returns 405.
    pub head_allowed: bool,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If false, omit `Accept-Ranges: bytes` even if ranges work.
    pub advertise_ranges: bool,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            support_ranges: true,
            advertise_ranges: true,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    gets: AtomicUsize,
    heads: AtomicUsize,
    fail_gets: AtomicUsize,
}

/// Handle on a running server. The server lives until the process exits.
#[derive(Debug, Clone)]
pub struct RangeServer {
    base: String,
    counters: Arc<Counters>,
}

impl RangeServer {
    /// `http://127.0.0.1:<port>/<path>`
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path.trim_start_matches('/'))
    }

    /// The next `n` GETs answer 404.
    pub fn fail_next_gets(&self, n: usize) {
        self.counters.fail_gets.store(n, Ordering::SeqCst);
    }

    pub fn gets(&self) -> usize {
        self.counters.gets.load(Ordering::SeqCst)
    }

    pub fn heads(&self) -> usize {
        self.counters.heads.load(Ordering::SeqCst)
    }
}

pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let counters = Arc::new(Counters::default());
    let shared = Arc::clone(&counters);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let counters = Arc::clone(&shared);
            thread::spawn(move || handle(stream, &body, opts, &counters));
        }
    });
    RangeServer {
        base: format!("http://127.0.0.1:{port}/"),
        counters,
    }
}

/// Take one from the 404 budget, if any is left.
fn take_failure(counters: &Counters) -> bool {
    counters
        .fail_gets
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn handle(mut stream: TcpStream, body: &[u8], opts: RangeServerOptions, counters: &Counters) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let (method, range) = parse_request(request);
    let total = body.len() as u64;
    let accept_ranges = if opts.advertise_ranges && opts.support_ranges {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };

    if method.eq_ignore_ascii_case("HEAD") {
        counters.heads.fetch_add(1, Ordering::SeqCst);
        if !opts.head_allowed {
            let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
            return;
        }
        let response = format!("HTTP/1.1 200 OK\r\nContent-Length: {total}\r\n{accept_ranges}\r\n");
        let _ = stream.write_all(response.as_bytes());
        return;
    }
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
        return;
    }

    counters.gets.fetch_add(1, Ordering::SeqCst);
    if take_failure(counters) {
        let _ = stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
        return;
    }

    let (status, slice) = match range.filter(|_| opts.support_ranges) {
        Some((start, end_incl)) => {
            let end_incl = end_incl.min(total.saturating_sub(1));
            if start > end_incl {
                ("416 Range Not Satisfiable".to_string(), &body[0..0])
            } else {
                let slice = &body[start as usize..=end_incl as usize];
                (
                    format!("206 Partial Content\r\nContent-Range: bytes {start}-{end_incl}/{total}"),
                    slice,
                )
            }
        }
        None => ("200 OK".to_string(), body),
    };
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\n{accept_ranges}\r\n",
        slice.len()
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.write_all(slice);
}

/// (method, optional (start, end_inclusive) from `Range: bytes=X-Y`).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut lines = request.lines();
    let method = lines
        .next()
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or("");
    let range = lines
        .take_while(|l| !l.trim().is_empty())
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("range"))
        .and_then(|(_, value)| {
            let spec = value.trim().strip_prefix("bytes=")?;
            let (a, b) = spec.split_once('-')?;
            let start = a.trim().parse().ok()?;
            let end = match b.trim() {
                "" => u64::MAX,
                b => b.parse().ok()?,
            };
            Some((start, end))
        });
    (method, range)
}
