//! Scripted transport for unit tests: answers from a closure and records
//! every request with the proxy it carried and when it was sent.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError};

type Handler = Box<dyn Fn(&HttpRequest, u32) -> Result<HttpResponse, TransportError> + Send + Sync>;

#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub request: HttpRequest,
    pub at: tokio::time::Instant,
}

pub(crate) struct ScriptedTransport {
    handler: Handler,
    log: Mutex<Vec<Recorded>>,
    seen: Mutex<HashMap<(Method, String, Option<(u64, u64)>), u32>>,
}

impl ScriptedTransport {
    /// `handler(request, n)` where `n` counts identical requests (same method,
    /// URL and range), starting at 1.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest, u32) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            log: Mutex::new(Vec::new()),
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let n = {
            let mut seen = self.seen.lock().unwrap();
            let n = seen
                .entry((request.method, request.url.clone(), request.range))
                .or_insert(0);
            *n += 1;
            *n
        };
        self.log.lock().unwrap().push(Recorded {
            request: request.clone(),
            at: tokio::time::Instant::now(),
        });
        (self.handler)(&request, n)
    }
}

pub(crate) fn status(code: u32) -> HttpResponse {
    HttpResponse {
        status: code,
        ..Default::default()
    }
}

pub(crate) fn html(body: &str) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: vec![("Content-Type".into(), "text/html".into())],
        body: body.as_bytes().to_vec(),
    }
}

pub(crate) fn redirect(location: &str) -> HttpResponse {
    HttpResponse {
        status: 302,
        headers: vec![("Location".into(), location.into())],
        body: Vec::new(),
    }
}

/// Serve `data` honouring the request's range (206) or whole (200).
pub(crate) fn serve_bytes(req: &HttpRequest, data: &[u8]) -> HttpResponse {
    let len = data.len() as u64;
    match req.method {
        Method::Head => HttpResponse {
            status: 200,
            headers: vec![
                ("Content-Length".into(), len.to_string()),
                ("Accept-Ranges".into(), "bytes".into()),
            ],
            body: Vec::new(),
        },
        _ => match req.range {
            Some((start, end)) => {
                let end = end.min(len);
                HttpResponse {
                    status: 206,
                    headers: vec![(
                        "Content-Range".into(),
                        format!("bytes {}-{}/{}", start, end.saturating_sub(1), len),
                    )],
                    body: data[start as usize..end as usize].to_vec(),
                }
            }
            None => HttpResponse {
                status: 200,
                headers: vec![("Content-Length".into(), len.to_string())],
                body: data.to_vec(),
            },
        },
    }
}
