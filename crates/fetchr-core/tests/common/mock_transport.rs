//! In-memory `HttpTransport` for integration tests: a closure answers each
//! request, and every request is logged with its proxy and send time.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Instant;

use fetchr_core::http::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError};

type Handler = Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

#[derive(Debug, Clone)]
pub struct Logged {
    pub request: HttpRequest,
    pub at: Instant,
}

pub struct MockTransport {
    handler: Handler,
    log: Mutex<Vec<Logged>>,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Logged> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.log.lock().unwrap().push(Logged {
            request: request.clone(),
            at: Instant::now(),
        });
        Ok((self.handler)(&request))
    }
}

pub fn page(body: &str) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: vec![("Content-Type".into(), "text/html".into())],
        body: body.as_bytes().to_vec(),
    }
}

pub fn redirect(location: &str) -> HttpResponse {
    HttpResponse {
        status: 302,
        headers: vec![("Location".into(), location.into())],
        body: Vec::new(),
    }
}

/// HEAD → size and `Accept-Ranges`; ranged GET → 206 slice; plain GET → 200.
pub fn serve(req: &HttpRequest, data: &[u8]) -> HttpResponse {
    let len = data.len() as u64;
    match (req.method, req.range) {
        (Method::Head, _) => HttpResponse {
            status: 200,
            headers: vec![
                ("Content-Length".into(), len.to_string()),
                ("Accept-Ranges".into(), "bytes".into()),
            ],
            body: Vec::new(),
        },
        (_, Some((start, end))) => HttpResponse {
            status: 206,
            headers: Vec::new(),
            body: data[start as usize..end.min(len) as usize].to_vec(),
        },
        (_, None) => HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: data.to_vec(),
        },
    }
}
