use std::fmt;
use std::sync::Arc;

use super::{BodySink, HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::proxy::{ProxyBinding, ProxyIdentity};
use crate::resolver::ResolvedLink;

/// Where a task's requests leave from.
#[derive(Debug, Clone)]
pub enum Route {
    Direct,
    Proxy(Arc<ProxyBinding>),
}

impl Route {
    pub fn proxy(&self) -> Option<&ProxyIdentity> {
        match self {
            Route::Direct => None,
            Route::Proxy(b) => Some(b.identity()),
        }
    }
}

/// A request tried to leave through something other than the task's binding.
/// Always a bug in the caller, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("affinity violation: {0}")]
pub struct AffinityViolationError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Affinity(#[from] AffinityViolationError),
}

/// Transport pinned to one task's route.
#[derive(Clone)]
pub struct TaskClient {
    transport: Arc<dyn HttpTransport>,
    route: Route,
}

impl fmt::Debug for TaskClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskClient").field("route", &self.route).finish()
    }
}

impl TaskClient {
    pub fn new(transport: Arc<dyn HttpTransport>, binding: Option<Arc<ProxyBinding>>) -> Self {
        let route = match binding {
            Some(b) => Route::Proxy(b),
            None => Route::Direct,
        };
        Self { transport, route }
    }

    pub fn direct(transport: Arc<dyn HttpTransport>) -> Self {
        Self::new(transport, None)
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn proxy(&self) -> Option<&ProxyIdentity> {
        self.route.proxy()
    }

    /// Send through the task's route.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let request = self.stamp(request)?;
        Ok(self.transport.execute(request).await?)
    }

    /// Send through the task's route, streaming an accepted body into `sink`.
    pub async fn send_into(
        &self,
        request: HttpRequest,
        sink: Box<dyn BodySink>,
    ) -> Result<HttpResponse, ClientError> {
        let request = self.stamp(request)?;
        Ok(self.transport.execute_into(request, sink).await?)
    }

    fn stamp(&self, mut request: HttpRequest) -> Result<HttpRequest, AffinityViolationError> {
        let route_proxy = self.proxy().cloned();
        if request.proxy.is_some() && request.proxy != route_proxy {
            return Err(AffinityViolationError(format!(
                "request to {} carries proxy {:?}, task is bound to {:?}",
                request.url, request.proxy, route_proxy
            )));
        }
        request.proxy = route_proxy;
        tracing::trace!(
            method = ?request.method,
            url = %request.url,
            proxy = ?request.proxy.as_ref().map(|p| p.as_str()),
            "http request"
        );
        Ok(request)
    }

    /// A link that needs affinity may only be fetched from the route it was resolved through.
    pub fn check_link(&self, link: &ResolvedLink) -> Result<(), AffinityViolationError> {
        if link.requires_proxy_affinity && link.resolved_via.as_ref() != self.proxy() {
            return Err(AffinityViolationError(format!(
                "link resolved via {:?} fetched via {:?}",
                link.resolved_via,
                self.proxy()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::{status, ScriptedTransport};
    use crate::proxy::{ProxyAffinityBinder, ProxyPool, RoundRobinSelection};
    use crate::resolver::ResolvedLink;

    fn binder() -> ProxyAffinityBinder {
        let pool = ProxyPool::parse("10.0.0.1:80\n10.0.0.2:80\n").unwrap();
        ProxyAffinityBinder::new(pool, Box::<RoundRobinSelection>::default(), 1)
    }

    fn link(requires: bool, via: Option<ProxyIdentity>) -> ResolvedLink {
        ResolvedLink {
            download_url: "https://dl.example/f".into(),
            filename: "f".into(),
            size_bytes: None,
            requires_proxy_affinity: requires,
            min_wait_seconds: 0,
            max_retries: 5,
            headers: Default::default(),
            range_support: Default::default(),
            resolved_via: via,
        }
    }

    #[tokio::test]
    async fn stamps_route_on_every_request() {
        let t = Arc::new(ScriptedTransport::new(|_, _| Ok(status(200))));
        let b = binder();
        let binding = Arc::new(b.try_acquire().unwrap().unwrap());
        let client = TaskClient::new(t.clone(), Some(binding.clone()));
        client.send(HttpRequest::get("https://a.example/1")).await.unwrap();
        client.send(HttpRequest::head("https://b.example/2")).await.unwrap();
        for r in t.requests() {
            assert_eq!(r.request.proxy.as_ref(), Some(binding.identity()));
        }
    }

    #[tokio::test]
    async fn foreign_proxy_is_rejected_before_sending() {
        let t = Arc::new(ScriptedTransport::new(|_, _| Ok(status(200))));
        let b = binder();
        let mine = Arc::new(b.try_acquire().unwrap().unwrap());
        let other = b.try_acquire().unwrap().unwrap();
        let client = TaskClient::new(t.clone(), Some(mine));

        let mut req = HttpRequest::get("https://a.example/1");
        req.proxy = Some(other.identity().clone());
        let err = client.send(req).await.unwrap_err();
        assert!(matches!(err, ClientError::Affinity(_)));
        assert!(t.requests().is_empty());

        let direct = TaskClient::direct(t.clone());
        let mut req = HttpRequest::get("https://a.example/1");
        req.proxy = Some(other.identity().clone());
        assert!(direct.send(req).await.is_err());
    }

    #[test]
    fn check_link_enforces_resolving_route() {
        let t = Arc::new(ScriptedTransport::new(|_, _| Ok(status(200))));
        let b = binder();
        let mine = Arc::new(b.try_acquire().unwrap().unwrap());
        let client = TaskClient::new(t.clone(), Some(mine.clone()));
        let direct = TaskClient::direct(t);

        let pinned = link(true, Some(mine.identity().clone()));
        assert!(client.check_link(&pinned).is_ok());
        assert!(direct.check_link(&pinned).is_err());

        let direct_pinned = link(true, None);
        assert!(direct.check_link(&direct_pinned).is_ok());
        assert!(client.check_link(&direct_pinned).is_err());

        let free = link(false, None);
        assert!(client.check_link(&free).is_ok());
    }
}
