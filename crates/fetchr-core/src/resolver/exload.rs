//! ex-load.com: captcha form behind a countdown, answered with a redirect to
//! a backend node that only honours the IP that solved it.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

use super::{ResolveError, ResolvedLink, Resolver};
use crate::captcha;
use crate::html;
use crate::http::{self, ClientError, HttpRequest, HttpResponse, RangeSupport, TaskClient};
use crate::url_model;

pub const DEFAULT_COUNTDOWN: Duration = Duration::from_secs(60);

const FORM_OP: &str = "download2";
const CAPTCHA_DIGITS: usize = 4;
const SKIPPED_COUNTDOWN_MARKER: &str = "Skipped countdown";
const WRONG_CAPTCHA_MARKER: &str = "Wrong captcha";

#[derive(Debug, Clone)]
pub struct ExLoadResolver {
    countdown: Duration,
    max_retries: u32,
    captcha_attempts: u32,
    probe_pause: Duration,
    headers: BTreeMap<String, String>,
}

impl ExLoadResolver {
    pub fn new(max_retries: u32) -> Self {
        let headers = [
            (
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
            ("Accept-Language", "en-US,en;q=0.5"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            countdown: DEFAULT_COUNTDOWN,
            max_retries: max_retries.max(1),
            captcha_attempts: 3,
            probe_pause: Duration::from_millis(500),
            headers,
        }
    }

    pub fn with_countdown(mut self, countdown: Duration) -> Self {
        self.countdown = countdown;
        self
    }

    /// Fresh page + fresh decode budget when the host rejects a code.
    pub fn with_captcha_attempts(mut self, attempts: u32) -> Self {
        self.captcha_attempts = attempts.max(1);
        self
    }

    pub fn with_probe_pause(mut self, pause: Duration) -> Self {
        self.probe_pause = pause;
        self
    }

    async fn fetch_page(&self, share_url: &str, client: &TaskClient) -> Result<String, ResolveError> {
        let page = client
            .send(HttpRequest::get(share_url).with_headers(&self.headers))
            .await
            .map_err(|e| match e {
                ClientError::Affinity(a) => ResolveError::Affinity(a),
                ClientError::Transport(t) => ResolveError::PageFetch {
                    url: share_url.to_string(),
                    status: None,
                    reason: t.to_string(),
                },
            })?;
        if !page.is_success() {
            return Err(ResolveError::PageFetch {
                url: share_url.to_string(),
                status: Some(page.status),
                reason: format!("HTTP {}", page.status),
            });
        }
        Ok(page.text().into_owned())
    }

    async fn submit(
        &self,
        target: &str,
        fields: Vec<(String, String)>,
        client: &TaskClient,
    ) -> Result<HttpResponse, ResolveError> {
        client
            .send(HttpRequest::post_form(target, fields).with_headers(&self.headers))
            .await
            .map_err(|e| match e {
                ClientError::Affinity(a) => ResolveError::Affinity(a),
                ClientError::Transport(t) => ResolveError::Resolution(format!("form submit: {t}")),
            })
    }

    /// Build the link, probing size through the same route. A failed probe
    /// leaves the size unknown.
    async fn finish(&self, download_url: String, client: &TaskClient) -> ResolvedLink {
        let filename = url_model::derive_filename(&download_url, None);
        let (size_bytes, range_support) = match http::probe(
            client,
            &download_url,
            &BTreeMap::new(),
            self.max_retries,
            self.probe_pause,
        )
        .await
        {
            Ok(head) => (head.content_length, head.range_support()),
            Err(e) => {
                tracing::warn!(url = %download_url, error = %e, "size probe failed, size unknown");
                (None, RangeSupport::Unknown)
            }
        };
        ResolvedLink {
            download_url,
            filename,
            size_bytes,
            requires_proxy_affinity: true,
            min_wait_seconds: self.countdown.as_secs(),
            max_retries: self.max_retries,
            headers: BTreeMap::new(),
            range_support,
            resolved_via: client.proxy().cloned(),
        }
    }
}

#[async_trait]
impl Resolver for ExLoadResolver {
    fn name(&self) -> &'static str {
        "exload"
    }

    fn requires_affinity(&self) -> bool {
        true
    }

    async fn resolve(
        &self,
        share_url: &str,
        client: &TaskClient,
    ) -> Result<ResolvedLink, ResolveError> {
        let base = url::Url::parse(share_url)
            .map_err(|_| ResolveError::InvalidUrl(share_url.to_string()))?;

        for attempt in 1..=self.captcha_attempts {
            let page = self.fetch_page(share_url, client).await?;
            // The host starts its timer when it issues the page, so count
            // from receipt, never from when the request left.
            let page_fetched_at = Instant::now();

            let mut form = html::find_form_by_field(&page, "op", FORM_OP)
                .ok_or_else(|| ResolveError::FormNotFound(share_url.to_string()))?;
            if let Some(block) = html::find_captcha_block(&page) {
                let code = captcha::decode(block, CAPTCHA_DIGITS)?;
                tracing::debug!(share_url, attempt, code = %code, "captcha decoded");
                form.set_field("code", &code);
            }
            form.set_field("adblock_detected", "0");

            tracing::info!(
                share_url,
                wait_secs = self.countdown.as_secs(),
                "waiting out host countdown"
            );
            tokio::time::sleep_until(page_fetched_at + self.countdown).await;
            let elapsed = page_fetched_at.elapsed();
            if elapsed < self.countdown {
                return Err(ResolveError::CountdownViolation {
                    elapsed,
                    required: self.countdown,
                });
            }

            let target = match form.action.as_deref() {
                Some(action) => base
                    .join(action)
                    .map_err(|_| ResolveError::Resolution(format!("bad form action {action:?}")))?
                    .to_string(),
                None => share_url.to_string(),
            };
            let resp = self.submit(&target, form.fields, client).await?;

            if resp.is_redirect() {
                let location = resp
                    .location()
                    .ok_or_else(|| ResolveError::Resolution("redirect without Location".into()))?;
                let download_url = base
                    .join(location)
                    .map_err(|_| ResolveError::Resolution(format!("bad redirect {location:?}")))?;
                tracing::info!(share_url, url = %download_url, "resolved via redirect");
                return Ok(self.finish(download_url.into(), client).await);
            }

            let body = resp.text();
            if body.contains(SKIPPED_COUNTDOWN_MARKER) {
                return Err(ResolveError::CountdownViolation {
                    elapsed,
                    required: self.countdown,
                });
            }
            if body.contains(WRONG_CAPTCHA_MARKER) {
                tracing::warn!(share_url, attempt, "host rejected captcha code");
                continue;
            }
            if resp.is_success() {
                if let Some(download_url) = html::find_direct_link(&body, &base) {
                    tracing::info!(share_url, url = %download_url, "resolved via page link");
                    return Ok(self.finish(download_url, client).await);
                }
            }
            return Err(ResolveError::Resolution(format!(
                "no redirect after form submit (HTTP {})",
                resp.status
            )));
        }

        Err(ResolveError::Resolution(format!(
            "captcha rejected {} times",
            self.captcha_attempts
        )))
    }
}
