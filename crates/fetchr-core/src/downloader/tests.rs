use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::config::RetryConfig;
use crate::http::testing::{html, redirect, serve_bytes, status, ScriptedTransport};
use crate::http::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError};
use crate::proxy::{ProxyIdentity, RoundRobinSelection};
use crate::resolver::{ExLoadResolver, PassThroughResolver};
use crate::resume_db::open_memory;

fn payload(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

fn config() -> FetchrConfig {
    let mut cfg = FetchrConfig {
        segment_size_bytes: 256,
        retry: Some(RetryConfig {
            max_attempts: 5,
            base_delay_secs: 0.001,
            max_delay_secs: 1,
        }),
        ..FetchrConfig::default()
    };
    cfg.hosts.insert(
        "ex-load.com".into(),
        HostConfig {
            resolver: "exload".into(),
            max_connections: 1,
            max_concurrent: 2,
            use_proxy_affinity: true,
            max_retries: 5,
            accelerator_enabled: false,
            countdown_secs: Some(0),
        },
    );
    cfg.hosts.insert(
        "cdn.example.com".into(),
        HostConfig {
            max_connections: 4,
            max_concurrent: 4,
            max_retries: 2,
            ..HostConfig::default()
        },
    );
    cfg
}

fn registry() -> ResolverRegistry {
    let mut registry = ResolverRegistry::new(Arc::new(PassThroughResolver::new(2)));
    registry.register(
        "ex-load.com",
        Arc::new(
            ExLoadResolver::new(5)
                .with_countdown(Duration::ZERO)
                .with_probe_pause(Duration::from_millis(1)),
        ),
    );
    registry
}

fn share_page(id: &str) -> String {
    format!(
        r#"<html><body>
        <form name="F1" method="POST">
          <input type="hidden" name="op" value="download2">
          <input type="hidden" name="id" value="{id}">
          <input type="hidden" name="rand" value="r{id}">
        </form></body></html>"#
    )
}

/// ex-load.com share pages for `aaa` and `bbb`, a CDN with one file, and
/// a CDN path that always answers 403.
fn site(files: Vec<(&'static str, Vec<u8>)>) -> Arc<ScriptedTransport> {
    Arc::new(ScriptedTransport::new(move |req: &HttpRequest, _| {
        for (id, data) in &files {
            let share = format!("https://ex-load.com/{id}/file-{id}.bin.html");
            let direct = format!("https://s1.ex-load.com/d/{id}/file-{id}.bin");
            let cdn = format!("https://cdn.example.com/{id}.iso");
            if req.url == share {
                return Ok(match req.method {
                    Method::Post => redirect(&direct),
                    _ => html(&share_page(id)),
                });
            }
            if req.url == direct || req.url == cdn {
                return Ok(serve_bytes(req, data));
            }
        }
        if req.url.ends_with("/forbidden.iso") && req.method == Method::Get {
            return Ok(status(403));
        }
        if req.url.ends_with("/flaky.iso") && req.method == Method::Get {
            return Ok(status(503));
        }
        Ok(status(404))
    }))
}

async fn downloader(
    transport: Arc<ScriptedTransport>,
    proxies: Option<&str>,
) -> Downloader {
    let binder = proxies.map(|list| {
        ProxyAffinityBinder::new(
            ProxyPool::parse(list).unwrap(),
            Box::<RoundRobinSelection>::default(),
            1,
        )
    });
    Downloader::new(
        config(),
        registry(),
        binder,
        transport,
        open_memory().await.unwrap(),
    )
}

fn completed(report: &TaskReport) -> (&Path, u64) {
    match &report.outcome {
        TaskOutcome::Completed { path, bytes } => (path.as_path(), *bytes),
        other => panic!("{} did not complete: {other:?}", report.share_url),
    }
}

#[tokio::test]
async fn direct_link_downloads_through_pass_through() {
    let data = payload(1, 1000);
    let t = site(vec![("linux", data.clone())]);
    let dl = downloader(t.clone(), None).await;
    let dir = tempfile::tempdir().unwrap();

    let report = dl
        .download("https://cdn.example.com/linux.iso", dir.path(), None)
        .await;

    let (path, bytes) = completed(&report);
    assert_eq!(bytes, 1000);
    assert_eq!(path, dir.path().join("linux.iso"));
    assert_eq!(std::fs::read(path).unwrap(), data);
    assert_eq!(report.task_id, task_id("https://cdn.example.com/linux.iso", dir.path()));
    assert!(dl.control().running().is_empty());
    assert!(t.requests().iter().all(|r| r.request.proxy.is_none()));
}

#[tokio::test]
async fn concurrent_affinity_tasks_stay_pinned_to_their_proxy() {
    let a = payload(2, 900);
    let b = payload(3, 700);
    let t = site(vec![("aaa", a.clone()), ("bbb", b.clone())]);
    let dl = downloader(t.clone(), Some("10.0.0.1:3128\n10.0.0.2:3128\n")).await;
    let dir = tempfile::tempdir().unwrap();

    let urls = vec![
        "https://ex-load.com/aaa/file-aaa.bin.html".to_string(),
        "https://ex-load.com/bbb/file-bbb.bin.html".to_string(),
    ];
    let reports = dl.download_all(&urls, dir.path(), None).await;

    assert_eq!(std::fs::read(completed(&reports[0]).0).unwrap(), a);
    assert_eq!(std::fs::read(completed(&reports[1]).0).unwrap(), b);

    let proxies_for = |id: &str| -> BTreeSet<Option<ProxyIdentity>> {
        t.requests()
            .into_iter()
            .filter(|r| r.request.url.contains(&format!("/{id}/")))
            .map(|r| r.request.proxy)
            .collect()
    };
    let pa = proxies_for("aaa");
    let pb = proxies_for("bbb");
    assert_eq!(pa.len(), 1, "task aaa used {pa:?}");
    assert_eq!(pb.len(), 1, "task bbb used {pb:?}");
    assert!(pa.iter().all(Option::is_some));
    assert_ne!(pa, pb);

    let binder = dl.binder().unwrap();
    for p in binder.pool().entries() {
        assert_eq!(binder.active_count(p), 0);
    }
}

#[tokio::test]
async fn one_failure_does_not_cancel_siblings() {
    let data = payload(4, 600);
    let t = site(vec![("good", data.clone())]);
    let dl = downloader(t, None).await;
    let dir = tempfile::tempdir().unwrap();

    let urls = vec![
        "https://cdn.example.com/forbidden.iso".to_string(),
        "https://cdn.example.com/good.iso".to_string(),
    ];
    let reports = dl.download_all(&urls, dir.path(), None).await;

    assert_eq!(reports[0].share_url, urls[0]);
    match &reports[0].outcome {
        TaskOutcome::Failed {
            kind,
            last_transient,
            ..
        } => {
            assert_eq!(*kind, FailureKind::Permanent);
            assert!(last_transient.is_none());
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(std::fs::read(completed(&reports[1]).0).unwrap(), data);
}

#[tokio::test]
async fn exhausted_transfer_reports_last_transient_error() {
    let t = site(Vec::new());
    let dl = downloader(t.clone(), None).await;
    let dir = tempfile::tempdir().unwrap();

    let report = dl
        .download("https://cdn.example.com/flaky.iso", dir.path(), None)
        .await;

    match report.outcome {
        TaskOutcome::Failed {
            kind,
            last_transient,
            ..
        } => {
            assert_eq!(kind, FailureKind::Transient);
            assert_eq!(last_transient.as_deref(), Some("HTTP 503"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    let gets = t
        .requests()
        .iter()
        .filter(|r| r.request.method == Method::Get)
        .count();
    assert_eq!(gets, 2);
}

#[tokio::test]
async fn resolve_retries_transient_page_errors() {
    let data = payload(5, 300);
    let served = data.clone();
    let share = "https://ex-load.com/ccc/file-ccc.bin.html";
    let direct = "https://s1.ex-load.com/d/ccc/file-ccc.bin";
    let t = Arc::new(ScriptedTransport::new(move |req, n| {
        if req.url == share {
            return Ok(match req.method {
                Method::Post => redirect(direct),
                _ if n <= 2 => status(502),
                _ => html(&share_page("ccc")),
            });
        }
        Ok(serve_bytes(req, &served))
    }));
    let dl = downloader(t, Some("10.0.0.1:3128\n")).await;
    let dir = tempfile::tempdir().unwrap();

    let report = dl.download(share, dir.path(), None).await;
    assert_eq!(std::fs::read(completed(&report).0).unwrap(), data);
}

#[tokio::test]
async fn resolve_exhaustion_is_a_resolution_failure() {
    let t = Arc::new(ScriptedTransport::new(|_, _| {
        Err(TransportError::Connection("connection reset".into()))
    }));
    let dl = downloader(t.clone(), None).await;
    let dir = tempfile::tempdir().unwrap();

    let report = dl
        .download("https://ex-load.com/ddd/file.bin.html", dir.path(), None)
        .await;

    match report.outcome {
        TaskOutcome::Failed {
            kind,
            last_transient,
            ..
        } => {
            assert_eq!(kind, FailureKind::Resolution);
            assert!(last_transient.unwrap().contains("connection reset"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(t.requests().len(), 5);
}

#[tokio::test]
async fn broken_page_fails_without_retrying() {
    let t = Arc::new(ScriptedTransport::new(|_, _| {
        Ok(HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: b"<html>maintenance</html>".to_vec(),
        })
    }));
    let dl = downloader(t.clone(), None).await;
    let dir = tempfile::tempdir().unwrap();

    let report = dl
        .download("https://ex-load.com/eee/file.bin.html", dir.path(), None)
        .await;

    assert!(matches!(
        report.outcome,
        TaskOutcome::Failed {
            kind: FailureKind::Resolution,
            ..
        }
    ));
    assert_eq!(t.requests().len(), 1);
}

#[tokio::test]
async fn cancelled_task_makes_no_requests() {
    let t = site(vec![("linux", payload(6, 100))]);
    let dl = downloader(t.clone(), None).await;
    let dir = tempfile::tempdir().unwrap();
    let url = "https://cdn.example.com/linux.iso";

    dl.control().register(&task_id(url, dir.path())).cancel();
    let report = dl.download(url, dir.path(), None).await;

    assert_eq!(
        report.outcome,
        TaskOutcome::failed(FailureKind::Cancelled, "cancelled")
    );
    assert!(t.requests().is_empty());
    assert!(dl.control().running().is_empty());
}

#[tokio::test]
async fn progress_reaches_the_callback() {
    let data = payload(7, 1000);
    let t = site(vec![("linux", data)]);
    let dl = downloader(t, None).await;
    let dir = tempfile::tempdir().unwrap();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let (reporter, handle) =
        crate::engine::spawn_progress_callback(Duration::ZERO, move |done, total| {
            sink.lock().unwrap().push((done, total));
        });

    let report = dl
        .download("https://cdn.example.com/linux.iso", dir.path(), Some(&reporter))
        .await;
    assert!(report.outcome.is_completed());
    drop(reporter);
    handle.await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.last(), Some(&(1000, Some(1000))));
}

/// Requests to `slow.example.com` wait until `fast.example.com` has been hit.
struct GatedTransport {
    inner: ScriptedTransport,
    gate: tokio::sync::Semaphore,
}

#[async_trait::async_trait]
impl HttpTransport for GatedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if request.url.contains("://slow.example.com/") {
            let _pass = self.gate.acquire().await;
        } else {
            self.gate.add_permits(64);
        }
        self.inner.execute(request).await
    }
}

#[tokio::test]
async fn busy_host_backlog_leaves_global_slots_for_other_hosts() {
    let data = payload(8, 500);
    let served = data.clone();
    let transport = Arc::new(GatedTransport {
        inner: ScriptedTransport::new(move |req, _| Ok(serve_bytes(req, &served))),
        gate: tokio::sync::Semaphore::new(0),
    });
    let cfg = FetchrConfig {
        max_concurrent_tasks: 2,
        ..config()
    };
    let dl = Downloader::new(cfg, registry(), None, transport, open_memory().await.unwrap());
    let dir = tempfile::tempdir().unwrap();

    let urls = vec![
        "https://slow.example.com/a.iso".to_string(),
        "https://slow.example.com/b.iso".to_string(),
        "https://fast.example.com/c.iso".to_string(),
    ];
    let reports = tokio::time::timeout(
        Duration::from_secs(10),
        dl.download_all(&urls, dir.path(), None),
    )
    .await
    .expect("tasks for the idle host were starved");

    for report in &reports {
        assert_eq!(std::fs::read(completed(report).0).unwrap(), data);
    }
}
