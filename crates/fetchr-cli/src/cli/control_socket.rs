//! Control socket: server (during `fetchr get`) and client (for `fetchr cancel`).
//! Protocol: one line per command, `cancel <task_id>`.

use anyhow::{Context, Result};
use fetchr_core::control::TaskControl;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Task id from a `cancel <task_id>` line; `None` for anything else.
pub fn parse_command(line: &str) -> Option<&str> {
    let id = line.trim().strip_prefix("cancel ")?.trim();
    (!id.is_empty()).then_some(id)
}

/// The one running task whose id starts with `prefix`.
fn unique_running(control: &TaskControl, prefix: &str) -> Option<String> {
    let mut matches = control
        .running()
        .into_iter()
        .filter(|id| id.starts_with(prefix));
    let first = matches.next()?;
    matches.next().is_none().then_some(first)
}

/// Listens on `path` and aborts the running task named by each
/// `cancel <id>` line (a unique id prefix is enough). Malformed lines are ignored.
pub fn spawn_control_listener(
    control: Arc<TaskControl>,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create socket dir {}", dir.display()))?;
    }
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("bind control socket {}", path.display()))?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let control = Arc::clone(&control);
                    tokio::spawn(async move {
                        let mut lines = BufReader::new(stream).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            let Some(task_id) = parse_command(&line) else {
                                tracing::debug!(line = %line, "ignoring control line");
                                continue;
                            };
                            match unique_running(&control, task_id) {
                                Some(id) => {
                                    control.request_abort(&id);
                                    tracing::info!(task_id = %id, "cancel requested over control socket");
                                }
                                None => tracing::warn!(task_id, "cancel: no single running task matches"),
                            }
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

/// Sends `cancel <task_id>\n`. Returns false when no `fetchr get` is listening.
pub async fn send_cancel(socket_path: &Path, task_id: &str) -> Result<bool> {
    if !socket_path.exists() {
        return Ok(false);
    }
    let mut stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => return Ok(false),
        Err(e) => {
            return Err(e).with_context(|| format!("connect {}", socket_path.display()))
        }
    };
    stream
        .write_all(format!("cancel {task_id}\n").as_bytes())
        .await?;
    stream.shutdown().await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parse_cancel_lines() {
        assert_eq!(parse_command("cancel abc123\n"), Some("abc123"));
        assert_eq!(parse_command("  cancel  abc123  "), Some("abc123"));
        assert_eq!(parse_command("cancel "), None);
        assert_eq!(parse_command("pause abc123"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn prefix_must_pick_one_task() {
        let control = TaskControl::new();
        control.register("abc111");
        control.register("abc222");
        assert_eq!(unique_running(&control, "abc1"), Some("abc111".to_string()));
        assert_eq!(unique_running(&control, "abc"), None);
        assert_eq!(unique_running(&control, "zzz"), None);
    }

    #[tokio::test]
    async fn cancel_over_socket_reaches_task() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");
        let control = Arc::new(TaskControl::new());
        let token = control.register("task-1");
        let listener = spawn_control_listener(Arc::clone(&control), &path).unwrap();

        assert!(send_cancel(&path, "task").await.unwrap());
        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .unwrap();
        listener.abort();
    }

    #[tokio::test]
    async fn missing_socket_means_nothing_running() {
        let dir = tempfile::tempdir().unwrap();
        let sent = send_cancel(&dir.path().join("none.sock"), "x").await.unwrap();
        assert!(!sent);
    }
}
