//! Task cancellation: shared abort tokens keyed by task id.
//!
//! The orchestrator registers each running task and hands its token to the
//! transfer engine, which checks it between segments. `request_abort` can be
//! called from anywhere holding the registry (the CLI control socket and
//! signal handler, tests).

use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;

/// One task's abort flag. Once set it stays set.
#[derive(Debug, Default)]
pub struct CancelToken {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Registry of task id -> abort token for running tasks.
#[derive(Debug, Default)]
pub struct TaskControl {
    tasks: RwLock<HashMap<String, Arc<CancelToken>>>,
}

impl TaskControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running task and return its token. Registering an id that
    /// is already running hands back the existing token.
    pub fn register(&self, task_id: &str) -> Arc<CancelToken> {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            tasks
                .entry(task_id.to_string())
                .or_insert_with(|| Arc::new(CancelToken::new())),
        )
    }

    pub fn unregister(&self, task_id: &str) {
        self.tasks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(task_id);
    }

    /// Returns false when no such task is running.
    pub fn request_abort(&self, task_id: &str) -> bool {
        match self
            .tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(task_id)
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn abort_all(&self) {
        for token in self.tasks.read().unwrap_or_else(|e| e.into_inner()).values() {
            token.cancel();
        }
    }

    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

/// Unix socket a running `fetchr get` listens on for `cancel <task_id>` lines.
/// Lives in the XDG state dir next to the database.
pub fn control_socket_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchr")?;
    Ok(xdg_dirs.get_state_home().join("fetchr").join("control.sock"))
}
