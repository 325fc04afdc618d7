//! Handle to one external world server process.
//!
//! The child is owned by a monitor task that reaps it and publishes the
//! outcome through a `watch` channel. The handle keeps the child's stdin as
//! the control channel and a one-shot kill switch for forced stops.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{oneshot, watch};

use crate::error::{RealmError, RealmResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Starting,
    Running { pid: u32, since: DateTime<Utc> },
    Stopping,
    /// Exited; `code` is `None` when killed by a signal.
    Stopped { code: Option<i32> },
    Failed { reason: String },
}

impl ProcessState {
    /// Alive and owning a control channel. `Stopping` still counts.
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running { .. } | ProcessState::Stopping)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessState::NotStarted | ProcessState::Stopped { .. } | ProcessState::Failed { .. }
        )
    }
}

pub struct WorldProcess {
    name: String,
    state: Arc<watch::Sender<ProcessState>>,
    control: Arc<tokio::sync::Mutex<Option<ChildStdin>>>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl WorldProcess {
    pub fn new(name: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ProcessState::NotStarted);
        Self {
            name: name.into(),
            state: Arc::new(state),
            control: Arc::new(tokio::sync::Mutex::new(None)),
            kill: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().is_running()
    }

    /// Launch `program` in `cwd`. Fails if this handle already has a live process.
    pub async fn spawn<I, S>(&self, program: &Path, args: I, cwd: &Path) -> RealmResult<u32>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let claimed = self.state.send_if_modified(|s| {
            if s.is_terminal() {
                *s = ProcessState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(RealmError::AlreadyRunning(self.name.clone()));
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.state.send_replace(ProcessState::Failed {
                    reason: source.to_string(),
                });
                return Err(RealmError::Spawn {
                    program: program.to_path_buf(),
                    source,
                });
            }
        };
        let pid = child.id().unwrap_or(0);

        *self.control.lock().await = child.stdin.take();
        if let Some(out) = child.stdout.take() {
            tokio::spawn(forward_output(self.name.clone(), out, false));
        }
        if let Some(err) = child.stderr.take() {
            tokio::spawn(forward_output(self.name.clone(), err, true));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        if let Ok(mut kill) = self.kill.lock() {
            *kill = Some(kill_tx);
        }

        self.state.send_replace(ProcessState::Running {
            pid,
            since: Utc::now(),
        });
        tracing::info!("[process] [spawned] realm={} pid={} program={}", self.name, pid, program.display());

        let name = self.name.clone();
        let state = Arc::clone(&self.state);
        let control = Arc::clone(&self.control);
        tokio::spawn(async move {
            // A dropped sender counts as a kill request
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => None,
            };
            let status = match exited {
                Some(status) => status,
                None => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };

            control.lock().await.take();
            let next = match status {
                Ok(status) => ProcessState::Stopped {
                    code: status.code(),
                },
                Err(e) => ProcessState::Failed {
                    reason: e.to_string(),
                },
            };
            tracing::info!("[process] [exited] realm={} state={:?}", name, next);
            state.send_replace(next);
        });

        Ok(pid)
    }

    /// Write one line to the process's stdin. Returns false, without
    /// error, when there is no live process to receive it.
    pub async fn send(&self, text: &str) -> bool {
        if !self.is_running() {
            return false;
        }
        let mut control = self.control.lock().await;
        let Some(stdin) = control.as_mut() else {
            return false;
        };

        let mut line = text.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;

        match written {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("[process] [send_failed] realm={} err={}", self.name, e);
                false
            }
        }
    }

    /// Stop the process and wait for it to exit.
    ///
    /// Graceful stops ask the server to shut down after `delay_secs`; forced
    /// stops kill it, also while an earlier graceful stop is still waiting.
    /// Returns false if nothing was running.
    pub async fn stop(&self, force: bool, delay_secs: u32) -> bool {
        if !self.is_running() {
            return false;
        }
        self.state.send_if_modified(|s| {
            if matches!(s, ProcessState::Running { .. }) {
                *s = ProcessState::Stopping;
                true
            } else {
                false
            }
        });

        let graceful = !force && self.send(&format!("server shutdown {}", delay_secs)).await;
        if graceful {
            tracing::info!("[process] [stopping] realm={} delay={}s", self.name, delay_secs);
        } else {
            tracing::info!("[process] [killing] realm={}", self.name);
            let kill = self.kill.lock().ok().and_then(|mut k| k.take());
            if let Some(kill) = kill {
                let _ = kill.send(());
            }
        }

        self.wait().await;
        true
    }

    /// Wait until the process has exited (immediately if it never ran).
    pub async fn wait(&self) -> ProcessState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(ProcessState::is_terminal).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        state
    }
}

async fn forward_output<R: AsyncRead + Unpin>(name: String, reader: R, is_stderr: bool) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            tracing::warn!("[realm] [{}] {}", name, line);
        } else {
            tracing::info!("[realm] [{}] {}", name, line);
        }
    }
}
