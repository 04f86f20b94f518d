//! Process-backed hosts.
//!
//! Each run spawns one `polyrun-host` child. Protocol lines travel over its
//! stdin/stdout; its stderr is forwarded to `tracing`. The host leads its own
//! process group and gets a private scratch directory. Teardown kills the
//! whole group and removes the directory, so interpreters the host started
//! go with it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

use crate::config::{HOST_PATH_ENV, RunnerConfig};
use crate::error::{Error, Result};
use crate::language::LanguageId;

use super::host::{HostHandle, HostLauncher, HostLink, HostSession, HostSpec};

const HOST_BINARY: &str = if cfg!(windows) {
    "polyrun-host.exe"
} else {
    "polyrun-host"
};

/// Launches `polyrun-host` processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    host_path: Option<PathBuf>,
    interpreters: BTreeMap<LanguageId, PathBuf>,
}

impl ProcessLauncher {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            host_path: config.host_path.clone(),
            interpreters: config.interpreters.clone(),
        }
    }

    /// Find the polyrun-host binary.
    ///
    /// Looks in the following order:
    /// 1. The configured `host_path`
    /// 2. `POLYRUN_HOST_PATH` environment variable
    /// 3. Same directory as the current executable
    /// 4. System PATH
    /// 5. `target/{debug,release}` when running from a checkout
    pub fn find_host_binary(&self) -> Result<PathBuf> {
        if let Some(path) = &self.host_path {
            if path.exists() {
                return Ok(path.clone());
            }
            return Err(Error::Ipc(format!(
                "configured host binary '{}' does not exist",
                path.display()
            )));
        }

        if let Ok(path) = std::env::var(HOST_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(path);
            }
        }

        if let Ok(exe_path) = std::env::current_exe()
            && let Some(exe_dir) = exe_path.parent()
        {
            let candidate = exe_dir.join(HOST_BINARY);
            if candidate.exists() {
                return Ok(candidate);
            }
            // Test binaries live one level down, in target/<profile>/deps.
            if let Some(profile_dir) = exe_dir.parent() {
                let candidate = profile_dir.join(HOST_BINARY);
                if candidate.exists() {
                    return Ok(candidate);
                }
            }
        }

        if let Ok(path) = which::which(HOST_BINARY) {
            return Ok(path);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            for profile in ["debug", "release"] {
                let path = PathBuf::from(&manifest_dir)
                    .join("..")
                    .join("..")
                    .join("target")
                    .join(profile)
                    .join(HOST_BINARY);
                if path.exists() {
                    return Ok(path.canonicalize().unwrap_or(path));
                }
            }
        }

        Err(Error::Ipc(format!(
            "could not find {HOST_BINARY}. Set {HOST_PATH_ENV} or ensure it's in PATH."
        )))
    }
}

#[async_trait]
impl HostLauncher for ProcessLauncher {
    async fn launch(&self, spec: &HostSpec) -> Result<HostSession> {
        let init_error = |message: String| Error::Initialization {
            language: spec.language,
            message,
        };

        let host_path = self.find_host_binary().map_err(|e| init_error(e.to_string()))?;
        let scratch = tempfile::Builder::new()
            .prefix("polyrun-host-")
            .tempdir()
            .map_err(|e| init_error(format!("failed to create scratch directory: {e}")))?;

        let mut cmd = Command::new(&host_path);
        cmd.arg("--language")
            .arg(spec.language.as_str())
            .arg("--token")
            .arg(spec.token.as_str())
            .arg("--scratch-dir")
            .arg(scratch.path());
        if let Some(interpreter) = self.interpreters.get(&spec.language) {
            cmd.arg("--interpreter").arg(interpreter);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            init_error(format!(
                "failed to spawn host process '{}': {}",
                host_path.display(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| init_error("failed to get host stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| init_error("failed to get host stdout".to_string()))?;
        let stderr = child.stderr.take();
        let pid = child.id();

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(read_stdout(stdout, inbound_tx));
        tokio::spawn(write_stdin(stdin, outbound_rx));
        if let Some(stderr) = stderr {
            tokio::spawn(forward_stderr(stderr, spec.language, pid));
        }

        tracing::debug!(language = %spec.language, pid = ?pid, token = %spec.token, "host spawned");

        Ok(HostSession {
            link: HostLink {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            handle: Box::new(ProcessHost {
                child: Some(child),
                pid,
                scratch: Some(scratch),
            }),
        })
    }

    async fn check_available(&self, language: LanguageId) -> Result<()> {
        self.find_host_binary()
            .map(|_| ())
            .map_err(|e| Error::Initialization {
                language,
                message: e.to_string(),
            })
    }
}

/// A running `polyrun-host` child, leader of its own process group.
struct ProcessHost {
    child: Option<Child>,
    pid: Option<u32>,
    scratch: Option<tempfile::TempDir>,
}

impl HostHandle for ProcessHost {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        // The unreaped host keeps its pid, so the group id is still ours even
        // if the host itself has already exited.
        #[cfg(unix)]
        if let Some(pgid) = self.pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) {
            // SAFETY: killpg has no memory-safety preconditions.
            if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
                tracing::debug!(
                    pid = ?self.pid,
                    error = %std::io::Error::last_os_error(),
                    "failed to kill host process group"
                );
            }
        }

        if let Some(scratch) = self.scratch.take()
            && let Err(e) = scratch.close()
        {
            tracing::debug!(pid = ?self.pid, error = %e, "failed to remove host scratch directory");
        }

        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(e) => tracing::warn!(pid = ?self.pid, error = %e, "failed to inspect host before kill"),
        }

        if let Err(e) = child.start_kill() {
            tracing::warn!(pid = ?self.pid, error = %e, "failed to kill host");
        }

        // Reap in the background when a runtime is around; otherwise
        // kill_on_drop and tokio's orphan reaper take care of it.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let pid = self.pid;
            runtime.spawn(async move {
                match child.wait().await {
                    Ok(status) => tracing::debug!(pid = ?pid, %status, "host reaped"),
                    Err(e) => tracing::warn!(pid = ?pid, error = %e, "failed to reap host"),
                }
            });
        }
    }
}

impl Drop for ProcessHost {
    fn drop(&mut self) {
        self.terminate();
    }
}

async fn read_stdout(stdout: ChildStdout, inbound: mpsc::UnboundedSender<String>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if inbound.send(line).is_err() {
                    // Listener detached.
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "host stdout closed with error");
                break;
            }
        }
    }
}

async fn write_stdin(mut stdin: ChildStdin, mut outbound: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = outbound.recv().await {
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::debug!(error = %e, "failed to write to host stdin");
            break;
        }
    }
}

async fn forward_stderr(stderr: ChildStderr, language: LanguageId, pid: Option<u32>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "polyrun::host", %language, pid = ?pid, "{}", line);
    }
}
