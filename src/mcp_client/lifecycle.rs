//! Provider process lifecycle management.
//!
//! Spawning child processes with piped stdio, capturing stderr for
//! diagnostics, graceful-then-forced termination, and the per-provider state
//! machine tracked by the registry.

use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use super::errors::McpError;
use super::types::ProcessLaunch;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for graceful shutdown before force-killing.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for stderr output from a process that failed to start.
const STDERR_CAPTURE_TIMEOUT: Duration = Duration::from_millis(500);

/// Cap on captured stderr included in error messages.
const STDERR_CAPTURE_LIMIT: usize = 2000;

// ─── Provider State ──────────────────────────────────────────────────────────

/// Lifecycle state of one provider in the registry.
///
/// `Unstarted → Starting → Ready → Stopped`; `Failed` is terminal and only
/// reachable from `Starting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    Unstarted,
    Starting,
    Ready,
    Stopped,
    Failed,
}

impl ProviderState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ProviderState) -> bool {
        use ProviderState::*;
        matches!(
            (self, next),
            (Unstarted, Starting) | (Starting, Ready) | (Starting, Failed) | (Ready, Stopped)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderState::Unstarted => "unstarted",
            ProviderState::Starting => "starting",
            ProviderState::Ready => "ready",
            ProviderState::Stopped => "stopped",
            ProviderState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ProviderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn a provider process with stdin/stdout/stderr piped.
///
/// The child is killed if its handle is dropped.
pub fn spawn_process(name: &str, launch: &ProcessLaunch) -> Result<Child, McpError> {
    if launch.program.is_empty() {
        return Err(McpError::StartupFailed {
            name: name.to_string(),
            reason: "empty command".into(),
        });
    }

    let mut cmd = Command::new(&launch.program);
    cmd.args(&launch.args);

    for (key, value) in &launch.env {
        cmd.env(key, value);
    }

    if let Some(dir) = &launch.cwd {
        cmd.current_dir(dir);
    }

    // Windows: prevent console window from appearing for child processes
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| McpError::StartupFailed {
        name: name.to_string(),
        reason: format!("failed to spawn '{}': {e}", launch.program),
    })?;

    tracing::info!(
        server = name,
        command = %launch.program,
        args = ?launch.args,
        pid = ?child.id(),
        "spawned provider process"
    );

    Ok(child)
}

/// Read any available stderr output from a failed provider process.
///
/// Uses a short timeout to avoid blocking if stderr is empty or the process
/// is still writing. Truncates to keep log messages readable.
pub async fn read_stderr_on_failure(stderr_handle: Option<ChildStderr>) -> String {
    let Some(mut stderr) = stderr_handle else {
        return String::new();
    };

    let mut buf = Vec::new();
    let _ = tokio::time::timeout(STDERR_CAPTURE_TIMEOUT, stderr.read_to_end(&mut buf)).await;

    let mut text = String::from_utf8_lossy(&buf).into_owned();
    if text.len() > STDERR_CAPTURE_LIMIT {
        let mut cut = STDERR_CAPTURE_LIMIT;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...(truncated)");
    }
    text
}

/// Format a stderr suffix for error messages (empty string if no stderr).
pub fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

/// Drain a running provider's stderr into the log so the pipe never fills.
pub fn forward_stderr(name: &str, stderr: ChildStderr) -> tokio::task::JoinHandle<()> {
    let name = name.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %name, line = %line, "provider stderr");
        }
    })
}

/// Stop a child process: wait for it to exit on its own (its stdin should
/// already be closed), then force-kill after [`SHUTDOWN_TIMEOUT`].
pub async fn terminate(name: &str, mut child: Child) {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(server = name, %status, "provider exited");
        }
        Ok(Err(e)) => {
            tracing::warn!(server = name, error = %e, "failed to wait for provider exit");
            let _ = child.kill().await;
        }
        Err(_) => {
            tracing::warn!(
                server = name,
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "provider did not exit in time, killing"
            );
            let _ = child.kill().await;
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
