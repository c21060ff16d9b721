//! A real `AgentPort` that spawns a configured CLI coding agent as a
//! subprocess, feeding it the rendered prompt on stdin.
//!
//! Spawns the child, streams stdout/stderr line-by-line into buffers
//! concurrently with a `tokio::select!` against a deadline, and kills the
//! child on either path. Termination is graceful-then-forced: `SIGTERM`,
//! a short grace period, then `SIGKILL` if the process is still alive.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anima_core::domain::models::ExecutionResult;
use anima_core::quota;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use anima_core::domain::ports::AgentPort;

/// How long a terminated agent process gets to exit on its own before a
/// `SIGKILL` follows.
const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Spawns `command` (plus `args`) in `working_dir`, writes the prompt to
/// its stdin, and classifies the combined output for quota signals.
/// Cancelling `cancel` (set by the CLI's SIGINT handler) terminates any
/// in-flight subprocess gracefully.
pub struct SubprocessAgent {
    command: String,
    args: Vec<String>,
    working_dir: PathBuf,
    timeout: Duration,
    cancel: CancellationToken,
}

impl SubprocessAgent {
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        working_dir: impl Into<PathBuf>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir: working_dir.into(),
            timeout,
            cancel,
        }
    }

    /// Resolves `ANIMA_AGENT` (`claude` | `codex` | `gemini` | …) to its
    /// default CLI invocation.
    pub fn for_agent_name(
        name: &str,
        working_dir: impl Into<PathBuf>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (command, args) = match name {
            "codex" => ("codex", vec!["exec".to_string()]),
            "gemini" => ("gemini", vec![]),
            _ => ("claude", vec!["-p".to_string()]),
        };
        Self::new(command, args, working_dir, timeout, cancel)
    }
}

/// Reads `reader` line by line, appending each line to `buf` as it
/// arrives — this is what keeps output "streaming-safe": a kill mid-read
/// still leaves every line received so far in `buf`.
async fn pump_lines<R: AsyncRead + Unpin>(reader: R, buf: Arc<AsyncMutex<String>>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let mut guard = buf.lock().await;
                guard.push_str(&line);
                guard.push('\n');
            }
            _ => break,
        }
    }
}

/// Sends a graceful termination signal, waits up to `GRACE_PERIOD` for the
/// child to exit on its own, then force-kills it.
async fn terminate_gracefully(child: &mut Child) {
    if let Some(pid) = child.id() {
        #[cfg(unix)]
        {
            // SAFETY: `pid` is a live process id owned by this `Child`;
            // `kill(2)` with a valid pid and signal has no memory-safety
            // implications.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }
    } else {
        let _ = child.start_kill();
        return;
    }

    tokio::select! {
        _ = child.wait() => {}
        _ = tokio::time::sleep(GRACE_PERIOD) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

async fn drain(buf: &Arc<AsyncMutex<String>>) -> String {
    buf.lock().await.clone()
}

#[async_trait]
impl AgentPort for SubprocessAgent {
    async fn execute(&self, prompt: &str) -> ExecutionResult {
        let started = std::time::Instant::now();

        let mut child = match Command::new(&self.command)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult {
                    success: false,
                    output: String::new(),
                    errors: format!("agent binary '{}' unavailable: {e}", self.command),
                    exit_code: -1,
                    elapsed_seconds: started.elapsed().as_secs_f64(),
                    cost_usd: 0.0,
                    total_tokens: 0,
                    dry_run: false,
                    files_changed: vec![],
                    quota_state: None,
                };
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(prompt.as_bytes()).await;
            // Drop (closing stdin) happens implicitly when `stdin` goes out
            // of scope, signalling EOF to agents that read until closed.
        }

        let stdout_buf = Arc::new(AsyncMutex::new(String::new()));
        let stderr_buf = Arc::new(AsyncMutex::new(String::new()));
        let stdout_handle = child
            .stdout
            .take()
            .map(|r| tokio::spawn(pump_lines(r, stdout_buf.clone())));
        let stderr_handle = child
            .stderr
            .take()
            .map(|r| tokio::spawn(pump_lines(r, stderr_buf.clone())));

        enum Outcome {
            Exited(std::process::ExitStatus),
            TimedOut,
            Cancelled,
        }

        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Outcome::Exited(status),
                Err(_) => Outcome::TimedOut,
            },
            _ = tokio::time::sleep(self.timeout) => Outcome::TimedOut,
            _ = self.cancel.cancelled() => Outcome::Cancelled,
        };

        let (exit_code, failure_reason) = match outcome {
            Outcome::Exited(status) => (status.code().unwrap_or(-1), None),
            Outcome::TimedOut => {
                terminate_gracefully(&mut child).await;
                (-1, Some(format!("agent timed out after {:?}", self.timeout)))
            }
            Outcome::Cancelled => {
                terminate_gracefully(&mut child).await;
                (-1, Some("agent execution interrupted".to_string()))
            }
        };

        // The readers hit EOF as soon as the child's pipes close (on exit
        // or kill), so these joins resolve promptly either way.
        if let Some(h) = stdout_handle {
            let _ = tokio::time::timeout(Duration::from_secs(2), h).await;
        }
        if let Some(h) = stderr_handle {
            let _ = tokio::time::timeout(Duration::from_secs(2), h).await;
        }

        let stdout = drain(&stdout_buf).await;
        let mut stderr = drain(&stderr_buf).await;
        if let Some(reason) = &failure_reason {
            stderr.push_str(reason);
            stderr.push('\n');
        }

        let combined = format!("{stdout}\n{stderr}");
        let quota_state = quota::detect_from_text(&combined);

        ExecutionResult {
            success: failure_reason.is_none() && exit_code == 0 && quota_state.is_none(),
            output: stdout,
            errors: stderr,
            exit_code,
            elapsed_seconds: started.elapsed().as_secs_f64(),
            cost_usd: 0.0,
            total_tokens: 0,
            dry_run: false,
            files_changed: vec![],
            quota_state,
        }
    }
}
