//! Centralized command execution.
//!
//! Every build command, container query and remediation goes through the
//! [`Shell`] trait so the retry loop never touches `std::process` directly.
//! [`HostShell`] is the real implementation: it runs `sh -c <command>` on a
//! current-thread tokio runtime so it can enforce timeouts and stream output
//! line by line. Ctrl-C is latched in an [`InterruptFlag`] by one listener
//! thread, so a press between commands is noticed at the next checkpoint.

use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::error::Interrupted;

/// Stderr text reported when a command exceeds its timeout.
pub const TIMEOUT_MARKER: &str = "Timeout";

/// Result of one command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// True if the command exited with status 0.
    pub success: bool,
    /// Captured stdout (stdout and stderr combined when streamed).
    pub stdout: String,
    /// Captured stderr. Empty when streamed.
    pub stderr: String,
}

impl ExecutionResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// The designated result for a command that ran out of time.
    pub fn timed_out() -> Self {
        Self::failed(TIMEOUT_MARKER)
    }

    /// Text to inspect when classifying a failure: stderr, or stdout if
    /// stderr is empty.
    pub fn failure_text(&self) -> &str {
        if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// How a command should be run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Print combined output live while accumulating it.
    pub stream: bool,
    /// Kill the command and report [`ExecutionResult::timed_out`] after this long.
    pub timeout: Option<Duration>,
}

impl RunOptions {
    /// Run to completion, capture stdout and stderr separately.
    pub fn buffered() -> Self {
        Self::default()
    }

    /// Forward combined output to the terminal as it arrives.
    pub fn streamed() -> Self {
        Self {
            stream: true,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Something that can run shell command strings.
///
/// Implementations return `Err` only for [`Interrupted`] or for failures of
/// the shell itself; a command that runs and fails is an `Ok` result with
/// `success == false`.
pub trait Shell {
    /// Run `command` and wait for it.
    fn run(&self, command: &str, opts: &RunOptions) -> Result<ExecutionResult>;

    /// Wait a fixed delay (retry backoff, container settle time).
    fn pause(&self, delay: Duration) -> Result<()>;

    /// `Err(Interrupted)` if Ctrl-C was pressed since the last interrupt was
    /// reported, including while no command was running.
    fn checkpoint(&self) -> Result<()> {
        Ok(())
    }
}

/// Latched Ctrl-C state: raised by the listener, cleared when reported.
#[derive(Debug, Clone)]
pub struct InterruptFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for InterruptFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptFlag {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    /// Clear the flag, returning whether it was raised.
    pub fn take(&self) -> bool {
        self.tx.send_replace(false)
    }

    /// Completes once the flag is raised.
    async fn raised(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|raised| *raised).await;
    }

    /// Raise the flag on every Ctrl-C for the rest of the process.
    fn listen_for_ctrl_c(&self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start signal runtime")?;
        let flag = self.clone();
        std::thread::Builder::new()
            .name("ctrl-c".to_string())
            .spawn(move || {
                runtime.block_on(async {
                    while tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Ctrl-C received, stopping");
                        flag.raise();
                    }
                })
            })
            .context("Failed to start signal listener")?;
        Ok(())
    }
}

/// Runs commands on the host through `sh -c`.
pub struct HostShell {
    runtime: tokio::runtime::Runtime,
    program: String,
    interrupt: InterruptFlag,
}

impl HostShell {
    /// Host shell that turns Ctrl-C into [`Interrupted`].
    pub fn new() -> Result<Self> {
        let interrupt = InterruptFlag::new();
        interrupt.listen_for_ctrl_c()?;
        Self::with_interrupt(interrupt)
    }

    /// Host shell driven by an existing flag, without a signal listener.
    pub fn with_interrupt(interrupt: InterruptFlag) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start command runtime")?;
        Ok(Self {
            runtime,
            program: "sh".to_string(),
            interrupt,
        })
    }
}

impl Shell for HostShell {
    fn run(&self, command: &str, opts: &RunOptions) -> Result<ExecutionResult> {
        self.checkpoint()?;
        debug!("exec: {}", command);
        self.runtime.block_on(async {
            tokio::select! {
                result = run_with_timeout(&self.program, command, opts) => Ok(result),
                _ = self.interrupt.raised() => {
                    self.interrupt.take();
                    Err(Interrupted.into())
                }
            }
        })
    }

    fn pause(&self, delay: Duration) -> Result<()> {
        self.checkpoint()?;
        if delay.is_zero() {
            return Ok(());
        }
        self.runtime.block_on(async {
            tokio::select! {
                _ = tokio::time::sleep(delay) => Ok(()),
                _ = self.interrupt.raised() => {
                    self.interrupt.take();
                    Err(Interrupted.into())
                }
            }
        })
    }

    fn checkpoint(&self) -> Result<()> {
        if self.interrupt.take() {
            return Err(Interrupted.into());
        }
        Ok(())
    }
}

async fn run_with_timeout(program: &str, command: &str, opts: &RunOptions) -> ExecutionResult {
    let child = run_child(program, command, opts.stream);
    match opts.timeout {
        Some(limit) => match tokio::time::timeout(limit, child).await {
            Ok(result) => result,
            Err(_) => {
                error!("command timed out after {}s: {}", limit.as_secs(), command);
                ExecutionResult::timed_out()
            }
        },
        None => child.await,
    }
}

async fn run_child(program: &str, command: &str, stream: bool) -> ExecutionResult {
    let mut cmd = Command::new(program);
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Dropping the future (timeout, Ctrl-C) must not leave the build running.
        .kill_on_drop(true);

    let outcome = if stream {
        stream_child(cmd).await
    } else {
        capture_child(cmd).await
    };

    outcome.unwrap_or_else(|e| ExecutionResult::failed(format!("{:#}", e)))
}

async fn capture_child(mut cmd: Command) -> Result<ExecutionResult> {
    let output = cmd.output().await.context("Failed to execute shell")?;
    Ok(ExecutionResult {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Print stdout and stderr lines as they arrive, in one combined transcript.
///
/// Lines are read as raw bytes and decoded lossily; build tools print
/// whatever encoding they like.
async fn stream_child(mut cmd: Command) -> Result<ExecutionResult> {
    let mut child = cmd.spawn().context("Failed to execute shell")?;
    let stdout = child.stdout.take().context("child stdout not captured")?;
    let stderr = child.stderr.take().context("child stderr not captured")?;

    let mut out = BufReader::new(stdout);
    let mut err = BufReader::new(stderr);
    // Partial reads stay in these buffers when the other branch wins.
    let mut out_buf = Vec::new();
    let mut err_buf = Vec::new();
    let mut out_open = true;
    let mut err_open = true;
    let mut transcript = String::new();

    while out_open || err_open {
        tokio::select! {
            read = out.read_until(b'\n', &mut out_buf), if out_open => {
                out_open = take_line(read, &mut out_buf, &mut transcript)?;
            }
            read = err.read_until(b'\n', &mut err_buf), if err_open => {
                err_open = take_line(read, &mut err_buf, &mut transcript)?;
            }
        }
    }

    let status = child.wait().await.context("Failed to wait for command")?;
    Ok(ExecutionResult {
        success: status.success(),
        stdout: transcript,
        stderr: String::new(),
    })
}

/// Print and record the line in `buf`. Returns false at end of stream.
fn take_line(read: io::Result<usize>, buf: &mut Vec<u8>, transcript: &mut String) -> Result<bool> {
    if read.context("Failed to read command output")? == 0 {
        return Ok(false);
    }
    let text = String::from_utf8_lossy(buf);
    let line = text.strip_suffix('\n').unwrap_or(&text);
    println!("{}", line);
    transcript.push_str(line);
    transcript.push('\n');
    buf.clear();
    Ok(true)
}

/// Quote `s` as a single POSIX shell word.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Check if a program exists in PATH.
///
/// Returns the full path if found, None otherwise.
pub fn which(program: &str) -> Option<String> {
    which::which(program)
        .ok()
        .map(|path| path.to_string_lossy().into_owned())
}

/// Check if a program exists in PATH (bool version).
pub fn exists(program: &str) -> bool {
    which(program).is_some()
}

// =============================================================================
// Tests
// =============================================================================
