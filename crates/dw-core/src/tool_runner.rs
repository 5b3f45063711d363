//! Bounded execution of external tools.
//!
//! Every command runs with:
//! - A hard timeout, escalating SIGTERM → SIGKILL
//! - A cap on captured stdout/stderr
//! - A scrubbed environment (PATH, HOME, `LC_ALL=C` plus explicit extras)
//!
//! The container runtime driver goes through here so a wedged runtime daemon
//! cannot stall the watchdog loop.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, instrument, trace, warn};

pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default maximum captured output per stream (1MB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Grace period between SIGTERM and SIGKILL.
const SIGTERM_GRACE_MS: u64 = 2_000;

/// Errors that can occur during tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("command failed to spawn: {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

/// Output from a finished tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub command: String,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// None when the child was killed by a signal.
    pub exit_code: Option<i32>,
    pub truncated: bool,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A command to run.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub command: String,
    pub args: Vec<String>,
    /// Extra environment on top of the scrubbed base.
    pub env: Vec<(String, String)>,
}

impl ToolSpec {
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Render for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Runs external tools with a timeout and output cap.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    timeout: Duration,
    max_output_bytes: usize,
}

impl Default for ToolRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

impl ToolRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_max_output(mut self, max_bytes: usize) -> Self {
        self.max_output_bytes = max_bytes;
        self
    }

    /// Run a tool to completion or until its timeout expires.
    ///
    /// A timeout kills the child and returns [`ToolError::Timeout`]; a
    /// non-zero exit is *not* an error here and is left to the caller.
    #[instrument(skip(self, spec), fields(cmd = %spec.command))]
    pub fn run(&self, spec: &ToolSpec) -> Result<ToolOutput, ToolError> {
        if spec.command.is_empty() || spec.command.contains(['|', '&', ';', '$', '`', '\n']) {
            return Err(ToolError::InvalidCommand(spec.command.clone()));
        }

        let timeout = self.timeout;
        debug!(
            command = %spec.display(),
            timeout_ms = timeout.as_millis() as u64,
            "running tool"
        );

        let start = Instant::now();
        let mut child = self
            .build_command(spec)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| {
                error!(command = %spec.command, error = %source, "failed to spawn");
                ToolError::SpawnFailed {
                    command: spec.command.clone(),
                    source,
                }
            })?;

        let captured = self.wait_with_timeout(&mut child, timeout)?;
        let duration = start.elapsed();

        if captured.timed_out {
            warn!(
                command = %spec.display(),
                duration_ms = duration.as_millis() as u64,
                "tool timed out"
            );
            return Err(ToolError::Timeout(timeout));
        }

        debug!(
            command = %spec.command,
            exit_code = ?captured.exit_code,
            duration_ms = duration.as_millis() as u64,
            "tool execution complete"
        );

        Ok(ToolOutput {
            command: spec.command.clone(),
            stdout: captured.stdout,
            stderr: captured.stderr,
            exit_code: captured.exit_code,
            truncated: captured.truncated,
            duration,
        })
    }

    fn build_command(&self, spec: &ToolSpec) -> Command {
        let mut command = Command::new(&spec.command);
        command.args(&spec.args);

        command.env_clear();
        for key in ["PATH", "HOME"] {
            if let Ok(value) = std::env::var(key) {
                command.env(key, value);
            }
        }
        command.env("LC_ALL", "C");
        command.env("LANG", "C");
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        command
    }

    fn wait_with_timeout(&self, child: &mut Child, timeout: Duration) -> Result<Captured, ToolError> {
        let deadline = Instant::now() + timeout;
        let mut captured = Captured::default();
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut chunk = vec![0u8; 8192];

        loop {
            if Instant::now() >= deadline {
                captured.timed_out = true;
                kill_with_grace(child);
                break;
            }

            let mut did_read = false;
            if let Some(out) = stdout.as_mut() {
                did_read |= self.pump(out, &mut chunk, &mut captured.stdout, &mut captured.truncated);
            }
            if let Some(err) = stderr.as_mut() {
                did_read |= self.pump(err, &mut chunk, &mut captured.stderr, &mut captured.truncated);
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    // Drain what the child left in the pipes before exiting.
                    if let Some(out) = stdout.as_mut() {
                        while self.pump(out, &mut chunk, &mut captured.stdout, &mut captured.truncated) {}
                    }
                    if let Some(err) = stderr.as_mut() {
                        while self.pump(err, &mut chunk, &mut captured.stderr, &mut captured.truncated) {}
                    }
                    captured.exit_code = status.code();
                    trace!(exit_code = ?captured.exit_code, "process exited");
                    return Ok(captured);
                }
                Ok(None) => {
                    if !did_read {
                        thread::sleep(Duration::from_millis(10));
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to wait for child");
                    return Err(ToolError::Io(e));
                }
            }
        }

        captured.exit_code = child.wait().ok().and_then(|s| s.code());
        Ok(captured)
    }

    /// Move one non-blocking read into `buf`, honouring the output cap.
    ///
    /// Returns whether any bytes were read.
    fn pump<R: Pipe>(
        &self,
        stream: &mut R,
        chunk: &mut [u8],
        buf: &mut Vec<u8>,
        truncated: &mut bool,
    ) -> bool {
        match try_read_nonblocking(stream, chunk) {
            Ok(0) | Err(_) => false,
            Ok(n) => {
                let space = self.max_output_bytes.saturating_sub(buf.len());
                if n > space {
                    *truncated = true;
                }
                buf.extend_from_slice(&chunk[..n.min(space)]);
                true
            }
        }
    }
}

#[derive(Debug, Default)]
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<i32>,
    truncated: bool,
    timed_out: bool,
}

/// A child pipe we can poll.
#[cfg(unix)]
trait Pipe: Read + std::os::unix::io::AsRawFd {}
#[cfg(unix)]
impl<T: Read + std::os::unix::io::AsRawFd> Pipe for T {}

#[cfg(not(unix))]
trait Pipe: Read {}
#[cfg(not(unix))]
impl<T: Read> Pipe for T {}

/// Kill a process with SIGTERM, then SIGKILL after the grace period.
#[cfg(unix)]
fn kill_with_grace(child: &mut Child) {
    let pid = child.id() as i32;
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    debug!(pid, "sent SIGTERM");

    let grace_deadline = Instant::now() + Duration::from_millis(SIGTERM_GRACE_MS);
    while Instant::now() < grace_deadline {
        if let Ok(Some(_)) = child.try_wait() {
            trace!(pid, "process exited after SIGTERM");
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }

    warn!(pid, "process did not exit after SIGTERM, sending SIGKILL");
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(not(unix))]
fn kill_with_grace(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Read from a stream without blocking.
///
/// Sets O_NONBLOCK for the duration of the read. Returns Ok(0) when no data
/// is available or at EOF.
#[cfg(unix)]
fn try_read_nonblocking<R: Pipe>(stream: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let fd = stream.as_raw_fd();

    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let was_nonblocking = (flags & libc::O_NONBLOCK) != 0;
    if !was_nonblocking {
        let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if result < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    let result = stream.read(buf);

    if !was_nonblocking {
        unsafe {
            libc::fcntl(fd, libc::F_SETFL, flags);
        }
    }

    match result {
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
        other => other,
    }
}

#[cfg(not(unix))]
fn try_read_nonblocking<R: Pipe>(stream: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    stream.read(buf)
}
