//! Execution layer: the leading-token allowlist and the process runner behind both gates.
//!
//! Gates never spawn processes themselves; they hand an [`Invocation`] to a [`ProcessRunner`]
//! so the backend can be swapped for a stub in tests. [`run_bounded`] applies the wall-clock
//! limit; [`ShellRunner`] applies the output cap and kills the child's whole process group
//! when either limit trips.

use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Allowlist of leading tokens (e.g. "ls", "git"). Order is kept for error messages.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    names: Vec<String>,
}

impl Allowlist {
    pub fn new() -> Self {
        Self { names: Vec::new() }
    }

    /// Build from names, dropping blanks and duplicates.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for n in names {
            list.allow(n.as_ref());
        }
        list
    }

    /// Allow a leading token.
    pub fn allow(&mut self, name: &str) {
        let name = name.trim();
        if !name.is_empty() && !self.contains(name) {
            self.names.push(name.to_string());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Allowed names in configuration order.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// First whitespace-delimited token of a command line, if any.
pub fn base_command(line: &str) -> Option<&str> {
    line.split_whitespace().next()
}

/// What to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Full line handed to `sh -c`; the shell interprets everything in it.
    Shell(String),
    /// Program plus literal arguments; no shell is involved.
    Direct { program: String, args: Vec<String> },
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocation::Shell(line) => f.write_str(line),
            Invocation::Direct { program, args } => {
                f.write_str(program)?;
                for a in args {
                    write!(f, " {}", a)?;
                }
                Ok(())
            }
        }
    }
}

/// Per-invocation limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub timeout: Duration,
    /// Applies to stdout and stderr separately.
    pub max_output_bytes: usize,
}

impl Limits {
    pub fn new(timeout_ms: u64, max_output_bytes: usize) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            max_output_bytes,
        }
    }
}

/// Captured result of a process that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// None when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("{stream} exceeded the {limit} byte output limit")]
    Overflow { stream: &'static str, limit: usize },

    #[error("spawn failed: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("reading process output failed: {0}")]
    Io(#[source] std::io::Error),
}

/// Capability to run a process. The only place the gates touch the OS.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation, limits: &Limits)
        -> Result<ProcessOutput, ExecError>;
}

/// Run through `runner`, failing with [`ExecError::Timeout`] once `limits.timeout` elapses.
/// The runner's future is dropped on timeout; [`ShellRunner`] kills its child when that happens.
pub async fn run_bounded(
    runner: &dyn ProcessRunner,
    invocation: &Invocation,
    limits: &Limits,
) -> Result<ProcessOutput, ExecError> {
    match tokio::time::timeout(limits.timeout, runner.run(invocation, limits)).await {
        Ok(result) => result,
        Err(_) => Err(ExecError::Timeout(limits.timeout)),
    }
}

/// Runs invocations on the host: `Shell` through `sh -c`, `Direct` via argv.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellRunner {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut command = self.base_command(invocation);
        // Own group per invocation, so pipelines and `;` sequences can be killed together.
        #[cfg(unix)]
        command.process_group(0);
        command
    }

    fn base_command(&self, invocation: &Invocation) -> Command {
        match invocation {
            Invocation::Shell(line) => {
                let mut c = Command::new(&self.shell);
                c.arg("-c").arg(line);
                c
            }
            Invocation::Direct { program, args } => {
                let mut c = Command::new(program);
                c.args(args);
                c
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        limits: &Limits,
    ) -> Result<ProcessOutput, ExecError> {
        let mut child = self
            .command(invocation)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ExecError::Spawn)?;
        let mut group = GroupKill::new(child.id());

        let limit = limits.max_output_bytes;
        let (stdout, stderr) = tokio::try_join!(
            read_capped(child.stdout.take(), "stdout", limit),
            read_capped(child.stderr.take(), "stderr", limit),
        )?;
        let status = child.wait().await.map_err(ExecError::Io)?;
        group.disarm();

        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: status.code(),
        })
    }
}

/// SIGKILLs the process group led by the spawned child when dropped while armed.
/// Covers timeouts (the run future is dropped) and early error returns such as overflow.
struct GroupKill {
    pgid: Option<i32>,
}

impl GroupKill {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|p| i32::try_from(p).ok()).filter(|p| *p > 0),
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            // SAFETY: kill(2) takes no pointers; a negative pid targets the group created by
            // `process_group(0)` for this invocation.
            let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
            if rc != 0 {
                log::debug!("kill process group {}: {}", pgid, std::io::Error::last_os_error());
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }
}

/// Read a stream to the end, failing as soon as more than `limit` bytes arrive.
async fn read_capped<R: AsyncRead + Unpin>(
    reader: Option<R>,
    stream: &'static str,
    limit: usize,
) -> Result<Vec<u8>, ExecError> {
    let Some(reader) = reader else {
        return Ok(Vec::new());
    };
    let mut buf = Vec::new();
    let mut capped = reader.take(limit as u64 + 1);
    capped
        .read_to_end(&mut buf)
        .await
        .map_err(ExecError::Io)?;
    if buf.len() > limit {
        return Err(ExecError::Overflow { stream, limit });
    }
    Ok(buf)
}
