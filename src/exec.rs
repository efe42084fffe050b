// src/exec.rs

//! External command execution
//!
//! Build and test directives run through the [`CommandRunner`] trait so the
//! pipeline can be driven by fakes in tests. [`ProcessRunner`] is the host
//! implementation: it runs the program directly (no shell), nulls stdin,
//! captures stdout and stderr, and enforces a timeout and cancellation.
//!
//! Each command gets its own process group. A timeout or cancellation kills
//! the whole group, so tools forked by `make` die with it.

use crate::error::ExecError;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// How often a running child is checked for cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for pipe readers after a kill before giving up on them
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Shared flag for cancelling a pipeline run from another thread
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A command to run
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl Invocation {
    /// Build from a directive's `[program, args...]` list
    ///
    /// Returns `None` for an empty list.
    pub fn from_argv(argv: &[String], current_dir: impl Into<PathBuf>) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            current_dir: current_dir.into(),
            env: Vec::new(),
            timeout: None,
        })
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Space-joined command line, for logs and error messages
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a finished (or timed out) command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when killed by a signal or on timeout
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// stdout followed by stderr
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Runs external commands on behalf of the pipeline
pub trait CommandRunner: Send + Sync {
    /// Run to completion, timeout or cancellation
    ///
    /// A non-zero exit status is not an error here; callers decide what it
    /// means. Cancellation returns [`ExecError::Cancelled`].
    fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ExecError>;
}

/// Runs commands as host processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ExecError> {
        debug!(
            "Running `{}` in {}",
            invocation.command_line(),
            invocation.current_dir.display()
        );

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.current_dir)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|e| ExecError::Spawn {
            program: invocation.program.clone(),
            reason: e.to_string(),
        })?;

        // Drain both pipes concurrently so a chatty child never blocks on a full pipe
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = invocation.timeout.map(|t| Instant::now() + t);
        let mut timed_out = false;

        let status = loop {
            if let Some(status) = child.wait_timeout(POLL_INTERVAL)? {
                break Some(status);
            }
            if cancel.is_cancelled() {
                warn!("Cancelling `{}`", invocation.command_line());
                kill_group(&mut child);
                return Err(ExecError::Cancelled);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!("`{}` timed out", invocation.command_line());
                kill_group(&mut child);
                timed_out = true;
                break None;
            }
        };

        // A descendant that left the group can still hold the pipes open
        let grace = timed_out.then(|| Instant::now() + DRAIN_GRACE);
        let mut output = String::new();
        for handle in [stdout, stderr].into_iter().flatten() {
            let bytes = collect(handle, grace);
            output.push_str(&String::from_utf8_lossy(&bytes));
        }

        for line in output.lines() {
            debug!("[{}] {}", invocation.program, line);
        }

        Ok(CommandOutput {
            exit_code: status.and_then(|s| s.code()),
            timed_out,
            output,
        })
    }
}

/// Kill the child's process group, then reap the child
fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Ok(pid) = i32::try_from(child.id())
            && let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL)
        {
            debug!("killpg({}) failed: {}", pid, e);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Join a pipe reader, abandoning it if it is still blocked at `deadline`
fn collect(handle: thread::JoinHandle<Vec<u8>>, deadline: Option<Instant>) -> Vec<u8> {
    if let Some(deadline) = deadline {
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("Abandoning output of a process that outlived its group");
                return Vec::new();
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
    handle.join().unwrap_or_default()
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}
