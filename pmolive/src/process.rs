//! External process layer.
//!
//! The stream player never calls `tokio::process` directly: resolver runs and
//! player spawns go through [`ProcessRunner`]. [`TokioProcessRunner`] is the
//! production implementation.

use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Sequential identifier the player assigns to each spawned process.
pub type ProcessId = u64;

/// Program and arguments of an external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Output of a command run to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// How a player process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exit status 0.
    Success,
    /// Non-zero exit status.
    Failed(i32),
    /// Terminated by a signal, or the status could not be collected.
    Killed,
}

impl ExitOutcome {
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => ExitOutcome::Success,
            Some(code) => ExitOutcome::Failed(code),
            None => ExitOutcome::Killed,
        }
    }

    /// Anything but a clean zero exit.
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, ExitOutcome::Success)
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Success => write!(f, "exit 0"),
            ExitOutcome::Failed(code) => write!(f, "exit {code}"),
            ExitOutcome::Killed => write!(f, "killed"),
        }
    }
}

/// A long running child process.
#[async_trait]
pub trait ChildProcess: Send {
    /// OS process id, if still known.
    fn pid(&self) -> Option<u32>;

    /// Sends a kill signal without waiting for the process to exit.
    fn start_kill(&mut self) -> io::Result<()>;

    /// Waits for the process to exit and reaps it.
    async fn wait(&mut self) -> io::Result<ExitOutcome>;
}

/// Launches the external tools the stream player depends on.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs `command` to completion and captures its output.
    ///
    /// When `cancel` fires first, the child is killed and an
    /// [`io::ErrorKind::Interrupted`] error is returned.
    async fn run_captured(
        &self,
        command: &CommandSpec,
        cancel: CancellationToken,
    ) -> io::Result<CapturedOutput>;

    /// Spawns `command` without capturing its output.
    fn spawn(&self, command: &CommandSpec) -> io::Result<Box<dyn ChildProcess>>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run_captured(
        &self,
        command: &CommandSpec,
        cancel: CancellationToken,
    ) -> io::Result<CapturedOutput> {
        debug!(command = %command, "Running command");

        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Dropping the pending wait kills the child; tokio reaps it in the background.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(io::Error::new(
                io::ErrorKind::Interrupted,
                format!("{} cancelled", command.program),
            )),
            output = child.wait_with_output() => {
                let output = output?;
                Ok(CapturedOutput {
                    success: output.status.success(),
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
        }
    }

    fn spawn(&self, command: &CommandSpec) -> io::Result<Box<dyn ChildProcess>> {
        debug!(command = %command, "Spawning process");

        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        Ok(Box::new(TokioChild { child }))
    }
}

struct TokioChild {
    child: Child,
}

#[async_trait]
impl ChildProcess for TokioChild {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    async fn wait(&mut self) -> io::Result<ExitOutcome> {
        let status = self.child.wait().await?;
        Ok(ExitOutcome::from_status(status))
    }
}
