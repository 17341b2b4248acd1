//! Command execution capability.
//!
//! Backends that drive command-line tools (batch-system clients, cloud CLIs) run them
//! through an [`Executor`], either locally ([`ShellExecutor`]) or on a remote login
//! node over one multiplexed SSH connection ([`SshExecutor`]).

mod shell;
mod ssh;

pub use shell::ShellExecutor;
pub use ssh::{SshConfig, SshExecutor};

use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{CommandExecutionFailure, ExecutorError};

/// Output of a successfully executed command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit code of the process.
    pub exit_code: i32,
}

impl CommandResult {
    /// Turn a non-zero exit code into [`ExecutorError::CommandFailed`].
    ///
    /// # Errors
    ///
    /// Returns the captured output as a [`CommandExecutionFailure`] if the exit code
    /// is not zero.
    pub fn into_success(self) -> Result<Self, ExecutorError> {
        if self.exit_code == 0 {
            Ok(self)
        } else {
            Err(CommandExecutionFailure {
                exit_code: self.exit_code,
                stdout: self.stdout,
                stderr: self.stderr,
            }
            .into())
        }
    }
}

/// Runs commands and reports their output.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `command`, feeding it `stdin` if given.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::CommandFailed`] on a non-zero exit code, and
    /// [`ExecutorError::Spawn`] or [`ExecutorError::ConnectionFailed`] if the command
    /// could not be run at all.
    async fn run_command(&self, command: &str, stdin: Option<&str>)
        -> Result<CommandResult, ExecutorError>;
}

/// Spawn `command`, write `stdin` to it and collect its output regardless of exit code.
pub(crate) async fn run_process(mut command: Command, stdin: Option<&str>) -> io::Result<CommandResult> {
    command
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;
    let mut pipe = child.stdin.take();
    let input = stdin.unwrap_or_default().as_bytes().to_vec();

    let write = async move {
        if let Some(pipe) = pipe.as_mut() {
            match pipe.write_all(&input).await {
                // The process may exit without reading its input.
                Err(err) if err.kind() != io::ErrorKind::BrokenPipe => return Err(err),
                _ => {}
            }
        }
        // Closing the pipe signals end of input.
        drop(pipe);
        Ok(())
    };

    let ((), output) = tokio::try_join!(write, child.wait_with_output())?;

    Ok(CommandResult {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}
