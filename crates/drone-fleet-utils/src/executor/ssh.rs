use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use super::{run_process, CommandResult, Executor};
use crate::error::ExecutorError;

/// Exit code the OpenSSH client uses for its own errors, e.g. a dropped connection.
const SSH_CONNECTION_ERROR: i32 = 255;

/// Upper bound for the delay between reconnection attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Connection settings for an [`SshExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfig {
    /// Remote host name.
    pub host: String,
    /// Remote user, defaults to the local ssh configuration.
    pub user: Option<String>,
    /// Remote port, defaults to the local ssh configuration.
    pub port: Option<u16>,
    /// Private key to authenticate with.
    pub identity_file: Option<PathBuf>,
    /// Socket of the shared control-master connection.
    pub control_path: PathBuf,
    /// Maximum number of concurrent sessions on the shared connection.
    pub max_sessions: usize,
    /// Attempts to (re-)establish the shared connection before giving up.
    pub connect_retries: u32,
    /// Retries of a command whose connection broke while it ran.
    pub command_retries: u32,
    /// Delay before the first reconnection retry; doubled after every attempt.
    pub backoff: Duration,
    /// Additional `-o` options passed to every ssh invocation.
    pub options: Vec<String>,
}

impl SshConfig {
    /// Settings for `host` with a control socket under the system temp directory.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        let control_path = std::env::temp_dir().join(format!("drone-fleet-ssh-{host}.sock"));
        Self {
            host,
            user: None,
            port: None,
            identity_file: None,
            control_path,
            // OpenSSH's default MaxSessions.
            max_sessions: 10,
            connect_retries: 3,
            command_retries: 2,
            backoff: Duration::from_secs(1),
            options: Vec::new(),
        }
    }

    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    /// Options shared by every invocation, before the destination.
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ];
        if let Some(port) = self.port {
            args.extend(["-p".to_string(), port.to_string()]);
        }
        if let Some(identity) = &self.identity_file {
            args.extend(["-i".to_string(), identity.display().to_string()]);
        }
        for option in &self.options {
            args.extend(["-o".to_string(), option.clone()]);
        }
        args
    }

    fn check_args(&self) -> Vec<String> {
        let mut args = self.common_args();
        args.extend(["-O".to_string(), "check".to_string(), self.destination()]);
        args
    }

    fn master_args(&self) -> Vec<String> {
        let mut args = self.common_args();
        args.extend([
            "-M".to_string(),
            "-N".to_string(),
            "-f".to_string(),
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
            self.destination(),
        ]);
        args
    }

    fn command_args(&self, command: &str) -> Vec<String> {
        let mut args = self.common_args();
        args.extend([self.destination(), command.to_string()]);
        args
    }
}

/// How a remote command ended.
#[derive(Debug, PartialEq, Eq)]
enum SshOutcome {
    Success(CommandResult),
    ConnectionLost(CommandResult),
    Failed(CommandResult),
}

impl SshOutcome {
    fn classify(result: CommandResult) -> Self {
        match result.exit_code {
            0 => Self::Success(result),
            SSH_CONNECTION_ERROR => Self::ConnectionLost(result),
            _ => Self::Failed(result),
        }
    }
}

/// Runs commands on a remote host over one multiplexed OpenSSH connection.
///
/// A control master is started on first use and shared by all commands; at most
/// `max_sessions` commands run on it at once. A dropped connection is re-established
/// with exponential backoff and the interrupted command is retried.
#[derive(Debug)]
pub struct SshExecutor {
    config: SshConfig,
    sessions: Semaphore,
    master: Mutex<()>,
}

impl SshExecutor {
    /// Create an executor; no connection is made until the first command.
    #[must_use]
    pub fn new(config: SshConfig) -> Self {
        let sessions = Semaphore::new(config.max_sessions.max(1));
        Self {
            config,
            sessions,
            master: Mutex::new(()),
        }
    }

    /// The connection settings.
    #[must_use]
    pub const fn config(&self) -> &SshConfig {
        &self.config
    }

    async fn ssh(&self, args: Vec<String>, stdin: Option<&str>) -> std::io::Result<CommandResult> {
        let mut command = Command::new("ssh");
        command.args(args);
        run_process(command, stdin).await
    }

    async fn master_alive(&self) -> bool {
        matches!(self.ssh(self.config.check_args(), None).await, Ok(result) if result.exit_code == 0)
    }

    /// Make sure the control master is up, starting it if necessary.
    async fn ensure_master(&self) -> Result<(), ExecutorError> {
        let _guard = self.master.lock().await;
        if self.master_alive().await {
            return Ok(());
        }

        let destination = self.config.destination();
        let attempts = self.config.connect_retries.max(1);
        let mut delay = self.config.backoff;

        for attempt in 1..=attempts {
            match self.ssh(self.config.master_args(), None).await {
                Ok(result) if result.exit_code == 0 => {
                    info!(destination = %destination, attempt, "established ssh connection");
                    return Ok(());
                }
                Ok(result) => {
                    warn!(destination = %destination, attempt, stderr = %result.stderr.trim(), "ssh connection failed");
                }
                Err(err) => {
                    warn!(destination = %destination, attempt, error = %err, "could not start ssh");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_BACKOFF);
            }
        }

        Err(ExecutorError::ConnectionFailed(format!(
            "could not connect to {destination} after {attempts} attempts"
        )))
    }
}

#[async_trait]
impl Executor for SshExecutor {
    async fn run_command(
        &self,
        command: &str,
        stdin: Option<&str>,
    ) -> Result<CommandResult, ExecutorError> {
        let _session = self
            .sessions
            .acquire()
            .await
            .map_err(|_| ExecutorError::ConnectionFailed("session pool closed".to_string()))?;

        let mut retries = 0;
        loop {
            self.ensure_master().await?;
            let result = self.ssh(self.config.command_args(command), stdin).await?;

            match SshOutcome::classify(result) {
                SshOutcome::Success(result) => {
                    debug!(host = %self.config.host, command, "ran remote command");
                    return Ok(result);
                }
                SshOutcome::Failed(result) => return result.into_success(),
                SshOutcome::ConnectionLost(result) if retries < self.config.command_retries => {
                    retries += 1;
                    warn!(
                        host = %self.config.host,
                        command,
                        retry = retries,
                        stderr = %result.stderr.trim(),
                        "ssh connection lost, retrying command"
                    );
                }
                SshOutcome::ConnectionLost(result) => {
                    return Err(ExecutorError::ConnectionFailed(result.stderr.trim().to_string()));
                }
            }
        }
    }
}
