use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{run_process, CommandResult, Executor};
use crate::error::ExecutorError;

/// Runs commands locally through `sh -c`.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    shell: Option<String>,
}

impl ShellExecutor {
    /// Create an executor using `sh`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different shell binary, invoked as `<shell> -c <command>`.
    #[must_use]
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: Some(shell.into()),
        }
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn run_command(
        &self,
        command: &str,
        stdin: Option<&str>,
    ) -> Result<CommandResult, ExecutorError> {
        let shell = self.shell.as_deref().unwrap_or("sh");
        let mut process = Command::new(shell);
        process.arg("-c").arg(command);

        let result = run_process(process, stdin).await?;
        debug!(command, exit_code = result.exit_code, "ran shell command");
        result.into_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let result = ShellExecutor::new()
            .run_command("echo drone", None)
            .await
            .unwrap();
        assert_eq!(result.stdout, "drone\n");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn feeds_stdin() {
        let result = ShellExecutor::new()
            .run_command("tr a-z A-Z", Some("site"))
            .await
            .unwrap();
        assert_eq!(result.stdout, "SITE");
    }

    #[tokio::test]
    async fn non_zero_exit_is_command_failure() {
        let err = ShellExecutor::new()
            .run_command("echo oops >&2; exit 3", None)
            .await
            .unwrap_err();
        match err {
            ExecutorError::CommandFailed(failure) => {
                assert_eq!(failure.exit_code, 3);
                assert_eq!(failure.stderr, "oops\n");
            }
            other => panic!("expected command failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_shell_is_spawn_error() {
        let err = ShellExecutor::with_shell("/nonexistent/shell")
            .run_command("true", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Spawn(_)));
    }
}
