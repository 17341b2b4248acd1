//! Error types for the utils crate.

use std::sync::Arc;

use thiserror::Error;

/// A command that ran but exited unsuccessfully.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("command exited with code {exit_code}: {stderr}")]
pub struct CommandExecutionFailure {
    /// Exit code of the process, `-1` if it was killed by a signal.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Errors that can occur while executing commands.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The command ran and returned a non-zero exit code.
    #[error(transparent)]
    CommandFailed(#[from] CommandExecutionFailure),

    /// The process could not be spawned or its pipes failed.
    #[error("failed to run command: {0}")]
    Spawn(#[from] std::io::Error),

    /// The remote connection could not be (re-)established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
}

impl ExecutorError {
    /// Check if this error is retriable.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_))
    }
}

/// Errors delivered to callers of a [`BulkCall`](crate::bulk_call::BulkCall).
///
/// Every task of a failed batch receives an equal error: for a failing command, all of
/// them share the very same `Arc`.
#[derive(Debug, Error)]
pub enum BulkCallError<E> {
    /// The bulk command failed for the whole batch.
    #[error("bulk command failed: {0}")]
    Command(Arc<E>),

    /// The bulk command returned a different number of results than it got items.
    #[error("bulk command returned {got} results for {expected} items")]
    LengthMismatch {
        /// Number of items in the batch.
        expected: usize,
        /// Number of results returned.
        got: usize,
    },

    /// The dispatcher stopped before the task was answered.
    #[error("bulk call dispatcher stopped")]
    Closed,
}

impl<E> Clone for BulkCallError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Command(err) => Self::Command(Arc::clone(err)),
            Self::LengthMismatch { expected, got } => Self::LengthMismatch {
                expected: *expected,
                got: *got,
            },
            Self::Closed => Self::Closed,
        }
    }
}
