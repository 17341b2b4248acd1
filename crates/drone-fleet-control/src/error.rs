//! Error types for the drone control layer.
//!
//! Backend failures are mostly handled inside the state machine: transient ones retry
//! a state, crashes force cleanup. Only what the state machine cannot handle escapes
//! a drone's run loop as a [`ControlError`].

use drone_fleet_core::{BackendError, StateKind};
use drone_fleet_store::StoreError;
use thiserror::Error;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that escape the drone lifecycle or fail its construction.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A backend failure the state machine does not handle.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Checkpoint store error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A state has no successor for the observed status.
    #[error("no transition from {state} for status {status}")]
    MissingTransition {
        /// The state being processed.
        state: StateKind,
        /// The observed resource or machine status.
        status: String,
    },
}

impl ControlError {
    /// Returns true if this error was caused by the environment rather than a bug or
    /// misconfiguration.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Backend(err) => err.is_transient(),
            Self::Store(_) => true,
            Self::Config(_) | Self::MissingTransition { .. } => false,
        }
    }
}

/// Errors reported by plugins.
///
/// Plugin errors are logged by the notifying drone and never interrupt its lifecycle.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Persisting the drone failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Any other plugin failure.
    #[error("{0}")]
    Failed(String),
}
