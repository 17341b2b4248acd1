//! Observers notified on every drone state change.

mod log;
mod registry;

pub use log::LogPlugin;
pub use registry::RegistryPlugin;

use async_trait::async_trait;
use drone_fleet_core::{ResourceAttributes, StateKind};

use crate::error::PluginError;

/// An observer of drone state changes.
///
/// Plugins are notified sequentially and awaited before the drone continues; they must
/// not hold on to `attributes`.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Name used when logging failures of this plugin.
    fn name(&self) -> &str;

    /// Called after the drone entered `state`.
    ///
    /// # Errors
    ///
    /// Returns a `PluginError` if the plugin could not process the change. The drone
    /// logs the error and carries on.
    async fn notify(
        &self,
        state: StateKind,
        attributes: &ResourceAttributes,
    ) -> Result<(), PluginError>;
}
