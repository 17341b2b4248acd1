use async_trait::async_trait;
use drone_fleet_core::{ResourceAttributes, StateKind};
use tracing::info;

use super::Plugin;
use crate::error::PluginError;

/// Writes one structured log line per state change.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPlugin;

impl LogPlugin {
    /// Create the plugin.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Plugin for LogPlugin {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(
        &self,
        state: StateKind,
        attributes: &ResourceAttributes,
    ) -> Result<(), PluginError> {
        info!(
            drone_uuid = %attributes.drone_uuid(),
            site_name = %attributes.site_name,
            machine_type = %attributes.machine_type,
            remote_resource_uuid = attributes.remote_resource_uuid.as_deref().unwrap_or("-"),
            resource_status = ?attributes.resource_status,
            state = %state,
            "drone changed state"
        );
        Ok(())
    }
}
