use std::sync::Arc;

use async_trait::async_trait;
use drone_fleet_core::{ResourceAttributes, StateKind};
use drone_fleet_store::{DroneRecord, Store};
use tracing::debug;

use super::Plugin;
use crate::error::PluginError;

/// Checkpoints every state change into a [`Store`].
///
/// A drone is inserted when it is requested, updated on every later change and deleted
/// once it is down. A missing record on update or delete is not an error: the drone may
/// predate the registry.
pub struct RegistryPlugin<S: Store> {
    store: Arc<S>,
}

impl<S: Store> RegistryPlugin<S> {
    /// Create a plugin writing to `store`.
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store + 'static> Plugin for RegistryPlugin<S> {
    fn name(&self) -> &str {
        "registry"
    }

    async fn notify(
        &self,
        state: StateKind,
        attributes: &ResourceAttributes,
    ) -> Result<(), PluginError> {
        let record = DroneRecord::new(attributes.clone(), state);
        let result = match state {
            StateKind::Request => self.store.put_drone(&record),
            StateKind::Down => self.store.delete_drone(record.drone_uuid()),
            _ => self.store.update_drone(&record),
        };

        match result {
            Err(err) if err.is_not_found() => {
                debug!(drone_uuid = %record.drone_uuid(), state = %state, "drone not in registry");
                Ok(())
            }
            other => other.map_err(PluginError::from),
        }
    }
}
