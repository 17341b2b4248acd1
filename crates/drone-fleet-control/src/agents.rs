//! Agents delegating lifecycle calls to backend adapters.
//!
//! Every adapter call goes through [`handle_exceptions`], which bounds it with the
//! configured call timeout and logs failures in one place.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use drone_fleet_core::{
    AttributeUpdate, BackendError, DroneUuid, MachineStatus, ResourceAttributes, Result,
};
use tracing::{debug, error, warn};

use crate::adapter::{BatchSystemAdapter, SiteAdapter};
use crate::config::MachineMetaData;

/// Default bound for a single backend call.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Default time between two drone ticks.
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Run `call` with a timeout, translating an expired timeout to
/// [`BackendError::Timeout`].
///
/// # Errors
///
/// Returns the adapter's error unchanged, or `BackendError::Timeout`.
pub async fn handle_exceptions<T>(
    operation: &str,
    drone_uuid: &DroneUuid,
    limit: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => {
            debug!(drone_uuid = %drone_uuid, operation, "backend call succeeded");
            Ok(value)
        }
        Ok(Err(err)) if err.is_transient() || err.is_crash() => {
            warn!(drone_uuid = %drone_uuid, operation, error = %err, "backend call failed");
            Err(err)
        }
        Ok(Err(err)) => {
            error!(drone_uuid = %drone_uuid, operation, error = %err, "backend call failed");
            Err(err)
        }
        Err(_) => {
            warn!(drone_uuid = %drone_uuid, operation, timeout = ?limit, "backend call timed out");
            Err(BackendError::Timeout(format!(
                "{operation} did not finish within {}s",
                limit.as_secs()
            )))
        }
    }
}

/// Forwards resource lifecycle calls to a [`SiteAdapter`] and carries the site's
/// settings for the drones it serves.
pub struct SiteAgent {
    adapter: Arc<dyn SiteAdapter>,
    site_name: String,
    machine_type: String,
    machine_meta_data: MachineMetaData,
    drone_minimum_lifetime: Option<Duration>,
    drone_heartbeat_interval: Duration,
    call_timeout: Duration,
}

impl SiteAgent {
    /// Create an agent for one machine type of a site.
    pub fn new(
        adapter: Arc<dyn SiteAdapter>,
        site_name: impl Into<String>,
        machine_type: impl Into<String>,
        machine_meta_data: MachineMetaData,
    ) -> Self {
        Self {
            adapter,
            site_name: site_name.into(),
            machine_type: machine_type.into(),
            machine_meta_data,
            drone_minimum_lifetime: None,
            drone_heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Keep available drones at least this long before draining them.
    #[must_use]
    pub const fn with_minimum_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.drone_minimum_lifetime = lifetime;
        self
    }

    /// Set the time between two ticks of this site's drones.
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.drone_heartbeat_interval = interval;
        self
    }

    /// Set the bound for a single backend call.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Generate the uuid of a new drone on this site.
    #[must_use]
    pub fn drone_uuid(&self) -> DroneUuid {
        DroneUuid::generate(&self.site_name)
    }

    /// Name of the site.
    #[must_use]
    pub fn site_name(&self) -> &str {
        &self.site_name
    }

    /// Machine type requested for drones.
    #[must_use]
    pub fn machine_type(&self) -> &str {
        &self.machine_type
    }

    /// Resources of one machine.
    #[must_use]
    pub const fn machine_meta_data(&self) -> &MachineMetaData {
        &self.machine_meta_data
    }

    /// Minimum time a drone stays available, if limited.
    #[must_use]
    pub const fn drone_minimum_lifetime(&self) -> Option<Duration> {
        self.drone_minimum_lifetime
    }

    /// Time between two ticks of a drone.
    #[must_use]
    pub const fn drone_heartbeat_interval(&self) -> Duration {
        self.drone_heartbeat_interval
    }

    /// Request the drone's resource.
    ///
    /// # Errors
    ///
    /// Returns the translated backend error.
    pub async fn deploy_resource(&self, attributes: &ResourceAttributes) -> Result<AttributeUpdate> {
        handle_exceptions(
            "deploy_resource",
            attributes.drone_uuid(),
            self.call_timeout,
            self.adapter.deploy_resource(attributes),
        )
        .await
    }

    /// Query the status of the drone's resource.
    ///
    /// # Errors
    ///
    /// Returns the translated backend error.
    pub async fn resource_status(&self, attributes: &ResourceAttributes) -> Result<AttributeUpdate> {
        handle_exceptions(
            "resource_status",
            attributes.drone_uuid(),
            self.call_timeout,
            self.adapter.resource_status(attributes),
        )
        .await
    }

    /// Stop the drone's resource.
    ///
    /// # Errors
    ///
    /// Returns the translated backend error.
    pub async fn stop_resource(&self, attributes: &ResourceAttributes) -> Result<()> {
        handle_exceptions(
            "stop_resource",
            attributes.drone_uuid(),
            self.call_timeout,
            self.adapter.stop_resource(attributes),
        )
        .await
    }

    /// Delete the drone's resource.
    ///
    /// # Errors
    ///
    /// Returns the translated backend error.
    pub async fn terminate_resource(&self, attributes: &ResourceAttributes) -> Result<()> {
        handle_exceptions(
            "terminate_resource",
            attributes.drone_uuid(),
            self.call_timeout,
            self.adapter.terminate_resource(attributes),
        )
        .await
    }
}

/// Forwards machine integration calls to a [`BatchSystemAdapter`].
pub struct BatchSystemAgent {
    adapter: Arc<dyn BatchSystemAdapter>,
    call_timeout: Duration,
}

impl BatchSystemAgent {
    /// Create an agent for `adapter`.
    pub fn new(adapter: Arc<dyn BatchSystemAdapter>) -> Self {
        Self {
            adapter,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Set the bound for a single backend call.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Integrate the drone's machine.
    ///
    /// # Errors
    ///
    /// Returns the translated backend error.
    pub async fn integrate_machine(&self, drone_uuid: &DroneUuid) -> Result<()> {
        handle_exceptions(
            "integrate_machine",
            drone_uuid,
            self.call_timeout,
            self.adapter.integrate_machine(drone_uuid),
        )
        .await
    }

    /// Disintegrate the drone's machine.
    ///
    /// # Errors
    ///
    /// Returns the translated backend error.
    pub async fn disintegrate_machine(&self, drone_uuid: &DroneUuid) -> Result<()> {
        handle_exceptions(
            "disintegrate_machine",
            drone_uuid,
            self.call_timeout,
            self.adapter.disintegrate_machine(drone_uuid),
        )
        .await
    }

    /// Drain the drone's machine.
    ///
    /// # Errors
    ///
    /// Returns the translated backend error.
    pub async fn drain_machine(&self, drone_uuid: &DroneUuid) -> Result<()> {
        handle_exceptions(
            "drain_machine",
            drone_uuid,
            self.call_timeout,
            self.adapter.drain_machine(drone_uuid),
        )
        .await
    }

    /// Integration status of the drone's machine.
    ///
    /// # Errors
    ///
    /// Returns the translated backend error.
    pub async fn get_machine_status(&self, drone_uuid: &DroneUuid) -> Result<MachineStatus> {
        handle_exceptions(
            "get_machine_status",
            drone_uuid,
            self.call_timeout,
            self.adapter.get_machine_status(drone_uuid),
        )
        .await
    }

    /// Allocation of the drone's machine.
    ///
    /// # Errors
    ///
    /// Returns the translated backend error.
    pub async fn get_allocation(&self, drone_uuid: &DroneUuid) -> Result<f64> {
        handle_exceptions(
            "get_allocation",
            drone_uuid,
            self.call_timeout,
            self.adapter.get_allocation(drone_uuid),
        )
        .await
    }

    /// Utilisation of the drone's machine.
    ///
    /// # Errors
    ///
    /// Returns the translated backend error.
    pub async fn get_utilisation(&self, drone_uuid: &DroneUuid) -> Result<f64> {
        handle_exceptions(
            "get_utilisation",
            drone_uuid,
            self.call_timeout,
            self.adapter.get_utilisation(drone_uuid),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid() -> DroneUuid {
        DroneUuid::from_parts("site", "0123456789")
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_becomes_backend_timeout() {
        let result: Result<()> = handle_exceptions(
            "deploy_resource",
            &uuid(),
            Duration::from_secs(5),
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            },
        )
        .await;

        match result {
            Err(BackendError::Timeout(message)) => {
                assert_eq!(message, "deploy_resource did not finish within 5s");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn errors_pass_through() {
        let result: Result<()> = handle_exceptions(
            "terminate_resource",
            &uuid(),
            Duration::from_secs(5),
            async { Err(BackendError::DroneCrashed("vm-1".into())) },
        )
        .await;
        assert_eq!(result, Err(BackendError::DroneCrashed("vm-1".into())));

        let value = handle_exceptions("get_allocation", &uuid(), Duration::from_secs(5), async {
            Ok(0.5)
        })
        .await;
        assert_eq!(value, Ok(0.5));
    }
}
