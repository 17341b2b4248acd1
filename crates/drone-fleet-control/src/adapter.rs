//! Capability contracts implemented by backends.
//!
//! A [`SiteAdapter`] leases resources from one provider; a [`BatchSystemAdapter`]
//! integrates those resources as machines of a batch system. Adapters translate their
//! native failures into [`BackendError`](drone_fleet_core::BackendError) and are only
//! ever called through the agents in [`crate::agents`].

use async_trait::async_trait;
use drone_fleet_core::{AttributeUpdate, DroneUuid, MachineStatus, ResourceAttributes, Result};

/// Provisioning of resources on one site.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// Request a new resource for the drone described by `attributes`.
    ///
    /// The returned update must carry the backend's resource identifier.
    ///
    /// # Errors
    ///
    /// Returns a `BackendError` describing why the resource could not be requested.
    async fn deploy_resource(&self, attributes: &ResourceAttributes) -> Result<AttributeUpdate>;

    /// Query the current status of the resource.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::DroneCrashed` if the resource vanished, or a transient
    /// error if the status is currently unknown.
    async fn resource_status(&self, attributes: &ResourceAttributes) -> Result<AttributeUpdate>;

    /// Stop the resource, keeping it in the backend.
    ///
    /// # Errors
    ///
    /// Returns a `BackendError` if the resource could not be stopped.
    async fn stop_resource(&self, attributes: &ResourceAttributes) -> Result<()>;

    /// Delete the resource from the backend.
    ///
    /// # Errors
    ///
    /// Returns a `BackendError` if the resource could not be deleted.
    async fn terminate_resource(&self, attributes: &ResourceAttributes) -> Result<()>;
}

/// Integration of drones with a batch system.
#[async_trait]
pub trait BatchSystemAdapter: Send + Sync {
    /// Make the drone's machine known to the batch system.
    ///
    /// # Errors
    ///
    /// Returns a `BackendError` if the batch system rejected the request.
    async fn integrate_machine(&self, drone_uuid: &DroneUuid) -> Result<()>;

    /// Remove the drone's machine from the batch system.
    ///
    /// # Errors
    ///
    /// Returns a `BackendError` if the batch system rejected the request.
    async fn disintegrate_machine(&self, drone_uuid: &DroneUuid) -> Result<()>;

    /// Stop the machine from accepting new jobs.
    ///
    /// # Errors
    ///
    /// Returns a `BackendError` if the batch system rejected the request.
    async fn drain_machine(&self, drone_uuid: &DroneUuid) -> Result<()>;

    /// Integration status of the drone's machine.
    ///
    /// Machines unknown to the batch system are reported as
    /// [`MachineStatus::NotAvailable`].
    ///
    /// # Errors
    ///
    /// Returns a `BackendError` if the status could not be queried.
    async fn get_machine_status(&self, drone_uuid: &DroneUuid) -> Result<MachineStatus>;

    /// Fraction of the machine's resources claimed by jobs, in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns a `BackendError` if the value could not be queried.
    async fn get_allocation(&self, drone_uuid: &DroneUuid) -> Result<f64>;

    /// Fraction of the machine's resources actually used by jobs, in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns a `BackendError` if the value could not be queried.
    async fn get_utilisation(&self, drone_uuid: &DroneUuid) -> Result<f64>;
}
