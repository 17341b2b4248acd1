//! Simulated site and batch-system backends.
//!
//! The fakes keep all state in memory and behave like a well-behaved provider: resources
//! boot after a configurable time, stop and terminate on request, and machines integrate
//! and drain instantly. They drive the binary when no real backend is configured and the
//! end-to-end tests.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use drone_fleet_core::{
    AttributeUpdate, BackendError, DroneUuid, MachineStatus, ResourceAttributes, ResourceStatus,
    Result,
};
use drone_fleet_utils::{AsyncCacheMap, BulkCall, BulkCallError};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::adapter::{BatchSystemAdapter, SiteAdapter};
use crate::config::{BatchSystemConfig, FakeSiteConfig};

#[derive(Debug, Clone, Copy)]
struct FakeResource {
    deployed_at: Instant,
    /// Set once the resource was stopped or deleted.
    status: Option<ResourceStatus>,
}

type Resources = Arc<Mutex<HashMap<String, FakeResource>>>;

/// A site whose resources only exist in memory.
///
/// Deployments are collected into bulk calls of `bulk_size` resources.
pub struct FakeSiteAdapter {
    config: FakeSiteConfig,
    resources: Resources,
    deploy: BulkCall<DroneUuid, String, BackendError>,
}

impl FakeSiteAdapter {
    /// Create a site behaving as described by `config`.
    #[must_use]
    pub fn new(config: FakeSiteConfig) -> Self {
        let resources: Resources = Arc::default();
        let counter = Arc::new(AtomicU64::new(0));

        let deployed = Arc::clone(&resources);
        let deploy = BulkCall::new(
            move |drones: Vec<DroneUuid>| {
                let resources = Arc::clone(&deployed);
                let counter = Arc::clone(&counter);
                async move {
                    let deployed_at = Instant::now();
                    let mut resources = resources.lock();
                    let ids = drones
                        .iter()
                        .map(|_| {
                            let id = format!("fake-{:08x}", counter.fetch_add(1, Ordering::Relaxed));
                            resources.insert(
                                id.clone(),
                                FakeResource {
                                    deployed_at,
                                    status: None,
                                },
                            );
                            id
                        })
                        .collect::<Vec<_>>();
                    debug!(resources = ids.len(), "deployed fake resources");
                    Ok(Some(ids))
                }
            },
            config.bulk_size,
            config.bulk_delay(),
        );
        let deploy = match config.bulk_concurrency {
            Some(concurrent) => deploy.with_concurrency(concurrent),
            None => deploy,
        };

        Self {
            config,
            resources,
            deploy,
        }
    }

    /// Number of resources that were deployed and not deleted.
    #[must_use]
    pub fn live_resources(&self) -> usize {
        self.resources
            .lock()
            .values()
            .filter(|resource| resource.status != Some(ResourceStatus::Deleted))
            .count()
    }

    async fn respond(&self) {
        let delay = self.config.api_response_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Apply `change` to the resource of `attributes`.
    fn with_resource<T>(
        &self,
        attributes: &ResourceAttributes,
        change: impl FnOnce(&mut FakeResource) -> T,
    ) -> Result<T> {
        let remote = attributes.remote_resource_uuid.as_deref().ok_or_else(|| {
            BackendError::DroneCrashed(format!("{} has no resource", attributes.drone_uuid()))
        })?;
        let mut resources = self.resources.lock();
        resources
            .get_mut(remote)
            .map(change)
            .ok_or_else(|| BackendError::DroneCrashed(format!("resource {remote} does not exist")))
    }
}

#[async_trait]
impl SiteAdapter for FakeSiteAdapter {
    async fn deploy_resource(&self, attributes: &ResourceAttributes) -> Result<AttributeUpdate> {
        self.respond().await;
        match self.deploy.invoke(attributes.drone_uuid().clone()).await {
            Ok(Some(remote)) => Ok(AttributeUpdate::status(ResourceStatus::Booting).with_remote_uuid(remote)),
            Ok(None) => Err(BackendError::Internal("deployment returned no resource".into())),
            Err(BulkCallError::Command(err)) => Err((*err).clone()),
            Err(err) => Err(BackendError::Internal(err.to_string())),
        }
    }

    async fn resource_status(&self, attributes: &ResourceAttributes) -> Result<AttributeUpdate> {
        self.respond().await;
        let boot_time = self.config.resource_boot_time();
        let status = self.with_resource(attributes, |resource| {
            resource.status.unwrap_or(if resource.deployed_at.elapsed() >= boot_time {
                ResourceStatus::Running
            } else {
                ResourceStatus::Booting
            })
        })?;
        Ok(AttributeUpdate::status(status))
    }

    async fn stop_resource(&self, attributes: &ResourceAttributes) -> Result<()> {
        self.respond().await;
        self.with_resource(attributes, |resource| {
            resource.status = Some(ResourceStatus::Stopped);
        })
    }

    async fn terminate_resource(&self, attributes: &ResourceAttributes) -> Result<()> {
        self.respond().await;
        self.with_resource(attributes, |resource| {
            resource.status = Some(ResourceStatus::Deleted);
        })
    }
}

impl fmt::Debug for FakeSiteAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeSiteAdapter")
            .field("config", &self.config)
            .field("resources", &self.resources.lock().len())
            .finish_non_exhaustive()
    }
}

type Machines = Arc<Mutex<HashMap<DroneUuid, MachineStatus>>>;

/// A batch system whose machine table only exists in memory.
///
/// Machine statuses are read from a snapshot of the table that is refreshed at most
/// once per `status_max_age_seconds`, so changes become visible with a delay.
pub struct FakeBatchSystemAdapter {
    config: BatchSystemConfig,
    machines: Machines,
    status: AsyncCacheMap<DroneUuid, MachineStatus, Infallible>,
}

impl FakeBatchSystemAdapter {
    /// Create a batch system behaving as described by `config`.
    #[must_use]
    pub fn new(config: BatchSystemConfig) -> Self {
        let machines: Machines = Arc::default();
        let table = Arc::clone(&machines);
        let status = AsyncCacheMap::new(
            move || {
                let table = Arc::clone(&table);
                async move {
                    let snapshot = table.lock().clone();
                    Ok(snapshot)
                }
            },
            config.status_max_age(),
        );

        Self {
            config,
            machines,
            status,
        }
    }

    fn set_machine(&self, drone_uuid: &DroneUuid, status: MachineStatus) {
        self.machines.lock().insert(drone_uuid.clone(), status);
    }
}

#[async_trait]
impl BatchSystemAdapter for FakeBatchSystemAdapter {
    async fn integrate_machine(&self, drone_uuid: &DroneUuid) -> Result<()> {
        self.set_machine(drone_uuid, MachineStatus::Available);
        Ok(())
    }

    async fn disintegrate_machine(&self, drone_uuid: &DroneUuid) -> Result<()> {
        self.machines.lock().remove(drone_uuid);
        Ok(())
    }

    async fn drain_machine(&self, drone_uuid: &DroneUuid) -> Result<()> {
        self.set_machine(drone_uuid, MachineStatus::Drained);
        Ok(())
    }

    async fn get_machine_status(&self, drone_uuid: &DroneUuid) -> Result<MachineStatus> {
        Ok(self
            .status
            .get(drone_uuid)
            .await
            .unwrap_or(MachineStatus::NotAvailable))
    }

    async fn get_allocation(&self, _drone_uuid: &DroneUuid) -> Result<f64> {
        Ok(self.config.allocation)
    }

    async fn get_utilisation(&self, _drone_uuid: &DroneUuid) -> Result<f64> {
        Ok(self.config.utilisation)
    }
}

impl fmt::Debug for FakeBatchSystemAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeBatchSystemAdapter")
            .field("config", &self.config)
            .field("machines", &self.machines.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future::join_all;

    use super::*;

    fn site_config() -> FakeSiteConfig {
        FakeSiteConfig {
            resource_boot_time_seconds: 30,
            bulk_size: 4,
            bulk_delay_ms: 100,
            ..FakeSiteConfig::default()
        }
    }

    fn attributes(n: usize) -> ResourceAttributes {
        ResourceAttributes::new(
            DroneUuid::from_parts("fake", &format!("{n:010x}")),
            "Fake",
            "m1.small",
        )
    }

    async fn deploy(site: &FakeSiteAdapter, n: usize) -> ResourceAttributes {
        let mut attributes = attributes(n);
        let update = site.deploy_resource(&attributes).await.unwrap();
        attributes.apply(update);
        attributes
    }

    #[tokio::test(start_paused = true)]
    async fn resources_boot_after_boot_time() {
        let site = FakeSiteAdapter::new(site_config());
        let attributes = deploy(&site, 1).await;
        assert_eq!(attributes.resource_status, ResourceStatus::Booting);

        let update = site.resource_status(&attributes).await.unwrap();
        assert_eq!(update.resource_status, Some(ResourceStatus::Booting));

        tokio::time::sleep(Duration::from_secs(30)).await;
        let update = site.resource_status(&attributes).await.unwrap();
        assert_eq!(update.resource_status, Some(ResourceStatus::Running));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_deployments_get_distinct_resources() {
        let site = FakeSiteAdapter::new(site_config());
        let deployed = join_all((0..10).map(|n| deploy(&site, n))).await;

        let mut remotes: Vec<_> = deployed
            .iter()
            .map(|a| a.remote_resource_uuid.clone().unwrap())
            .collect();
        remotes.sort();
        remotes.dedup();
        assert_eq!(remotes.len(), 10);
        assert_eq!(site.live_resources(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_and_terminate() {
        let site = FakeSiteAdapter::new(site_config());
        let attributes = deploy(&site, 1).await;

        site.stop_resource(&attributes).await.unwrap();
        let update = site.resource_status(&attributes).await.unwrap();
        assert_eq!(update.resource_status, Some(ResourceStatus::Stopped));

        site.terminate_resource(&attributes).await.unwrap();
        let update = site.resource_status(&attributes).await.unwrap();
        assert_eq!(update.resource_status, Some(ResourceStatus::Deleted));
        assert_eq!(site.live_resources(), 0);
    }

    #[tokio::test]
    async fn unknown_resource_is_a_crash() {
        let site = FakeSiteAdapter::new(site_config());
        let mut attributes = attributes(1);

        let err = site.resource_status(&attributes).await.unwrap_err();
        assert!(err.is_crash());

        attributes.remote_resource_uuid = Some("fake-ffffffff".into());
        let err = site.terminate_resource(&attributes).await.unwrap_err();
        assert!(err.is_crash());
    }

    #[tokio::test(start_paused = true)]
    async fn machine_status_follows_snapshot() {
        let batch = FakeBatchSystemAdapter::new(BatchSystemConfig {
            allocation: 0.5,
            utilisation: 0.25,
            status_max_age_seconds: 10,
        });
        let uuid = DroneUuid::from_parts("fake", "0000000001");

        assert_eq!(
            batch.get_machine_status(&uuid).await.unwrap(),
            MachineStatus::NotAvailable
        );

        batch.integrate_machine(&uuid).await.unwrap();
        // Still served from the previous snapshot.
        assert_eq!(
            batch.get_machine_status(&uuid).await.unwrap(),
            MachineStatus::NotAvailable
        );

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(
            batch.get_machine_status(&uuid).await.unwrap(),
            MachineStatus::Available
        );
        assert!((batch.get_allocation(&uuid).await.unwrap() - 0.5).abs() < f64::EPSILON);
        assert!((batch.get_utilisation(&uuid).await.unwrap() - 0.25).abs() < f64::EPSILON);

        batch.drain_machine(&uuid).await.unwrap();
        batch.disintegrate_machine(&uuid).await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(
            batch.get_machine_status(&uuid).await.unwrap(),
            MachineStatus::NotAvailable
        );
    }
}
