//! Pools of drones sharing one site and machine type.
//!
//! A [`DronePool`] turns an aggregate demand into individual drones: it spawns drones
//! while the wanted capacity exceeds what its active drones provide, and releases
//! surplus drones by zeroing their demand so their state machines shut them down.

use std::fmt;
use std::sync::Arc;

use drone_fleet_core::StateKind;
use drone_fleet_store::DroneRecord;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agents::{BatchSystemAgent, SiteAgent};
use crate::drone::{Drone, DroneHandle};
use crate::error::Result;
use crate::plugins::Plugin;

struct Member {
    handle: DroneHandle,
    task: JoinHandle<Result<()>>,
}

impl Member {
    /// Whether the drone still counts towards the pool's capacity.
    fn is_active(&self) -> bool {
        self.holds_resource()
            && self.handle.demand() > 0.0
            && self
                .handle
                .state()
                .is_none_or(StateKind::is_provisioning_or_available)
    }

    fn holds_resource(&self) -> bool {
        !self.task.is_finished() && !self.handle.is_down()
    }
}

/// Drones of one site and machine type.
pub struct DronePool {
    site_agent: Arc<SiteAgent>,
    batch_system_agent: Arc<BatchSystemAgent>,
    plugins: Vec<Arc<dyn Plugin>>,
    quota: Option<usize>,
    members: Mutex<Vec<Member>>,
}

impl DronePool {
    /// Create an empty pool.
    #[must_use]
    pub fn new(
        site_agent: Arc<SiteAgent>,
        batch_system_agent: Arc<BatchSystemAgent>,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> Self {
        Self {
            site_agent,
            batch_system_agent,
            plugins,
            quota: None,
            members: Mutex::new(Vec::new()),
        }
    }

    /// Limit the number of drones holding resources at the same time.
    #[must_use]
    pub const fn with_quota(mut self, quota: Option<usize>) -> Self {
        self.quota = quota;
        self
    }

    /// Name of the pool's site.
    #[must_use]
    pub fn site_name(&self) -> &str {
        self.site_agent.site_name()
    }

    /// Machine type of the pool's drones.
    #[must_use]
    pub fn machine_type(&self) -> &str {
        self.site_agent.machine_type()
    }

    /// Capacity a single drone of this pool supplies.
    #[must_use]
    pub fn drone_capacity(&self) -> f64 {
        f64::from(self.site_agent.machine_meta_data().cores)
    }

    /// Start a new drone.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn_drone(&self) -> DroneHandle {
        let drone = Drone::new(
            Arc::clone(&self.site_agent),
            Arc::clone(&self.batch_system_agent),
            self.plugins.clone(),
        );
        self.launch(drone)
    }

    /// Recreate the pool's drones from checkpoint records.
    ///
    /// Records of other sites or machine types and drones that are already down are
    /// skipped. Returns the number of drones restored.
    pub fn restore(&self, records: impl IntoIterator<Item = DroneRecord>) -> usize {
        let mut restored = 0;
        for record in records {
            if record.site_name() != self.site_name()
                || record.attributes.machine_type != self.machine_type()
                || record.state.is_terminal()
            {
                continue;
            }

            debug!(drone_uuid = %record.drone_uuid(), state = %record.state, "restoring drone");
            let drone = Drone::restore(
                Arc::clone(&self.site_agent),
                Arc::clone(&self.batch_system_agent),
                self.plugins.clone(),
                record,
            );
            self.launch(drone);
            restored += 1;
        }

        if restored > 0 {
            info!(site = %self.site_name(), machine_type = %self.machine_type(), restored, "restored drones");
        }
        restored
    }

    fn launch(&self, mut drone: Drone) -> DroneHandle {
        let handle = drone.handle();
        let task = tokio::spawn(async move { drone.run().await });
        self.members.lock().push(Member {
            handle: handle.clone(),
            task,
        });
        handle
    }

    /// Adjust the pool to supply `total` capacity.
    ///
    /// Spawns drones while the active drones cannot cover `total`, up to the quota.
    /// Surplus drones get a demand of zero; drones that are not available yet are
    /// released first.
    pub fn set_demand(&self, total: f64) {
        let desired = drones_for(total, self.drone_capacity());

        let (active, holding) = {
            let members = self.members.lock();
            let mut active: Vec<DroneHandle> = members
                .iter()
                .filter(|member| member.is_active())
                .map(|member| member.handle.clone())
                .collect();
            active.sort_by_key(|handle| handle.state() == Some(StateKind::Available));
            let holding = members.iter().filter(|m| m.holds_resource()).count();
            (active, holding)
        };

        if desired > active.len() {
            let mut missing = desired - active.len();
            if let Some(quota) = self.quota {
                let allowed = quota.saturating_sub(holding);
                if allowed < missing {
                    warn!(
                        site = %self.site_name(),
                        machine_type = %self.machine_type(),
                        quota,
                        missing,
                        "site quota reached"
                    );
                    missing = allowed;
                }
            }
            for _ in 0..missing {
                self.spawn_drone();
            }
        } else {
            for handle in active.iter().take(active.len() - desired) {
                debug!(drone_uuid = %handle.drone_uuid(), "releasing drone");
                handle.set_demand(0.0);
            }
        }
    }

    /// Handles of all drones the pool tracks, including ones that are down but not yet
    /// collected.
    #[must_use]
    pub fn drones(&self) -> Vec<DroneHandle> {
        self.members
            .lock()
            .iter()
            .map(|member| member.handle.clone())
            .collect()
    }

    /// Number of tracked drones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    /// Whether the pool tracks no drones.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    /// Total demand of the pool's drones.
    #[must_use]
    pub fn demand(&self) -> f64 {
        self.members.lock().iter().map(|m| m.handle.demand()).sum()
    }

    /// Total capacity the pool's drones supply.
    #[must_use]
    pub fn supply(&self) -> f64 {
        self.members.lock().iter().map(|m| m.handle.supply()).sum()
    }

    /// Mean allocation of the drones that supply capacity.
    #[must_use]
    pub fn allocation(&self) -> f64 {
        self.mean_of_supplying(DroneHandle::allocation)
    }

    /// Mean utilisation of the drones that supply capacity.
    #[must_use]
    pub fn utilisation(&self) -> f64 {
        self.mean_of_supplying(DroneHandle::utilisation)
    }

    #[allow(clippy::cast_precision_loss)]
    fn mean_of_supplying(&self, figure: fn(&DroneHandle) -> f64) -> f64 {
        let members = self.members.lock();
        let values: Vec<f64> = members
            .iter()
            .filter(|m| m.handle.supply() > 0.0)
            .map(|m| figure(&m.handle))
            .collect();
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    /// Forget drones whose task finished, logging the ones that failed.
    ///
    /// Returns the number of drones removed.
    pub async fn collect_garbage(&self) -> usize {
        let finished: Vec<Member> = {
            let mut members = self.members.lock();
            let (finished, running) = members.drain(..).partition(|m| m.task.is_finished());
            *members = running;
            finished
        };

        let collected = finished.len();
        for member in finished {
            match member.task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(drone_uuid = %member.handle.drone_uuid(), error = %err, "drone stopped with error");
                }
                Err(err) => {
                    error!(drone_uuid = %member.handle.drone_uuid(), error = %err, "drone task panicked");
                }
            }
        }
        if collected > 0 {
            debug!(site = %self.site_name(), machine_type = %self.machine_type(), collected, "collected drones");
        }
        collected
    }
}

impl fmt::Debug for DronePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DronePool")
            .field("site_name", &self.site_name())
            .field("machine_type", &self.machine_type())
            .field("quota", &self.quota)
            .field("drones", &self.len())
            .finish_non_exhaustive()
    }
}

/// Number of drones of `capacity` needed to cover `total`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn drones_for(total: f64, capacity: f64) -> usize {
    if total <= 0.0 || capacity <= 0.0 || !total.is_finite() {
        return 0;
    }
    (total / capacity).ceil() as usize
}
