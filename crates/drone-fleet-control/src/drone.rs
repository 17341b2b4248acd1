//! The drone: one leased resource and the loop driving its lifecycle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use drone_fleet_core::{DroneUuid, ResourceAttributes, ResourceStatus, StateKind};
use drone_fleet_store::DroneRecord;
use parking_lot::RwLock;
use tracing::{error, info};

use crate::agents::{BatchSystemAgent, SiteAgent};
use crate::error::Result;
use crate::plugins::Plugin;
use crate::states;

/// Figures of a drone that external observers may read while it runs.
#[derive(Debug, Default)]
struct Figures {
    demand: f64,
    supply: f64,
    allocation: f64,
    utilisation: f64,
    state: Option<StateKind>,
}

/// Shared view of a running drone.
///
/// The handle stays valid after the drone's task finished; its state then reads
/// [`StateKind::Down`].
#[derive(Debug, Clone)]
pub struct DroneHandle {
    drone_uuid: DroneUuid,
    maximum_demand: f64,
    figures: Arc<RwLock<Figures>>,
}

impl DroneHandle {
    /// The drone's uuid.
    #[must_use]
    pub const fn drone_uuid(&self) -> &DroneUuid {
        &self.drone_uuid
    }

    /// Capacity the drone supplies when fully available.
    #[must_use]
    pub const fn maximum_demand(&self) -> f64 {
        self.maximum_demand
    }

    /// Capacity currently wanted from the drone.
    #[must_use]
    pub fn demand(&self) -> f64 {
        self.figures.read().demand
    }

    /// Change the capacity wanted from the drone. A demand of zero makes it shut down.
    pub fn set_demand(&self, demand: f64) {
        self.figures.write().demand = demand;
    }

    /// Capacity the drone currently supplies.
    #[must_use]
    pub fn supply(&self) -> f64 {
        self.figures.read().supply
    }

    /// Allocation reported by the batch system.
    #[must_use]
    pub fn allocation(&self) -> f64 {
        self.figures.read().allocation
    }

    /// Utilisation reported by the batch system.
    #[must_use]
    pub fn utilisation(&self) -> f64 {
        self.figures.read().utilisation
    }

    /// The drone's current state, `None` before its first tick.
    #[must_use]
    pub fn state(&self) -> Option<StateKind> {
        self.figures.read().state
    }

    /// Whether the drone reached its terminal state.
    #[must_use]
    pub fn is_down(&self) -> bool {
        self.state().is_some_and(StateKind::is_terminal)
    }
}

/// One leased resource and its lifecycle.
///
/// A drone is driven by [`run`](Self::run), which ticks its state machine every
/// heartbeat until the drone is down. All state is owned by the drone's task; other
/// tasks observe it through a [`DroneHandle`].
pub struct Drone {
    site_agent: Arc<SiteAgent>,
    batch_system_agent: Arc<BatchSystemAgent>,
    plugins: Vec<Arc<dyn Plugin>>,
    attributes: ResourceAttributes,
    state: Option<StateKind>,
    figures: Arc<RwLock<Figures>>,
    maximum_demand: f64,
}

impl Drone {
    /// Create a drone that has not requested its resource yet.
    #[must_use]
    pub fn new(
        site_agent: Arc<SiteAgent>,
        batch_system_agent: Arc<BatchSystemAgent>,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> Self {
        let attributes = ResourceAttributes::new(
            site_agent.drone_uuid(),
            site_agent.site_name(),
            site_agent.machine_type(),
        );
        Self::with_attributes(site_agent, batch_system_agent, plugins, attributes, None)
    }

    /// Recreate a drone from a checkpoint, continuing in the recorded state.
    ///
    /// Plugins are not notified; the drone's identity and timestamps are kept.
    #[must_use]
    pub fn restore(
        site_agent: Arc<SiteAgent>,
        batch_system_agent: Arc<BatchSystemAgent>,
        plugins: Vec<Arc<dyn Plugin>>,
        record: DroneRecord,
    ) -> Self {
        Self::with_attributes(
            site_agent,
            batch_system_agent,
            plugins,
            record.attributes,
            Some(record.state),
        )
    }

    fn with_attributes(
        site_agent: Arc<SiteAgent>,
        batch_system_agent: Arc<BatchSystemAgent>,
        plugins: Vec<Arc<dyn Plugin>>,
        attributes: ResourceAttributes,
        state: Option<StateKind>,
    ) -> Self {
        let maximum_demand = f64::from(site_agent.machine_meta_data().cores);
        let figures = Figures {
            demand: maximum_demand,
            state,
            ..Figures::default()
        };
        Self {
            site_agent,
            batch_system_agent,
            plugins,
            attributes,
            state,
            figures: Arc::new(RwLock::new(figures)),
            maximum_demand,
        }
    }

    /// A shared view of this drone for observers.
    #[must_use]
    pub fn handle(&self) -> DroneHandle {
        DroneHandle {
            drone_uuid: self.drone_uuid().clone(),
            maximum_demand: self.maximum_demand,
            figures: Arc::clone(&self.figures),
        }
    }

    /// The drone's uuid.
    #[must_use]
    pub const fn drone_uuid(&self) -> &DroneUuid {
        self.attributes.drone_uuid()
    }

    /// Attributes of the leased resource.
    #[must_use]
    pub const fn attributes(&self) -> &ResourceAttributes {
        &self.attributes
    }

    /// Mutable attributes of the leased resource.
    pub fn attributes_mut(&mut self) -> &mut ResourceAttributes {
        &mut self.attributes
    }

    /// The current state, `None` before the first tick.
    #[must_use]
    pub const fn state(&self) -> Option<StateKind> {
        self.state
    }

    /// The site agent serving this drone.
    #[must_use]
    pub const fn site_agent(&self) -> &Arc<SiteAgent> {
        &self.site_agent
    }

    /// The batch-system agent serving this drone.
    #[must_use]
    pub const fn batch_system_agent(&self) -> &Arc<BatchSystemAgent> {
        &self.batch_system_agent
    }

    /// Capacity the drone supplies when fully available: its number of cores.
    #[must_use]
    pub const fn maximum_demand(&self) -> f64 {
        self.maximum_demand
    }

    /// Capacity currently wanted from the drone.
    #[must_use]
    pub fn demand(&self) -> f64 {
        self.figures.read().demand
    }

    /// Change the capacity wanted from the drone.
    pub fn set_demand(&self, demand: f64) {
        self.figures.write().demand = demand;
    }

    /// Capacity the drone currently supplies.
    #[must_use]
    pub fn supply(&self) -> f64 {
        self.figures.read().supply
    }

    /// Change the capacity the drone supplies.
    pub fn set_supply(&self, supply: f64) {
        self.figures.write().supply = supply;
    }

    /// Allocation reported by the batch system.
    #[must_use]
    pub fn allocation(&self) -> f64 {
        self.figures.read().allocation
    }

    /// Utilisation reported by the batch system.
    #[must_use]
    pub fn utilisation(&self) -> f64 {
        self.figures.read().utilisation
    }

    /// Record allocation and utilisation reported by the batch system.
    pub fn set_usage(&self, allocation: f64, utilisation: f64) {
        let mut figures = self.figures.write();
        figures.allocation = allocation;
        figures.utilisation = utilisation;
    }

    /// Minimum time the drone stays available, if limited.
    #[must_use]
    pub fn minimum_lifetime(&self) -> Option<Duration> {
        self.site_agent.drone_minimum_lifetime()
    }

    /// Time between two ticks.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        self.site_agent.drone_heartbeat_interval()
    }

    /// Enter `state`.
    ///
    /// If the state differs from the current one, `updated` is stamped and every plugin
    /// is notified in turn. Re-entering the current state changes nothing. Handles see
    /// the new state once all plugins were notified.
    pub async fn set_state(&mut self, state: StateKind) {
        let previous = self.state.replace(state);
        if previous != Some(state) {
            self.attributes.updated = Utc::now();
            for plugin in &self.plugins {
                if let Err(err) = plugin.notify(state, &self.attributes).await {
                    error!(
                        drone_uuid = %self.drone_uuid(),
                        plugin = plugin.name(),
                        state = %state,
                        error = %err,
                        "plugin failed to process state change"
                    );
                }
            }
        }
        self.figures.write().state = Some(state);
    }

    /// Run one tick of the state machine and return the state the drone ends up in.
    ///
    /// A drone without a state requests its resource first. Entry-action states
    /// (integrate, drain, disintegrate) run as soon as they are entered, within the same
    /// tick.
    ///
    /// # Errors
    ///
    /// Returns backend failures the state machine cannot handle.
    pub async fn tick(&mut self) -> Result<StateKind> {
        let mut current = match self.state {
            Some(state) => state,
            None => {
                self.attributes.resource_status = ResourceStatus::Booting;
                self.set_state(StateKind::Request).await;
                StateKind::Request
            }
        };

        loop {
            let next = states::run(current, self).await?;
            self.set_state(next).await;
            if next == current || !next.is_transient() {
                return Ok(next);
            }
            current = next;
        }
    }

    /// Tick the state machine every heartbeat until the drone is down.
    ///
    /// # Errors
    ///
    /// Returns backend failures the state machine cannot handle; the drone stops
    /// ticking in that case.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let state = match self.tick().await {
                Ok(state) => state,
                Err(err) => {
                    error!(drone_uuid = %self.drone_uuid(), error = %err, "drone lifecycle failed");
                    return Err(err);
                }
            };

            if state.is_terminal() {
                self.set_demand(0.0);
                info!(drone_uuid = %self.drone_uuid(), "drone is down");
                return Ok(());
            }
            tokio::time::sleep(self.heartbeat_interval()).await;
        }
    }
}

impl fmt::Debug for Drone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drone")
            .field("drone_uuid", self.drone_uuid())
            .field("state", &self.state)
            .field("plugins", &self.plugins.len())
            .finish_non_exhaustive()
    }
}
