//! Scripted backends and plugins for tests.
//!
//! The scripted adapters report whatever status they were last told to and replay
//! queued errors, one per call of the matching operation.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use drone_fleet_core::{
    AttributeUpdate, BackendError, DroneUuid, MachineStatus, ResourceAttributes, ResourceStatus,
    Result, StateKind,
};
use parking_lot::Mutex;

use crate::adapter::{BatchSystemAdapter, SiteAdapter};
use crate::error::PluginError;
use crate::plugins::Plugin;

/// Operations of a [`SiteAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteOperation {
    /// `deploy_resource`
    Deploy,
    /// `resource_status`
    Status,
    /// `stop_resource`
    Stop,
    /// `terminate_resource`
    Terminate,
}

/// Operations of a [`BatchSystemAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchOperation {
    /// `integrate_machine`
    Integrate,
    /// `disintegrate_machine`
    Disintegrate,
    /// `drain_machine`
    Drain,
    /// `get_machine_status`
    MachineStatus,
    /// `get_allocation`
    Allocation,
    /// `get_utilisation`
    Utilisation,
}

/// Queued errors and call counts per operation.
#[derive(Debug)]
struct Script<Op> {
    errors: HashMap<Op, VecDeque<BackendError>>,
    calls: HashMap<Op, usize>,
}

impl<Op> Default for Script<Op> {
    fn default() -> Self {
        Self {
            errors: HashMap::new(),
            calls: HashMap::new(),
        }
    }
}

impl<Op: Copy + Eq + std::hash::Hash> Script<Op> {
    /// Count a call of `operation` and return its queued error, if any.
    fn call(&mut self, operation: Op) -> Result<()> {
        *self.calls.entry(operation).or_default() += 1;
        match self.errors.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A site adapter reporting a settable resource status.
#[derive(Debug)]
pub struct ScriptedSiteAdapter {
    status: Mutex<ResourceStatus>,
    script: Mutex<Script<SiteOperation>>,
}

impl Default for ScriptedSiteAdapter {
    fn default() -> Self {
        Self {
            status: Mutex::new(ResourceStatus::Booting),
            script: Mutex::default(),
        }
    }
}

impl ScriptedSiteAdapter {
    /// Create an adapter whose resources report `Booting`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `status` from now on.
    pub fn set_status(&self, status: ResourceStatus) {
        *self.status.lock() = status;
    }

    /// Fail the next call of `operation` with `err`.
    pub fn push_error(&self, operation: SiteOperation, err: BackendError) {
        self.script
            .lock()
            .errors
            .entry(operation)
            .or_default()
            .push_back(err);
    }

    /// Number of calls of `operation` so far.
    #[must_use]
    pub fn calls(&self, operation: SiteOperation) -> usize {
        self.script.lock().calls.get(&operation).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SiteAdapter for ScriptedSiteAdapter {
    async fn deploy_resource(&self, attributes: &ResourceAttributes) -> Result<AttributeUpdate> {
        self.script.lock().call(SiteOperation::Deploy)?;
        Ok(AttributeUpdate::status(ResourceStatus::Booting)
            .with_remote_uuid(format!("remote-{}", attributes.drone_uuid())))
    }

    async fn resource_status(&self, _attributes: &ResourceAttributes) -> Result<AttributeUpdate> {
        self.script.lock().call(SiteOperation::Status)?;
        Ok(AttributeUpdate::status(*self.status.lock()))
    }

    async fn stop_resource(&self, _attributes: &ResourceAttributes) -> Result<()> {
        self.script.lock().call(SiteOperation::Stop)
    }

    async fn terminate_resource(&self, _attributes: &ResourceAttributes) -> Result<()> {
        self.script.lock().call(SiteOperation::Terminate)
    }
}

#[derive(Debug, Clone, Copy)]
struct Usage {
    machine_status: MachineStatus,
    allocation: f64,
    utilisation: f64,
}

/// A batch-system adapter reporting settable figures.
#[derive(Debug)]
pub struct ScriptedBatchSystemAdapter {
    usage: Mutex<Usage>,
    script: Mutex<Script<BatchOperation>>,
}

impl Default for ScriptedBatchSystemAdapter {
    fn default() -> Self {
        Self {
            usage: Mutex::new(Usage {
                machine_status: MachineStatus::NotAvailable,
                allocation: 0.0,
                utilisation: 0.0,
            }),
            script: Mutex::default(),
        }
    }
}

impl ScriptedBatchSystemAdapter {
    /// Create an adapter whose machines report `NotAvailable`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `status` for every machine from now on.
    pub fn set_machine_status(&self, status: MachineStatus) {
        self.usage.lock().machine_status = status;
    }

    /// Report `allocation` for every machine from now on.
    pub fn set_allocation(&self, allocation: f64) {
        self.usage.lock().allocation = allocation;
    }

    /// Report `utilisation` for every machine from now on.
    pub fn set_utilisation(&self, utilisation: f64) {
        self.usage.lock().utilisation = utilisation;
    }

    /// Fail the next call of `operation` with `err`.
    pub fn push_error(&self, operation: BatchOperation, err: BackendError) {
        self.script
            .lock()
            .errors
            .entry(operation)
            .or_default()
            .push_back(err);
    }

    /// Number of calls of `operation` so far.
    #[must_use]
    pub fn calls(&self, operation: BatchOperation) -> usize {
        self.script.lock().calls.get(&operation).copied().unwrap_or(0)
    }
}

#[async_trait]
impl BatchSystemAdapter for ScriptedBatchSystemAdapter {
    async fn integrate_machine(&self, _drone_uuid: &DroneUuid) -> Result<()> {
        self.script.lock().call(BatchOperation::Integrate)
    }

    async fn disintegrate_machine(&self, _drone_uuid: &DroneUuid) -> Result<()> {
        self.script.lock().call(BatchOperation::Disintegrate)
    }

    async fn drain_machine(&self, _drone_uuid: &DroneUuid) -> Result<()> {
        self.script.lock().call(BatchOperation::Drain)
    }

    async fn get_machine_status(&self, _drone_uuid: &DroneUuid) -> Result<MachineStatus> {
        self.script.lock().call(BatchOperation::MachineStatus)?;
        Ok(self.usage.lock().machine_status)
    }

    async fn get_allocation(&self, _drone_uuid: &DroneUuid) -> Result<f64> {
        self.script.lock().call(BatchOperation::Allocation)?;
        Ok(self.usage.lock().allocation)
    }

    async fn get_utilisation(&self, _drone_uuid: &DroneUuid) -> Result<f64> {
        self.script.lock().call(BatchOperation::Utilisation)?;
        Ok(self.usage.lock().utilisation)
    }
}

/// A plugin remembering every notification, optionally failing each one.
#[derive(Debug, Default)]
pub struct RecordingPlugin {
    records: Mutex<Vec<(StateKind, ResourceAttributes)>>,
    failing: bool,
}

impl RecordingPlugin {
    /// Create a plugin that accepts every notification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a plugin that records and then fails every notification.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// States notified so far, in order.
    #[must_use]
    pub fn states(&self) -> Vec<StateKind> {
        self.records.lock().iter().map(|(state, _)| *state).collect()
    }

    /// Notifications so far, in order.
    #[must_use]
    pub fn records(&self) -> Vec<(StateKind, ResourceAttributes)> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl Plugin for RecordingPlugin {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(
        &self,
        state: StateKind,
        attributes: &ResourceAttributes,
    ) -> std::result::Result<(), PluginError> {
        self.records.lock().push((state, attributes.clone()));
        if self.failing {
            return Err(PluginError::Failed(format!("refusing {state}")));
        }
        Ok(())
    }
}
