//! The drone lifecycle state machine.
//!
//! States are plain [`StateKind`] values. Their behaviour lives in [`run`], which
//! dispatches on the kind: entry-action states call a backend and move on, polling
//! states run a pipeline of [`steps`](crate::steps) that ends in a lookup of the
//! transition tables below.
//!
//! ```text
//!  Request ─▶ Booting ─▶ Integrate ─▶ Integrating ─▶ Available
//!                │                         │             │
//!                │                         ▼             ▼
//!                │        Disintegrate ◀─ Draining ◀──── Drain
//!                │             │
//!                ▼             ▼
//!             Cleanup ◀── ShutDown ─▶ ShuttingDown
//!                │
//!                ▼
//!              Down
//! ```

use std::sync::Arc;

use drone_fleet_core::{MachineStatus, ResourceStatus, StateKind};
use drone_fleet_utils::run_pipeline;
use tracing::info;

use crate::drone::Drone;
use crate::error::{ControlError, Result};
use crate::steps::{
    CheckDemand, CheckMinimumLifetime, PipelineStep, QueryMachineStatus, RefreshResourceStatus,
};

const BOOTING_STEPS: [&PipelineStep; 2] = [&CheckDemand, &RefreshResourceStatus];
const RUNNING_STEPS: [&PipelineStep; 2] = [&RefreshResourceStatus, &QueryMachineStatus];
const AVAILABLE_STEPS: [&PipelineStep; 4] = [
    &CheckDemand,
    &CheckMinimumLifetime,
    &RefreshResourceStatus,
    &QueryMachineStatus,
];
const RESOURCE_STEPS: [&PipelineStep; 1] = [&RefreshResourceStatus];

/// How far a state's transition table has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing looked up yet.
    Pending,
    /// The resource is running; the machine status decides.
    AwaitingMachineStatus,
    /// The successor is known.
    To(StateKind),
}

/// The value threaded through a state's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    /// The state being processed.
    pub state: StateKind,
    /// Resolution of its transition table so far.
    pub transition: Transition,
}

impl Lookup {
    /// Start resolving the transitions of `state`.
    #[must_use]
    pub const fn new(state: StateKind) -> Self {
        Self {
            state,
            transition: Transition::Pending,
        }
    }

    /// Replace the resolution.
    #[must_use]
    pub const fn with(self, transition: Transition) -> Self {
        Self { transition, ..self }
    }

    /// Resolve to `next`.
    #[must_use]
    pub const fn to(self, next: StateKind) -> Self {
        self.with(Transition::To(next))
    }

    /// The successor, if resolved.
    #[must_use]
    pub const fn next(self) -> Option<StateKind> {
        match self.transition {
            Transition::To(next) => Some(next),
            Transition::Pending | Transition::AwaitingMachineStatus => None,
        }
    }
}

/// First level of the transition tables: successor by resource status.
///
/// Returns `None` for states without a table.
#[must_use]
pub const fn resource_transition(state: StateKind, status: ResourceStatus) -> Option<Transition> {
    use ResourceStatus::{Booting, Deleted, Error, Running, Stopped};
    use Transition::{AwaitingMachineStatus, To};

    let transition = match (state, status) {
        (StateKind::Booting, Booting) => To(StateKind::Booting),
        (StateKind::Booting, Running) => To(StateKind::Integrate),
        (StateKind::Integrating | StateKind::Available | StateKind::Draining, Running) => {
            AwaitingMachineStatus
        }
        (StateKind::Integrating | StateKind::Available, Booting) => To(StateKind::Booting),
        (StateKind::Draining, Booting) => To(StateKind::Cleanup),
        (StateKind::ShutDown, Running) | (StateKind::ShuttingDown, Running | Booting) => {
            To(StateKind::ShuttingDown)
        }
        (StateKind::ShutDown, Booting) => To(StateKind::ShutDown),
        (
            StateKind::Booting
            | StateKind::Integrating
            | StateKind::Available
            | StateKind::Draining
            | StateKind::ShutDown
            | StateKind::ShuttingDown
            | StateKind::Cleanup,
            Deleted,
        ) => To(StateKind::Down),
        (
            StateKind::Booting
            | StateKind::Integrating
            | StateKind::Available
            | StateKind::Draining
            | StateKind::ShutDown
            | StateKind::ShuttingDown,
            Stopped | Error,
        )
        | (StateKind::Cleanup, Booting | Running | Stopped | Error) => To(StateKind::Cleanup),
        _ => return None,
    };
    Some(transition)
}

/// Second level of the transition tables: successor by machine status, for states
/// whose resource is running.
#[must_use]
pub const fn machine_transition(state: StateKind, status: MachineStatus) -> Option<StateKind> {
    use MachineStatus::{Available, Drained, Draining, NotAvailable};

    let next = match (state, status) {
        (StateKind::Integrating | StateKind::Available, NotAvailable) => StateKind::Integrating,
        (StateKind::Integrating | StateKind::Available, Available) => StateKind::Available,
        (StateKind::Integrating | StateKind::Available | StateKind::Draining, Draining) => {
            StateKind::Draining
        }
        (StateKind::Integrating | StateKind::Available | StateKind::Draining, Drained) => {
            StateKind::Disintegrate
        }
        (StateKind::Draining, NotAvailable) => StateKind::ShutDown,
        (StateKind::Draining, Available) => StateKind::Drain,
        _ => return None,
    };
    Some(next)
}

/// Look up the successor of `state` for a pair of observed statuses.
///
/// The machine status is only consulted if the resource status leaves it open.
#[must_use]
pub const fn transition(
    state: StateKind,
    resource_status: ResourceStatus,
    machine_status: MachineStatus,
) -> Option<StateKind> {
    match resource_transition(state, resource_status) {
        Some(Transition::To(next)) => Some(next),
        Some(Transition::AwaitingMachineStatus) => machine_transition(state, machine_status),
        Some(Transition::Pending) | None => None,
    }
}

/// Run `state` for `drone` once and return its successor.
///
/// The drone's state itself is not changed; that is up to the caller.
///
/// # Errors
///
/// Returns backend failures that are neither transient nor crashes, and
/// `ControlError::MissingTransition` for statuses a state has no table entry for.
pub async fn run(state: StateKind, drone: &mut Drone) -> Result<StateKind> {
    info!(drone_uuid = %drone.drone_uuid(), state = %state, "processing state");

    match state {
        StateKind::Request => request(drone).await,
        StateKind::Booting => decide(state, drone, &BOOTING_STEPS).await,
        StateKind::Integrate => {
            let agent = Arc::clone(drone.batch_system_agent());
            let result = agent.integrate_machine(drone.drone_uuid()).await;
            after_batch_call(state, StateKind::Integrating, result)
        }
        StateKind::Integrating => {
            let next = decide(state, drone, &RUNNING_STEPS).await?;
            refresh_usage_if_available(next, drone).await
        }
        StateKind::Available => {
            let next = decide(state, drone, &AVAILABLE_STEPS).await?;
            refresh_usage_if_available(next, drone).await
        }
        StateKind::Drain => {
            let agent = Arc::clone(drone.batch_system_agent());
            let result = agent.drain_machine(drone.drone_uuid()).await;
            after_batch_call(state, StateKind::Draining, result)
        }
        StateKind::Draining => {
            decide(state, drone, &RUNNING_STEPS).await
        }
        StateKind::Disintegrate => {
            let agent = Arc::clone(drone.batch_system_agent());
            let result = agent.disintegrate_machine(drone.drone_uuid()).await;
            after_batch_call(state, StateKind::ShutDown, result)
        }
        StateKind::ShutDown => shut_down(drone).await,
        StateKind::ShuttingDown => decide(state, drone, &RESOURCE_STEPS).await,
        StateKind::Cleanup => cleanup(drone).await,
        StateKind::Down => {
            drone.set_demand(0.0);
            Ok(StateKind::Down)
        }
    }
}

/// Run `steps` and return the successor they resolved.
async fn decide(state: StateKind, drone: &mut Drone, steps: &[&PipelineStep]) -> Result<StateKind> {
    let lookup = run_pipeline(Lookup::new(state), steps, drone).await?;
    lookup.next().ok_or_else(|| ControlError::MissingTransition {
        state,
        status: format!("{:?}", drone.attributes().resource_status),
    })
}

async fn request(drone: &mut Drone) -> Result<StateKind> {
    let agent = Arc::clone(drone.site_agent());
    match agent.deploy_resource(drone.attributes()).await {
        Ok(update) => {
            drone.attributes_mut().apply(update);
            Ok(StateKind::Booting)
        }
        Err(err) if err.is_transient() => Ok(StateKind::Down),
        Err(err) if err.is_crash() => Ok(StateKind::Cleanup),
        Err(err) => Err(err.into()),
    }
}

/// Successor of an entry-action state: `next` on success, the state itself to retry a
/// transient failure.
fn after_batch_call(
    state: StateKind,
    next: StateKind,
    result: drone_fleet_core::Result<()>,
) -> Result<StateKind> {
    match result {
        Ok(()) => Ok(next),
        Err(err) if err.is_transient() => Ok(state),
        Err(err) => Err(err.into()),
    }
}

/// Record supply, allocation and utilisation of a drone that is (still) available.
async fn refresh_usage_if_available(next: StateKind, drone: &mut Drone) -> Result<StateKind> {
    if next != StateKind::Available {
        return Ok(next);
    }

    let agent = Arc::clone(drone.batch_system_agent());
    let allocation = agent.get_allocation(drone.drone_uuid()).await;
    let utilisation = agent.get_utilisation(drone.drone_uuid()).await;

    match (allocation, utilisation) {
        (Ok(allocation), Ok(utilisation)) => {
            drone.set_usage(allocation, utilisation);
            drone.set_supply(drone.maximum_demand());
        }
        // Keep the previous figures until the batch system answers again.
        (Err(err), _) | (_, Err(err)) if err.is_transient() => {}
        (Err(err), _) | (_, Err(err)) => return Err(err.into()),
    }
    Ok(next)
}

async fn shut_down(drone: &mut Drone) -> Result<StateKind> {
    let next = decide(StateKind::ShutDown, drone, &RESOURCE_STEPS).await?;
    if next != StateKind::ShuttingDown {
        return Ok(next);
    }

    let agent = Arc::clone(drone.site_agent());
    match agent.stop_resource(drone.attributes()).await {
        Ok(()) => Ok(StateKind::ShuttingDown),
        Err(err) if err.is_transient() => Ok(StateKind::ShutDown),
        Err(err) if err.is_crash() => Ok(StateKind::Cleanup),
        Err(err) => Err(err.into()),
    }
}

async fn cleanup(drone: &mut Drone) -> Result<StateKind> {
    let next = decide(StateKind::Cleanup, drone, &RESOURCE_STEPS).await?;
    if next != StateKind::Cleanup {
        return Ok(next);
    }

    let agent = Arc::clone(drone.site_agent());
    match agent.terminate_resource(drone.attributes()).await {
        Ok(()) => Ok(StateKind::Cleanup),
        Err(err) if err.is_crash() => Ok(StateKind::Down),
        Err(err) if err.is_transient() => Ok(StateKind::Cleanup),
        Err(err) => Err(err.into()),
    }
}
