//! Pipeline steps shared by the lifecycle states.
//!
//! Each step receives the [`Lookup`] built so far and the drone being processed. Guards
//! ([`CheckDemand`], [`CheckMinimumLifetime`]) end the pipeline early with a fixed
//! successor; the status steps narrow the state's transition table down to one
//! successor.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use drone_fleet_core::StateKind;
use drone_fleet_utils::{Processing, Step};
use tracing::{debug, warn};

use crate::drone::Drone;
use crate::error::ControlError;
use crate::states::{machine_transition, resource_transition, Lookup, Transition};

/// A lifecycle pipeline step.
pub type PipelineStep = dyn Step<Lookup, Drone, ControlError>;

type StepResult = Result<Processing<Lookup>, ControlError>;

/// Shuts the drone down once its demand dropped to zero.
///
/// Ends the pipeline with [`StateKind::Cleanup`] for a booting drone and with
/// [`StateKind::Drain`] otherwise, and zeroes the drone's supply.
#[derive(Debug, Clone, Copy)]
pub struct CheckDemand;

#[async_trait]
impl Step<Lookup, Drone, ControlError> for CheckDemand {
    async fn process(&self, lookup: Lookup, drone: &mut Drone) -> StepResult {
        if drone.demand() > 0.0 {
            return Ok(Processing::Continue(lookup));
        }

        drone.set_supply(0.0);
        let next = if lookup.state == StateKind::Booting {
            StateKind::Cleanup
        } else {
            StateKind::Drain
        };
        debug!(drone_uuid = %drone.drone_uuid(), next = %next, "demand dropped to zero");
        Ok(Processing::Stop(lookup.to(next)))
    }
}

/// Drains the drone once it spent its minimum lifetime in the current state.
#[derive(Debug, Clone, Copy)]
pub struct CheckMinimumLifetime;

#[async_trait]
impl Step<Lookup, Drone, ControlError> for CheckMinimumLifetime {
    async fn process(&self, lookup: Lookup, drone: &mut Drone) -> StepResult {
        let Some(lifetime) = drone.minimum_lifetime() else {
            return Ok(Processing::Continue(lookup));
        };

        // A negative age (clock skew) converts to an error and counts as not elapsed.
        match (Utc::now() - drone.attributes().updated).to_std() {
            Ok(age) if age > lifetime => {
                debug!(drone_uuid = %drone.drone_uuid(), age = ?age, "minimum lifetime reached");
                Ok(Processing::Stop(lookup.to(StateKind::Drain)))
            }
            _ => Ok(Processing::Continue(lookup)),
        }
    }
}

/// Refreshes the resource attributes from the site and looks up the successor by
/// resource status.
///
/// A transient failure ends the pipeline in the current state so it is retried on the
/// next tick; a crashed resource ends it in [`StateKind::Cleanup`].
#[derive(Debug, Clone, Copy)]
pub struct RefreshResourceStatus;

#[async_trait]
impl Step<Lookup, Drone, ControlError> for RefreshResourceStatus {
    async fn process(&self, lookup: Lookup, drone: &mut Drone) -> StepResult {
        let site_agent = Arc::clone(drone.site_agent());
        match site_agent.resource_status(drone.attributes()).await {
            Ok(update) => drone.attributes_mut().apply(update),
            Err(err) if err.is_transient() => {
                warn!(drone_uuid = %drone.drone_uuid(), state = %lookup.state, "resource status unavailable, retrying state");
                return Ok(Processing::Stop(lookup.to(lookup.state)));
            }
            Err(err) if err.is_crash() => {
                return Ok(Processing::Stop(lookup.to(StateKind::Cleanup)));
            }
            Err(err) => return Err(err.into()),
        }

        let status = drone.attributes().resource_status;
        resource_transition(lookup.state, status)
            .map(|transition| Processing::Continue(lookup.with(transition)))
            .ok_or_else(|| ControlError::MissingTransition {
                state: lookup.state,
                status: format!("{status:?}"),
            })
    }
}

/// Looks up the successor by machine status, if the resource status left it open.
#[derive(Debug, Clone, Copy)]
pub struct QueryMachineStatus;

#[async_trait]
impl Step<Lookup, Drone, ControlError> for QueryMachineStatus {
    async fn process(&self, lookup: Lookup, drone: &mut Drone) -> StepResult {
        if lookup.transition != Transition::AwaitingMachineStatus {
            return Ok(Processing::Continue(lookup));
        }

        let batch_system_agent = Arc::clone(drone.batch_system_agent());
        let status = match batch_system_agent.get_machine_status(drone.drone_uuid()).await {
            Ok(status) => status,
            Err(err) if err.is_transient() => {
                return Ok(Processing::Stop(lookup.to(lookup.state)));
            }
            Err(err) => return Err(err.into()),
        };

        machine_transition(lookup.state, status)
            .map(|next| Processing::Continue(lookup.to(next)))
            .ok_or_else(|| ControlError::MissingTransition {
                state: lookup.state,
                status: format!("{status:?}"),
            })
    }
}
