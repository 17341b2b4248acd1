//! Core types and identifiers for drone-fleet.
//!
//! This crate provides the foundational types used throughout the drone-fleet platform:
//!
//! - **Identifiers**: [`DroneUuid`], the stable local identity of a drone
//! - **Data model**: [`ResourceAttributes`], [`ResourceStatus`], [`MachineStatus`] and
//!   the lifecycle [`StateKind`]
//! - **Error types**: the [`BackendError`] taxonomy shared by all backends
//!
//! # Example
//!
//! ```
//! use drone_fleet_core::{AttributeUpdate, DroneUuid, ResourceAttributes, ResourceStatus};
//!
//! let drone_uuid = DroneUuid::generate("MySite");
//! let mut attrs = ResourceAttributes::new(drone_uuid, "MySite", "m1.large");
//!
//! attrs.apply(AttributeUpdate::status(ResourceStatus::Running).with_remote_uuid("vm-1"));
//! assert_eq!(attrs.resource_status, ResourceStatus::Running);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod types;

pub use error::{BackendError, Result};
pub use ids::{DroneUuid, IdError};
pub use types::{
    AttributeUpdate, MachineStatus, ResourceAttributes, ResourceStatus, StateKind, UnknownState,
};
