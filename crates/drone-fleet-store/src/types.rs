//! Persisted drone records.

use drone_fleet_core::{DroneUuid, ResourceAttributes, StateKind};
use serde::{Deserialize, Serialize};

/// Checkpoint of one drone: its resource attributes and the state it was last in.
///
/// Restoring a record recreates the drone with the same identity, remote resource and
/// timestamps, continuing from `state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroneRecord {
    /// Attributes of the leased resource.
    pub attributes: ResourceAttributes,
    /// Lifecycle state at the time of the checkpoint.
    pub state: StateKind,
}

impl DroneRecord {
    /// Create a record.
    #[must_use]
    pub const fn new(attributes: ResourceAttributes, state: StateKind) -> Self {
        Self { attributes, state }
    }

    /// The drone this record belongs to.
    #[must_use]
    pub const fn drone_uuid(&self) -> &DroneUuid {
        self.attributes.drone_uuid()
    }

    /// The site the drone's resource lives on.
    #[must_use]
    pub fn site_name(&self) -> &str {
        &self.attributes.site_name
    }
}
