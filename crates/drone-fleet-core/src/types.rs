//! Domain types shared by every drone-fleet crate.
//!
//! These types describe a single drone: the backend resource it leases
//! ([`ResourceAttributes`], [`ResourceStatus`]), its integration with the batch system
//! ([`MachineStatus`]) and the point it has reached in its lifecycle ([`StateKind`]).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::DroneUuid;

/// Status of the leased resource as reported by the site backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResourceStatus {
    /// Resource has been requested and is starting up.
    Booting = 1,
    /// Resource is up.
    Running = 2,
    /// Resource has been stopped but still exists in the backend.
    Stopped = 3,
    /// Resource no longer exists in the backend.
    Deleted = 4,
    /// Backend reports the resource as broken.
    Error = 5,
}

impl ResourceStatus {
    /// All resource statuses, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Booting,
        Self::Running,
        Self::Stopped,
        Self::Deleted,
        Self::Error,
    ];
}

/// Integration status of a drone within the batch system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineStatus {
    /// Machine accepts jobs.
    Available,
    /// Machine finishes running jobs but accepts no new ones.
    Draining,
    /// Machine has no jobs left and accepts none.
    Drained,
    /// Machine is unknown to the batch system.
    NotAvailable,
}

impl MachineStatus {
    /// All machine statuses, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::Available,
        Self::Draining,
        Self::Drained,
        Self::NotAvailable,
    ];
}

/// The lifecycle state a drone is in.
///
/// States are plain values: two states are the same state exactly when their kinds
/// are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StateKind {
    /// Resource is being requested from the site.
    #[serde(rename = "RequestState")]
    Request = 1,
    /// Waiting for the resource to boot.
    #[serde(rename = "BootingState")]
    Booting = 2,
    /// Registering the machine with the batch system.
    #[serde(rename = "IntegrateState")]
    Integrate = 3,
    /// Waiting for the batch system to accept the machine.
    #[serde(rename = "IntegratingState")]
    Integrating = 4,
    /// Machine accepts work.
    #[serde(rename = "AvailableState")]
    Available = 5,
    /// Asking the batch system to drain the machine.
    #[serde(rename = "DrainState")]
    Drain = 6,
    /// Waiting for running jobs to finish.
    #[serde(rename = "DrainingState")]
    Draining = 7,
    /// Removing the machine from the batch system.
    #[serde(rename = "DisintegrateState")]
    Disintegrate = 8,
    /// Requesting the resource to stop.
    #[serde(rename = "ShutDownState")]
    ShutDown = 9,
    /// Waiting for the resource to stop.
    #[serde(rename = "ShuttingDownState")]
    ShuttingDown = 10,
    /// Releasing the resource in the backend.
    #[serde(rename = "CleanupState")]
    Cleanup = 11,
    /// Terminal state.
    #[serde(rename = "DownState")]
    Down = 12,
}

impl StateKind {
    /// All states, in lifecycle order.
    pub const ALL: [Self; 12] = [
        Self::Request,
        Self::Booting,
        Self::Integrate,
        Self::Integrating,
        Self::Available,
        Self::Drain,
        Self::Draining,
        Self::Disintegrate,
        Self::ShutDown,
        Self::ShuttingDown,
        Self::Cleanup,
        Self::Down,
    ];

    /// The canonical name of the state, e.g. `"AvailableState"`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Request => "RequestState",
            Self::Booting => "BootingState",
            Self::Integrate => "IntegrateState",
            Self::Integrating => "IntegratingState",
            Self::Available => "AvailableState",
            Self::Drain => "DrainState",
            Self::Draining => "DrainingState",
            Self::Disintegrate => "DisintegrateState",
            Self::ShutDown => "ShutDownState",
            Self::ShuttingDown => "ShuttingDownState",
            Self::Cleanup => "CleanupState",
            Self::Down => "DownState",
        }
    }

    /// Convert the state to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert a numeric value to a `StateKind`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Request),
            2 => Some(Self::Booting),
            3 => Some(Self::Integrate),
            4 => Some(Self::Integrating),
            5 => Some(Self::Available),
            6 => Some(Self::Drain),
            7 => Some(Self::Draining),
            8 => Some(Self::Disintegrate),
            9 => Some(Self::ShutDown),
            10 => Some(Self::ShuttingDown),
            11 => Some(Self::Cleanup),
            12 => Some(Self::Down),
            _ => None,
        }
    }

    /// Returns true for the terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Down)
    }

    /// Returns true for states whose only job is a single batch-system call followed
    /// by a fixed successor. These run in the same tick in which they are entered.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Integrate | Self::Drain | Self::Disintegrate)
    }

    /// Returns true while the drone contributes (or is about to contribute) capacity.
    #[must_use]
    pub const fn is_provisioning_or_available(self) -> bool {
        matches!(
            self,
            Self::Request | Self::Booting | Self::Integrate | Self::Integrating | Self::Available
        )
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StateKind {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.name() == s)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

/// Returned when parsing an unknown state name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown state: {0}")]
pub struct UnknownState(pub String);

/// Attributes of the resource leased by one drone.
///
/// A small typed core that every lifecycle step relies on, plus an open `extra` map for
/// backend-specific fields. `drone_uuid` is fixed at construction; `updated` is stamped
/// by the owning drone whenever its lifecycle state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAttributes {
    drone_uuid: DroneUuid,
    /// Name of the site providing the resource.
    pub site_name: String,
    /// Machine type requested from the site.
    pub machine_type: String,
    /// Backend-assigned identifier, unknown until the resource is deployed.
    pub remote_resource_uuid: Option<String>,
    /// Last status reported by the site.
    pub resource_status: ResourceStatus,
    /// When the drone was created.
    pub created: DateTime<Utc>,
    /// When the drone last changed its lifecycle state.
    pub updated: DateTime<Utc>,
    /// Backend-specific passthrough fields.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ResourceAttributes {
    /// Create attributes for a freshly created drone.
    #[must_use]
    pub fn new(
        drone_uuid: DroneUuid,
        site_name: impl Into<String>,
        machine_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            drone_uuid,
            site_name: site_name.into(),
            machine_type: machine_type.into(),
            remote_resource_uuid: None,
            resource_status: ResourceStatus::Booting,
            created: now,
            updated: now,
            extra: BTreeMap::new(),
        }
    }

    /// The drone's stable identifier.
    #[must_use]
    pub const fn drone_uuid(&self) -> &DroneUuid {
        &self.drone_uuid
    }

    /// Merge a backend response into these attributes.
    ///
    /// Only fields present in the update are overwritten; `extra` entries are merged
    /// key by key.
    pub fn apply(&mut self, update: AttributeUpdate) {
        if let Some(remote_resource_uuid) = update.remote_resource_uuid {
            self.remote_resource_uuid = Some(remote_resource_uuid);
        }
        if let Some(resource_status) = update.resource_status {
            self.resource_status = resource_status;
        }
        self.extra.extend(update.extra);
    }
}

/// A partial update of [`ResourceAttributes`] returned by a site backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeUpdate {
    /// Backend-assigned identifier.
    pub remote_resource_uuid: Option<String>,
    /// Observed resource status.
    pub resource_status: Option<ResourceStatus>,
    /// Backend-specific fields to merge.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl AttributeUpdate {
    /// An update carrying only a resource status.
    #[must_use]
    pub fn status(resource_status: ResourceStatus) -> Self {
        Self {
            resource_status: Some(resource_status),
            ..Self::default()
        }
    }

    /// Set the remote resource uuid.
    #[must_use]
    pub fn with_remote_uuid(mut self, remote_resource_uuid: impl Into<String>) -> Self {
        self.remote_resource_uuid = Some(remote_resource_uuid.into());
        self
    }

    /// Add a backend-specific field.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attributes() -> ResourceAttributes {
        ResourceAttributes::new(DroneUuid::from_parts("site", "0123456789"), "Site", "m1.small")
    }

    #[test]
    fn state_names_roundtrip() {
        for state in StateKind::ALL {
            assert_eq!(state.name().parse::<StateKind>().unwrap(), state);
            assert_eq!(StateKind::from_u8(state.as_u8()), Some(state));
        }
        assert!("BogusState".parse::<StateKind>().is_err());
        assert_eq!(StateKind::from_u8(0), None);
    }

    #[test]
    fn state_serde_uses_names() {
        let json = serde_json::to_string(&StateKind::ShuttingDown).unwrap();
        assert_eq!(json, "\"ShuttingDownState\"");
        let parsed: StateKind = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, StateKind::ShuttingDown);
    }

    #[test]
    fn state_classification() {
        assert!(StateKind::Down.is_terminal());
        assert!(!StateKind::Cleanup.is_terminal());

        assert!(StateKind::Integrate.is_transient());
        assert!(StateKind::Drain.is_transient());
        assert!(StateKind::Disintegrate.is_transient());
        assert!(!StateKind::Request.is_transient());
        assert!(!StateKind::Draining.is_transient());

        assert!(StateKind::Booting.is_provisioning_or_available());
        assert!(StateKind::Available.is_provisioning_or_available());
        assert!(!StateKind::Draining.is_provisioning_or_available());
    }

    #[test]
    fn new_attributes_start_booting() {
        let attrs = attributes();
        assert_eq!(attrs.resource_status, ResourceStatus::Booting);
        assert_eq!(attrs.created, attrs.updated);
        assert!(attrs.remote_resource_uuid.is_none());
        assert_eq!(attrs.drone_uuid().as_str(), "site-0123456789");
    }

    #[test]
    fn apply_merges_present_fields() {
        let mut attrs = attributes();
        attrs
            .extra
            .insert("flavor".to_string(), serde_json::json!("small"));

        attrs.apply(
            AttributeUpdate::status(ResourceStatus::Running)
                .with_remote_uuid("vm-42")
                .with_extra("ip", serde_json::json!("10.0.0.1")),
        );
        assert_eq!(attrs.resource_status, ResourceStatus::Running);
        assert_eq!(attrs.remote_resource_uuid.as_deref(), Some("vm-42"));
        assert_eq!(attrs.extra.len(), 2);

        attrs.apply(AttributeUpdate::default());
        assert_eq!(attrs.resource_status, ResourceStatus::Running);
        assert_eq!(attrs.remote_resource_uuid.as_deref(), Some("vm-42"));
    }

    #[test]
    fn attributes_serde_json() {
        let attrs = attributes();
        let json = serde_json::to_string(&attrs).unwrap();
        let parsed: ResourceAttributes = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, attrs);
    }
}
