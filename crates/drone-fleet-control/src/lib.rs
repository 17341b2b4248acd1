//! Drone lifecycle management for drone-fleet.
//!
//! A drone is one leased compute resource integrated into a batch system. This crate
//! drives drones from the initial request to the deletion of their resource.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                DronePool (site, machine type)               │
//! │         demand ─▶ spawn / release ─▶ DroneHandle            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ one task per drone
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           Drone                             │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  States +   │ │  Pipeline   │ │      Plugins        │    │
//! │  │  tables     │ │  steps      │ │  (log, registry)    │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!        ┌──────────────┐              ┌──────────────┐
//!        │  SiteAgent   │              │ BatchSystem  │
//!        │  (adapter)   │              │ Agent        │
//!        └──────────────┘              └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use drone_fleet_control::{
//!     BatchSystemAgent, BatchSystemConfig, DronePool, FakeBatchSystemAdapter, FakeSiteAdapter,
//!     FakeSiteConfig, LogPlugin, MachineMetaData, SiteAgent,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let meta = MachineMetaData { cores: 8, memory_gb: 16.0, disk_gb: 100.0 };
//! let site = SiteAgent::new(Arc::new(FakeSiteAdapter::new(FakeSiteConfig::default())), "Fake", "m1.large", meta);
//! let batch = BatchSystemAgent::new(Arc::new(FakeBatchSystemAdapter::new(BatchSystemConfig::default())));
//!
//! let pool = DronePool::new(Arc::new(site), Arc::new(batch), vec![Arc::new(LogPlugin)]);
//! pool.set_demand(32.0);
//! assert_eq!(pool.len(), 4);
//! # }
//! ```
//!
//! # State Machine
//!
//! Every state either performs one backend action and moves on (`Request`,
//! `Integrate`, `Drain`, `Disintegrate`) or polls the backends each heartbeat and
//! looks its successor up by resource status and, for running resources, machine
//! status. See the [`states`] module for the tables.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod adapter;
pub mod agents;
pub mod config;
pub mod drone;
pub mod error;
pub mod fake;
pub mod plugins;
pub mod pool;
pub mod states;
pub mod steps;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use adapter::{BatchSystemAdapter, SiteAdapter};
pub use agents::{BatchSystemAgent, SiteAgent};
pub use config::{
    BatchSystemConfig, FakeSiteConfig, FleetConfig, MachineMetaData, MachineTypeConfig, SiteConfig,
};
pub use drone::{Drone, DroneHandle};
pub use error::{ControlError, PluginError, Result};
pub use fake::{FakeBatchSystemAdapter, FakeSiteAdapter};
pub use plugins::{LogPlugin, Plugin, RegistryPlugin};
pub use pool::DronePool;

// Re-export commonly used types from dependencies for convenience
pub use drone_fleet_core::{
    AttributeUpdate, BackendError, DroneUuid, MachineStatus, ResourceAttributes, ResourceStatus,
    StateKind,
};
pub use drone_fleet_store::DroneRecord;
