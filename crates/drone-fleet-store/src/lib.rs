//! `RocksDB` checkpoint store for drone-fleet.
//!
//! Drones are checkpointed on every state change so that a restarted control process
//! can pick up the resources it had leased instead of leaking them.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `drones`: Primary [`DroneRecord`]s, keyed by `drone_uuid`
//! - `drones_by_state`: Index for listing drones by lifecycle state
//! - `drones_by_site`: Index for listing drones by site
//!
//! # Example
//!
//! ```no_run
//! use drone_fleet_core::StateKind;
//! use drone_fleet_store::{RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/drone-fleet-db").unwrap();
//!
//! // Drones that were still alive when the process stopped
//! let alive: Vec<_> = store
//!     .list_all_drones()
//!     .unwrap()
//!     .into_iter()
//!     .filter(|record| record.state != StateKind::Down)
//!     .collect();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::DroneRecord;

use drone_fleet_core::{DroneUuid, StateKind};

/// The storage trait defining all checkpoint operations.
///
/// This trait abstracts the storage layer so plugins and the pool factory do not depend
/// on `RocksDB` directly.
pub trait Store: Send + Sync {
    /// Insert or replace a drone record.
    ///
    /// This also maintains the site and state indexes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_drone(&self, record: &DroneRecord) -> Result<()>;

    /// Get a drone record by uuid.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_drone(&self, drone_uuid: &DroneUuid) -> Result<Option<DroneRecord>>;

    /// Replace an existing drone record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the drone has no record yet.
    fn update_drone(&self, record: &DroneRecord) -> Result<()>;

    /// Delete a drone record by uuid.
    ///
    /// This also removes the drone from all indexes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the drone has no record.
    fn delete_drone(&self, drone_uuid: &DroneUuid) -> Result<()>;

    /// List all drones of a site.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_drones_by_site(&self, site_name: &str) -> Result<Vec<DroneRecord>>;

    /// List all drones in a given lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_drones_by_state(&self, state: StateKind) -> Result<Vec<DroneRecord>>;

    /// List all drone records in the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_all_drones(&self) -> Result<Vec<DroneRecord>>;
}
