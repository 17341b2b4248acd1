//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use drone_fleet_core::{DroneUuid, StateKind};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::DroneRecord;
use crate::Store;

/// RocksDB-backed checkpoint store.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path.as_ref(), cf_descriptors)?;
        debug!(path = %path.as_ref().display(), "opened checkpoint store");

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Write `record` and its index entries, dropping the index entries of `previous`.
    fn write_record(&self, record: &DroneRecord, previous: Option<&DroneRecord>) -> Result<()> {
        let cf_drones = self.cf(cf::DRONES)?;
        let cf_by_site = self.cf(cf::DRONES_BY_SITE)?;
        let cf_by_state = self.cf(cf::DRONES_BY_STATE)?;

        let drone_uuid = record.drone_uuid();
        let mut batch = WriteBatch::default();

        batch.put_cf(&cf_drones, keys::drone_key(drone_uuid), Self::serialize(record)?);

        if let Some(old) = previous {
            if old.state != record.state {
                batch.delete_cf(&cf_by_state, keys::state_drone_key(old.state, drone_uuid));
            }
            if old.site_name() != record.site_name() {
                batch.delete_cf(&cf_by_site, keys::site_drone_key(old.site_name(), drone_uuid));
            }
        }
        batch.put_cf(&cf_by_state, keys::state_drone_key(record.state, drone_uuid), []);
        batch.put_cf(&cf_by_site, keys::site_drone_key(record.site_name(), drone_uuid), []);

        self.db.write(batch)?;
        Ok(())
    }

    /// Resolve every drone referenced by an index under `prefix`.
    fn scan_index(
        &self,
        index: &str,
        prefix: &[u8],
        extract: fn(&[u8]) -> Result<DroneUuid>,
    ) -> Result<Vec<DroneRecord>> {
        let cf_index = self.cf(index)?;
        let iter = self
            .db
            .iterator_cf(&cf_index, IteratorMode::From(prefix, Direction::Forward));

        let mut records = Vec::new();
        for item in iter {
            let (key, _) = item?;

            // Stop if we're past the prefix
            if !key.starts_with(prefix) {
                break;
            }

            let drone_uuid = extract(&key)?;
            if let Some(record) = self.get_drone(&drone_uuid)? {
                records.push(record);
            }
        }

        Ok(records)
    }
}

impl Store for RocksStore {
    fn put_drone(&self, record: &DroneRecord) -> Result<()> {
        let previous = self.get_drone(record.drone_uuid())?;
        self.write_record(record, previous.as_ref())
    }

    fn get_drone(&self, drone_uuid: &DroneUuid) -> Result<Option<DroneRecord>> {
        let cf = self.cf(cf::DRONES)?;

        self.db
            .get_cf(&cf, keys::drone_key(drone_uuid))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn update_drone(&self, record: &DroneRecord) -> Result<()> {
        let previous = self
            .get_drone(record.drone_uuid())?
            .ok_or_else(|| StoreError::NotFound(record.drone_uuid().to_string()))?;
        self.write_record(record, Some(&previous))
    }

    fn delete_drone(&self, drone_uuid: &DroneUuid) -> Result<()> {
        let cf_drones = self.cf(cf::DRONES)?;
        let cf_by_site = self.cf(cf::DRONES_BY_SITE)?;
        let cf_by_state = self.cf(cf::DRONES_BY_STATE)?;

        // The record names the index entries to remove
        let record = self
            .get_drone(drone_uuid)?
            .ok_or_else(|| StoreError::NotFound(drone_uuid.to_string()))?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_drones, keys::drone_key(drone_uuid));
        batch.delete_cf(&cf_by_site, keys::site_drone_key(record.site_name(), drone_uuid));
        batch.delete_cf(&cf_by_state, keys::state_drone_key(record.state, drone_uuid));

        self.db.write(batch)?;
        Ok(())
    }

    fn list_drones_by_site(&self, site_name: &str) -> Result<Vec<DroneRecord>> {
        self.scan_index(
            cf::DRONES_BY_SITE,
            &keys::site_prefix(site_name),
            keys::drone_uuid_from_site_key,
        )
    }

    fn list_drones_by_state(&self, state: StateKind) -> Result<Vec<DroneRecord>> {
        self.scan_index(
            cf::DRONES_BY_STATE,
            &keys::state_prefix(state),
            keys::drone_uuid_from_state_key,
        )
    }

    fn list_all_drones(&self) -> Result<Vec<DroneRecord>> {
        let cf = self.cf(cf::DRONES)?;

        let mut records = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            records.push(Self::deserialize(&value)?);
        }

        Ok(records)
    }
}
