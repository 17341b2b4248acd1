//! Key encoding for the drone indexes.
//!
//! Index keys are laid out so that every drone of one site or one state shares a
//! prefix, which turns listing into a prefix scan.

use drone_fleet_core::{DroneUuid, StateKind};

use crate::error::{Result, StoreError};

/// Separates the site name from the drone uuid in site index keys.
const SITE_SEPARATOR: u8 = 0x00;

/// Encode a drone key (just the drone uuid bytes).
#[must_use]
pub fn drone_key(drone_uuid: &DroneUuid) -> Vec<u8> {
    drone_uuid.as_bytes().to_vec()
}

/// Encode a site index key: `site_name || 0x00 || drone_uuid`.
#[must_use]
pub fn site_drone_key(site_name: &str, drone_uuid: &DroneUuid) -> Vec<u8> {
    let mut key = site_prefix(site_name);
    key.extend_from_slice(drone_uuid.as_bytes());
    key
}

/// Encode a site prefix for scanning all drones of a site.
///
/// The separator keeps `site` from matching the drones of `site-b`.
#[must_use]
pub fn site_prefix(site_name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(site_name.len() + 1);
    key.extend_from_slice(site_name.as_bytes());
    key.push(SITE_SEPARATOR);
    key
}

/// Extract the drone uuid from a site index key.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if the key is malformed.
pub fn drone_uuid_from_site_key(key: &[u8]) -> Result<DroneUuid> {
    let separator = key
        .iter()
        .position(|byte| *byte == SITE_SEPARATOR)
        .ok_or_else(|| StoreError::Serialization("site key without separator".to_string()))?;
    parse_drone_uuid(&key[separator + 1..])
}

/// Encode a state index key: `state || drone_uuid`.
#[must_use]
pub fn state_drone_key(state: StateKind, drone_uuid: &DroneUuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(drone_uuid.as_bytes().len() + 1);
    key.push(state.as_u8());
    key.extend_from_slice(drone_uuid.as_bytes());
    key
}

/// Encode a state prefix for scanning all drones in a state.
#[must_use]
pub fn state_prefix(state: StateKind) -> Vec<u8> {
    vec![state.as_u8()]
}

/// Extract the drone uuid from a state index key.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if the key is malformed.
pub fn drone_uuid_from_state_key(key: &[u8]) -> Result<DroneUuid> {
    match key.split_first() {
        Some((_, uuid)) => parse_drone_uuid(uuid),
        None => Err(StoreError::Serialization("empty state key".to_string())),
    }
}

fn parse_drone_uuid(bytes: &[u8]) -> Result<DroneUuid> {
    std::str::from_utf8(bytes)
        .map_err(|e| StoreError::Serialization(e.to_string()))?
        .parse()
        .map_err(|e: drone_fleet_core::IdError| StoreError::Serialization(e.to_string()))
}
