//! Column families of the checkpoint database.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary drone records, keyed by `drone_uuid`.
    pub const DRONES: &str = "drones";

    /// Index: drones by lifecycle state, keyed by `state || drone_uuid`.
    pub const DRONES_BY_STATE: &str = "drones_by_state";

    /// Index: drones by site, keyed by `site_name || 0x00 || drone_uuid`.
    pub const DRONES_BY_SITE: &str = "drones_by_site";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> [&'static str; 3] {
    [cf::DRONES, cf::DRONES_BY_STATE, cf::DRONES_BY_SITE]
}
