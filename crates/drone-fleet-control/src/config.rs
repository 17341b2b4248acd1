//! Fleet configuration.
//!
//! The configuration is loaded once at startup and handed to every component that
//! needs it; there is no global configuration state.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};

/// Top-level configuration of the control process.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Listen address of the health endpoints (e.g., "0.0.0.0:8080").
    #[serde(default = "FleetConfig::default_listen_addr")]
    pub listen_addr: String,

    /// Directory of the checkpoint database; checkpointing is off if unset.
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,

    /// Seconds between two ticks of a drone, unless overridden per site.
    #[serde(default = "FleetConfig::default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,

    /// Seconds a single backend call may take before it counts as timed out.
    #[serde(default = "FleetConfig::default_call_timeout")]
    pub call_timeout_seconds: u64,

    /// Sites providing resources.
    #[serde(default)]
    pub sites: Vec<SiteConfig>,

    /// The batch system drones integrate with.
    #[serde(default)]
    pub batch_system: BatchSystemConfig,
}

impl FleetConfig {
    fn default_listen_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    const fn default_heartbeat_interval() -> u64 {
        60
    }

    const fn default_call_timeout() -> u64 {
        60
    }

    /// Load the configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Config` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ControlError::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| ControlError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Load the file named by `FLEET_CONFIG` (or the defaults) and apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Config` if the configuration file is invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("FLEET_CONFIG") {
            Ok(path) => Self::load(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(val) = std::env::var("LISTEN_ADDR") {
            config.listen_addr = val;
        }
        if let Ok(val) = std::env::var("CHECKPOINT_DIR") {
            config.checkpoint_dir = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("HEARTBEAT_INTERVAL_SECONDS") {
            if let Ok(n) = val.parse() {
                config.heartbeat_interval_seconds = n;
            }
        }
        if let Ok(val) = std::env::var("CALL_TIMEOUT_SECONDS") {
            if let Ok(n) = val.parse() {
                config.call_timeout_seconds = n;
            }
        }

        Ok(config)
    }

    /// Reject configurations no drone could run with.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Config` naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.sites.is_empty() {
            return Err(ControlError::Config("no sites configured".to_string()));
        }

        let mut names = HashSet::new();
        for site in &self.sites {
            if site.name.is_empty() || site.name.contains('\0') {
                return Err(ControlError::Config(format!(
                    "invalid site name {:?}",
                    site.name
                )));
            }
            if !names.insert(site.name.as_str()) {
                return Err(ControlError::Config(format!("duplicate site {}", site.name)));
            }
            if site.fake.bulk_size == 0 {
                return Err(ControlError::Config(format!(
                    "site {}: bulk_size must be positive",
                    site.name
                )));
            }
            for (machine_type, machine) in &site.machine_types {
                if machine.meta_data.cores == 0 {
                    return Err(ControlError::Config(format!(
                        "site {}: machine type {machine_type} has no cores",
                        site.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Get the default heartbeat interval as a `Duration`.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    /// Get the backend call timeout as a `Duration`.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            checkpoint_dir: None,
            heartbeat_interval_seconds: Self::default_heartbeat_interval(),
            call_timeout_seconds: Self::default_call_timeout(),
            sites: Vec::new(),
            batch_system: BatchSystemConfig::default(),
        }
    }
}

/// One site providing resources.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site name, used as the drone uuid prefix.
    pub name: String,

    /// Maximum number of live drones per machine type.
    #[serde(default)]
    pub quota: Option<usize>,

    /// Minimum time a drone stays available before it is drained.
    #[serde(default)]
    pub drone_minimum_lifetime_seconds: Option<u64>,

    /// Overrides the fleet-wide heartbeat interval for drones of this site.
    #[serde(default)]
    pub drone_heartbeat_interval_seconds: Option<u64>,

    /// Machine types offered by the site.
    #[serde(default)]
    pub machine_types: BTreeMap<String, MachineTypeConfig>,

    /// Behaviour of the simulated site backend.
    #[serde(default)]
    pub fake: FakeSiteConfig,
}

impl SiteConfig {
    /// Minimum lifetime as a `Duration`, if configured.
    #[must_use]
    pub fn drone_minimum_lifetime(&self) -> Option<Duration> {
        self.drone_minimum_lifetime_seconds.map(Duration::from_secs)
    }

    /// Heartbeat interval of this site's drones.
    #[must_use]
    pub fn drone_heartbeat_interval(&self, fleet: &FleetConfig) -> Duration {
        self.drone_heartbeat_interval_seconds
            .map_or_else(|| fleet.heartbeat_interval(), Duration::from_secs)
    }
}

/// A machine type offered by a site.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineTypeConfig {
    /// Resources of one machine.
    pub meta_data: MachineMetaData,

    /// Demand applied to the pool at startup, in cores.
    #[serde(default)]
    pub initial_demand: f64,
}

/// Resources of one machine of a machine type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MachineMetaData {
    /// Number of cores; the maximum demand a drone of this type can supply.
    pub cores: u32,
    /// Memory in GB.
    pub memory_gb: f64,
    /// Disk in GB.
    pub disk_gb: f64,
}

/// Behaviour of the simulated site backend.
#[derive(Debug, Clone, Deserialize)]
pub struct FakeSiteConfig {
    /// Delay of every simulated API call in milliseconds.
    #[serde(default)]
    pub api_response_delay_ms: u64,

    /// Time until a deployed resource reports `Running`.
    #[serde(default = "FakeSiteConfig::default_boot_time")]
    pub resource_boot_time_seconds: u64,

    /// Maximum number of deployments sent in one bulk call.
    #[serde(default = "FakeSiteConfig::default_bulk_size")]
    pub bulk_size: usize,

    /// Maximum time a deployment waits for others to join its bulk call.
    #[serde(default = "FakeSiteConfig::default_bulk_delay")]
    pub bulk_delay_ms: u64,

    /// Maximum number of bulk calls in flight.
    #[serde(default)]
    pub bulk_concurrency: Option<usize>,
}

impl FakeSiteConfig {
    const fn default_boot_time() -> u64 {
        60
    }

    const fn default_bulk_size() -> usize {
        10
    }

    const fn default_bulk_delay() -> u64 {
        1000
    }

    /// Get the API response delay as a `Duration`.
    #[must_use]
    pub const fn api_response_delay(&self) -> Duration {
        Duration::from_millis(self.api_response_delay_ms)
    }

    /// Get the boot time as a `Duration`.
    #[must_use]
    pub const fn resource_boot_time(&self) -> Duration {
        Duration::from_secs(self.resource_boot_time_seconds)
    }

    /// Get the bulk delay as a `Duration`.
    #[must_use]
    pub const fn bulk_delay(&self) -> Duration {
        Duration::from_millis(self.bulk_delay_ms)
    }
}

impl Default for FakeSiteConfig {
    fn default() -> Self {
        Self {
            api_response_delay_ms: 0,
            resource_boot_time_seconds: Self::default_boot_time(),
            bulk_size: Self::default_bulk_size(),
            bulk_delay_ms: Self::default_bulk_delay(),
            bulk_concurrency: None,
        }
    }
}

/// Behaviour of the simulated batch system.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchSystemConfig {
    /// Allocation reported for every integrated machine.
    #[serde(default = "BatchSystemConfig::default_ratio")]
    pub allocation: f64,

    /// Utilisation reported for every integrated machine.
    #[serde(default = "BatchSystemConfig::default_ratio")]
    pub utilisation: f64,

    /// Maximum age of the machine status snapshot.
    #[serde(default = "BatchSystemConfig::default_status_max_age")]
    pub status_max_age_seconds: u64,
}

impl BatchSystemConfig {
    const fn default_ratio() -> f64 {
        1.0
    }

    const fn default_status_max_age() -> u64 {
        10
    }

    /// Get the status snapshot age as a `Duration`.
    #[must_use]
    pub const fn status_max_age(&self) -> Duration {
        Duration::from_secs(self.status_max_age_seconds)
    }
}

impl Default for BatchSystemConfig {
    fn default() -> Self {
        Self {
            allocation: Self::default_ratio(),
            utilisation: Self::default_ratio(),
            status_max_age_seconds: Self::default_status_max_age(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "heartbeat_interval_seconds": 30,
        "sites": [{
            "name": "CloudA",
            "quota": 4,
            "drone_minimum_lifetime_seconds": 3600,
            "machine_types": {
                "m1.large": {
                    "meta_data": { "cores": 8, "memory_gb": 16, "disk_gb": 100 },
                    "initial_demand": 16
                }
            },
            "fake": { "bulk_size": 5 }
        }]
    }"#;

    fn sample() -> FleetConfig {
        serde_json::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn default_config() {
        let config = FleetConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(60));
        assert_eq!(config.call_timeout(), Duration::from_secs(60));
        assert!(config.checkpoint_dir.is_none());
        assert_eq!(config.batch_system.status_max_age(), Duration::from_secs(10));
    }

    #[test]
    fn parses_sites_with_defaults() {
        let config = sample();
        let site = &config.sites[0];

        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(site.quota, Some(4));
        assert_eq!(site.drone_minimum_lifetime(), Some(Duration::from_secs(3600)));
        assert_eq!(site.drone_heartbeat_interval(&config), Duration::from_secs(30));
        assert_eq!(site.machine_types["m1.large"].meta_data.cores, 8);
        assert_eq!(site.fake.bulk_size, 5);
        assert_eq!(site.fake.bulk_delay(), Duration::from_secs(1));
        assert_eq!(site.fake.resource_boot_time(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn site_heartbeat_overrides_fleet() {
        let mut config = sample();
        config.sites[0].drone_heartbeat_interval_seconds = Some(5);
        assert_eq!(
            config.sites[0].drone_heartbeat_interval(&config),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn validate_rejects_broken_configs() {
        assert!(FleetConfig::default().validate().is_err());

        let mut duplicate = sample();
        duplicate.sites.push(duplicate.sites[0].clone());
        assert!(duplicate.validate().is_err());

        let mut no_cores = sample();
        no_cores
            .sites[0]
            .machine_types
            .get_mut("m1.large")
            .unwrap()
            .meta_data
            .cores = 0;
        assert!(no_cores.validate().is_err());

        let mut unnamed = sample();
        unnamed.sites[0].name = String::new();
        assert!(matches!(unnamed.validate(), Err(ControlError::Config(_))));

        let mut separator = sample();
        separator.sites[0].name = "cloud\0a".to_string();
        assert!(separator.validate().is_err());

        let mut no_bulk = sample();
        no_bulk.sites[0].fake.bulk_size = 0;
        assert!(matches!(no_bulk.validate(), Err(ControlError::Config(_))));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = FleetConfig::load("/nonexistent/fleet.json").unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
