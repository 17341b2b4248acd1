//! End-to-end drone lifecycles against scripted and simulated backends.
//!
//! Run with:
//!   cargo test -p drone-fleet-control --test lifecycle

use std::sync::Arc;
use std::time::Duration;

use drone_fleet_control::mock::{
    BatchOperation, RecordingPlugin, ScriptedBatchSystemAdapter, ScriptedSiteAdapter, SiteOperation,
};
use drone_fleet_control::{
    BackendError, BatchSystemAgent, BatchSystemConfig, ControlError, Drone, DroneHandle, DronePool,
    FakeBatchSystemAdapter, FakeSiteAdapter, FakeSiteConfig, MachineMetaData, MachineStatus, Plugin,
    RegistryPlugin, ResourceStatus, SiteAgent, StateKind,
};
use drone_fleet_store::{RocksStore, Store};
use tempfile::TempDir;

// =============================================================================
// Fixtures
// =============================================================================

const META: MachineMetaData = MachineMetaData {
    cores: 8,
    memory_gb: 32.0,
    disk_gb: 200.0,
};

struct Scripted {
    site: Arc<ScriptedSiteAdapter>,
    batch: Arc<ScriptedBatchSystemAdapter>,
    site_agent: Arc<SiteAgent>,
    batch_agent: Arc<BatchSystemAgent>,
}

impl Scripted {
    fn new() -> Self {
        let site = Arc::new(ScriptedSiteAdapter::new());
        let batch = Arc::new(ScriptedBatchSystemAdapter::new());
        let site_agent = SiteAgent::new(Arc::clone(&site) as _, "Scripted", "m1.large", META)
            .with_heartbeat_interval(Duration::from_secs(1));
        let batch_agent = BatchSystemAgent::new(Arc::clone(&batch) as _);
        Self {
            site,
            batch,
            site_agent: Arc::new(site_agent),
            batch_agent: Arc::new(batch_agent),
        }
    }

    fn drone(&self, plugins: Vec<Arc<dyn Plugin>>) -> Drone {
        Drone::new(
            Arc::clone(&self.site_agent),
            Arc::clone(&self.batch_agent),
            plugins,
        )
    }
}

/// Drive a fresh drone to `Available` through the scripted backends.
async fn bring_up(scripted: &Scripted, drone: &mut Drone) {
    scripted.site.set_status(ResourceStatus::Booting);
    assert_eq!(drone.tick().await.unwrap(), StateKind::Booting);
    scripted.site.set_status(ResourceStatus::Running);
    assert_eq!(drone.tick().await.unwrap(), StateKind::Integrating);
    scripted.batch.set_machine_status(MachineStatus::Available);
    assert_eq!(drone.tick().await.unwrap(), StateKind::Available);
}

async fn wait_for(handle: &DroneHandle, state: StateKind, step: Duration, max_steps: usize) {
    for _ in 0..max_steps {
        if handle.state() == Some(state) {
            return;
        }
        tokio::time::sleep(step).await;
    }
    panic!(
        "drone {} did not reach {state}, stuck in {:?}",
        handle.drone_uuid(),
        handle.state()
    );
}

// =============================================================================
// Scripted backends
// =============================================================================

#[tokio::test]
async fn drone_boots_and_becomes_available() {
    let scripted = Scripted::new();
    let plugin = Arc::new(RecordingPlugin::new());
    let mut drone = scripted.drone(vec![Arc::clone(&plugin) as _]);
    scripted.batch.set_allocation(0.5);
    scripted.batch.set_utilisation(0.25);

    // Tick 1: the resource is requested.
    assert_eq!(drone.tick().await.unwrap(), StateKind::Booting);
    assert_eq!(
        drone.attributes().remote_resource_uuid.as_deref(),
        Some(format!("remote-{}", drone.drone_uuid()).as_str())
    );

    // Tick 2: still booting.
    assert_eq!(drone.tick().await.unwrap(), StateKind::Booting);

    // Tick 3: running, integrated within the same tick.
    scripted.site.set_status(ResourceStatus::Running);
    assert_eq!(drone.tick().await.unwrap(), StateKind::Integrating);
    assert_eq!(scripted.batch.calls(BatchOperation::Integrate), 1);

    // Tick 4: the batch system accepts the machine.
    scripted.batch.set_machine_status(MachineStatus::Available);
    assert_eq!(drone.tick().await.unwrap(), StateKind::Available);
    assert!((drone.allocation() - 0.5).abs() < f64::EPSILON);
    assert!((drone.utilisation() - 0.25).abs() < f64::EPSILON);
    assert!((drone.supply() - 8.0).abs() < f64::EPSILON);

    assert_eq!(
        plugin.states(),
        vec![
            StateKind::Request,
            StateKind::Booting,
            StateKind::Integrate,
            StateKind::Integrating,
            StateKind::Available,
        ]
    );
}

#[tokio::test]
async fn released_drone_drains_and_shuts_down() {
    let scripted = Scripted::new();
    let plugin = Arc::new(RecordingPlugin::new());
    let mut drone = scripted.drone(vec![Arc::clone(&plugin) as _]);
    assert_eq!(drone.tick().await.unwrap(), StateKind::Booting);
    bring_up(&scripted, &mut drone).await;

    drone.set_demand(0.0);
    scripted.batch.set_machine_status(MachineStatus::Draining);
    assert_eq!(drone.tick().await.unwrap(), StateKind::Draining);
    assert!(drone.supply().abs() < f64::EPSILON);
    assert_eq!(scripted.batch.calls(BatchOperation::Drain), 1);

    assert_eq!(drone.tick().await.unwrap(), StateKind::Draining);

    scripted.batch.set_machine_status(MachineStatus::Drained);
    assert_eq!(drone.tick().await.unwrap(), StateKind::ShutDown);
    assert_eq!(scripted.batch.calls(BatchOperation::Disintegrate), 1);

    assert_eq!(drone.tick().await.unwrap(), StateKind::ShuttingDown);
    assert_eq!(scripted.site.calls(SiteOperation::Stop), 1);

    scripted.site.set_status(ResourceStatus::Stopped);
    assert_eq!(drone.tick().await.unwrap(), StateKind::Cleanup);
    assert_eq!(drone.tick().await.unwrap(), StateKind::Cleanup);
    assert_eq!(scripted.site.calls(SiteOperation::Terminate), 1);

    scripted.site.set_status(ResourceStatus::Deleted);
    assert_eq!(drone.tick().await.unwrap(), StateKind::Down);

    let states = plugin.states();
    let tail = &states[states.len() - 8..];
    assert_eq!(
        tail,
        [
            StateKind::Available,
            StateKind::Drain,
            StateKind::Draining,
            StateKind::Disintegrate,
            StateKind::ShutDown,
            StateKind::ShuttingDown,
            StateKind::Cleanup,
            StateKind::Down,
        ]
    );
}

#[tokio::test]
async fn same_state_does_not_notify_or_stamp() {
    let scripted = Scripted::new();
    let plugin = Arc::new(RecordingPlugin::new());
    let mut drone = scripted.drone(vec![Arc::clone(&plugin) as _]);

    drone.tick().await.unwrap();
    let updated = drone.attributes().updated;
    for _ in 0..3 {
        assert_eq!(drone.tick().await.unwrap(), StateKind::Booting);
    }

    assert_eq!(plugin.states(), vec![StateKind::Request, StateKind::Booting]);
    assert_eq!(drone.attributes().updated, updated);
}

#[tokio::test]
async fn failing_plugin_does_not_stop_the_drone() {
    let scripted = Scripted::new();
    let failing = Arc::new(RecordingPlugin::failing());
    let recording = Arc::new(RecordingPlugin::new());
    let mut drone = scripted.drone(vec![Arc::clone(&failing) as _, Arc::clone(&recording) as _]);

    assert_eq!(drone.tick().await.unwrap(), StateKind::Booting);
    bring_up(&scripted, &mut drone).await;

    assert_eq!(failing.states(), recording.states());
    assert_eq!(recording.states().last(), Some(&StateKind::Available));
}

#[tokio::test]
async fn transient_failures_keep_the_drone_in_place() {
    let scripted = Scripted::new();
    let mut drone = scripted.drone(Vec::new());
    assert_eq!(drone.tick().await.unwrap(), StateKind::Booting);

    scripted.site.set_status(ResourceStatus::Running);
    scripted
        .batch
        .push_error(BatchOperation::Integrate, BackendError::Timeout("batch system".into()));
    assert_eq!(drone.tick().await.unwrap(), StateKind::Integrate);
    assert_eq!(drone.tick().await.unwrap(), StateKind::Integrating);

    scripted.batch.set_machine_status(MachineStatus::Available);
    scripted
        .batch
        .push_error(BatchOperation::MachineStatus, BackendError::QuotaExceeded("rate limit".into()));
    assert_eq!(drone.tick().await.unwrap(), StateKind::Integrating);
    assert_eq!(drone.tick().await.unwrap(), StateKind::Available);
}

#[tokio::test]
async fn unexpected_backend_error_ends_the_run() {
    let scripted = Scripted::new();
    scripted
        .site
        .push_error(SiteOperation::Deploy, BackendError::Config("no image".into()));
    let mut drone = scripted.drone(Vec::new());

    let err = drone.run().await.unwrap_err();
    assert!(matches!(err, ControlError::Backend(BackendError::Config(_))));
    assert!(!err.is_retriable());
}

#[tokio::test(start_paused = true)]
async fn crashed_resource_is_cleaned_up() {
    let scripted = Scripted::new();
    let mut drone = scripted.drone(Vec::new());
    assert_eq!(drone.tick().await.unwrap(), StateKind::Booting);

    scripted
        .site
        .push_error(SiteOperation::Status, BackendError::DroneCrashed("vanished".into()));
    scripted.site.set_status(ResourceStatus::Deleted);

    drone.run().await.unwrap();
    assert_eq!(drone.state(), Some(StateKind::Down));
    assert!(drone.demand().abs() < f64::EPSILON);
}

// =============================================================================
// Checkpoint / restore
// =============================================================================

#[tokio::test]
async fn checkpointed_drone_is_restored() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RocksStore::open(dir.path()).unwrap());
    let registry: Arc<dyn Plugin> = Arc::new(RegistryPlugin::new(Arc::clone(&store)));

    let scripted = Scripted::new();
    let mut drone = scripted.drone(vec![Arc::clone(&registry)]);
    assert_eq!(drone.tick().await.unwrap(), StateKind::Booting);
    bring_up(&scripted, &mut drone).await;

    let record = store.get_drone(drone.drone_uuid()).unwrap().unwrap();
    assert_eq!(record.state, StateKind::Available);
    assert_eq!(&record.attributes, drone.attributes());

    // A new process picks the drone up where it was left.
    let pool = DronePool::new(
        Arc::clone(&scripted.site_agent),
        Arc::clone(&scripted.batch_agent),
        vec![registry],
    );
    assert_eq!(pool.restore(store.list_drones_by_site("Scripted").unwrap()), 1);
    let handle = pool.drones()[0].clone();
    assert_eq!(handle.drone_uuid(), drone.drone_uuid());
    assert_eq!(handle.state(), Some(StateKind::Available));

    // Down drones leave the registry.
    scripted.site.set_status(ResourceStatus::Deleted);
    wait_for(&handle, StateKind::Down, Duration::from_millis(50), 200).await;
    assert!(store.get_drone(drone.drone_uuid()).unwrap().is_none());
}

// =============================================================================
// Simulated backends
// =============================================================================

#[tokio::test(start_paused = true)]
async fn pool_runs_drones_against_fake_backends() {
    let site = Arc::new(FakeSiteAdapter::new(FakeSiteConfig {
        resource_boot_time_seconds: 120,
        bulk_delay_ms: 10,
        ..FakeSiteConfig::default()
    }));
    let batch = Arc::new(FakeBatchSystemAdapter::new(BatchSystemConfig {
        allocation: 0.9,
        utilisation: 0.6,
        status_max_age_seconds: 10,
    }));
    let site_agent = SiteAgent::new(Arc::clone(&site) as _, "Fake", "m1.large", META)
        .with_heartbeat_interval(Duration::from_secs(10));
    let pool = DronePool::new(
        Arc::new(site_agent),
        Arc::new(BatchSystemAgent::new(Arc::clone(&batch) as _)),
        Vec::new(),
    );

    pool.set_demand(12.0);
    let handles = pool.drones();
    assert_eq!(handles.len(), 2);

    let step = Duration::from_secs(5);
    for handle in &handles {
        wait_for(handle, StateKind::Available, step, 100).await;
    }
    assert!((pool.supply() - 16.0).abs() < f64::EPSILON);
    assert!((pool.allocation() - 0.9).abs() < f64::EPSILON);
    assert!((pool.utilisation() - 0.6).abs() < f64::EPSILON);
    assert_eq!(site.live_resources(), 2);

    pool.set_demand(0.0);
    for handle in &handles {
        wait_for(handle, StateKind::Down, step, 100).await;
    }
    assert_eq!(site.live_resources(), 0);
    assert!(pool.supply().abs() < f64::EPSILON);

    // Give the drone tasks a chance to finish after their last tick.
    tokio::time::sleep(step).await;
    assert_eq!(pool.collect_garbage().await, 2);
    assert!(pool.is_empty());
}
