//! Drone Fleet Control - Drone Lifecycle Service
//!
//! Runs one drone pool per configured site and machine type against the simulated
//! backends, checkpoints drones if a checkpoint directory is configured, and serves
//! health endpoints.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use drone_fleet_control::{
    BatchSystemAgent, DronePool, FakeBatchSystemAdapter, FakeSiteAdapter, FleetConfig, LogPlugin,
    Plugin, RegistryPlugin, SiteAgent,
};
use drone_fleet_store::{RocksStore, Store};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    pools: Arc<Vec<DronePool>>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

#[derive(Serialize)]
struct PoolResponse {
    site: String,
    machine_type: String,
    drones: usize,
    demand: f64,
    supply: f64,
    allocation: f64,
    utilisation: f64,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "drone-fleet-control",
    })
}

async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let pools: Vec<PoolResponse> = state
        .pools
        .iter()
        .map(|pool| PoolResponse {
            site: pool.site_name().to_string(),
            machine_type: pool.machine_type().to_string(),
            drones: pool.len(),
            demand: pool.demand(),
            supply: pool.supply(),
            allocation: pool.allocation(),
            utilisation: pool.utilisation(),
        })
        .collect();
    Json(pools)
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(state)
}

/// Build one pool per site and machine type, restoring checkpointed drones.
fn build_pools(
    config: &FleetConfig,
    store: Option<&Arc<RocksStore>>,
) -> Result<Vec<DronePool>, Box<dyn std::error::Error>> {
    let mut plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(LogPlugin::new())];
    if let Some(store) = store {
        plugins.push(Arc::new(RegistryPlugin::new(Arc::clone(store))));
    }

    let batch_system = Arc::new(FakeBatchSystemAdapter::new(config.batch_system.clone()));
    let mut pools = Vec::new();

    for site in &config.sites {
        let site_adapter = Arc::new(FakeSiteAdapter::new(site.fake.clone()));
        let checkpoints = match store {
            Some(store) => store.list_drones_by_site(&site.name)?,
            None => Vec::new(),
        };

        for (machine_type, machine) in &site.machine_types {
            let site_agent = SiteAgent::new(
                Arc::clone(&site_adapter) as _,
                &site.name,
                machine_type,
                machine.meta_data,
            )
            .with_minimum_lifetime(site.drone_minimum_lifetime())
            .with_heartbeat_interval(site.drone_heartbeat_interval(config))
            .with_call_timeout(config.call_timeout());
            let batch_agent = BatchSystemAgent::new(Arc::clone(&batch_system) as _)
                .with_call_timeout(config.call_timeout());

            let pool = DronePool::new(Arc::new(site_agent), Arc::new(batch_agent), plugins.clone())
                .with_quota(site.quota);
            pool.restore(checkpoints.iter().cloned());
            pool.set_demand(machine.initial_demand);

            tracing::info!(
                site = %site.name,
                machine_type = %machine_type,
                drones = pool.len(),
                "Started drone pool"
            );
            pools.push(pool);
        }
    }

    Ok(pools)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,drone_fleet=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Drone Fleet Control");

    let config = FleetConfig::from_env()?;
    config.validate()?;

    let store = match &config.checkpoint_dir {
        Some(dir) => {
            let store = Arc::new(RocksStore::open(dir)?);
            tracing::info!(checkpoint_dir = %dir.display(), "Initialized RocksDB checkpoint store");
            Some(store)
        }
        None => None,
    };

    let pools = Arc::new(build_pools(&config, store.as_ref())?);

    // Forget drones that reached their end
    let collector = Arc::clone(&pools);
    let interval = config.heartbeat_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for pool in collector.iter() {
                pool.collect_garbage().await;
            }
        }
    });

    let app = create_router(AppState { pools });

    // Start server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
