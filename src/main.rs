mod api;
mod broadcast;
mod config;
mod engine;
mod error;
mod geo;
mod ingest;
mod models;
mod observability;
mod state;
mod storage;
mod store;

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing_subscriber::EnvFilter;

use crate::models::event::{Entity, EventPayload};
use crate::state::AppState;
use crate::storage::file::FileSnapshotStore;
use crate::storage::{PersistedState, SnapshotStore};
use crate::store::drivers::StaleAction;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    let config = config::Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let snapshot_store: Option<Arc<dyn SnapshotStore>> = config
        .snapshot_path
        .as_ref()
        .map(|path| Arc::new(FileSnapshotStore::new(path.clone())) as Arc<dyn SnapshotStore>);

    let restored = match &snapshot_store {
        Some(store) => store
            .load()
            .await
            .map_err(|err| error::AppError::Internal(format!("snapshot load failed: {err}")))?
            .unwrap_or_default(),
        None => PersistedState::default(),
    };
    if !restored.drivers.is_empty() || !restored.orders.is_empty() {
        tracing::info!(
            drivers = restored.drivers.len(),
            orders = restored.orders.len(),
            "state restored from snapshot"
        );
    }

    let (app_state, dispatch_rx) =
        AppState::with_records(config.clone(), restored.drivers, restored.orders);
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(engine::dispatch::run_dispatch_engine(
        shared_state.clone(),
        dispatch_rx,
    ));
    tokio::spawn(run_staleness_sweeper(shared_state.clone()));
    if let Some(store) = snapshot_store.clone() {
        tokio::spawn(run_checkpointer(shared_state.clone(), store));
    }

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| error::AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| error::AppError::Internal(format!("server error: {err}")))?;

    if let Some(store) = &snapshot_store {
        save_snapshot(&shared_state, store.as_ref()).await;
        tracing::info!("final snapshot saved");
    }

    Ok(())
}

/// Signs off drivers that stopped reporting and flags stale positions for
/// drivers mid-delivery.
async fn run_staleness_sweeper(state: Arc<AppState>) {
    let interval = std::time::Duration::from_secs(state.config.sweep_interval_secs);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let cutoff = Utc::now() - Duration::seconds(state.config.stale_after_secs);

        for action in state.drivers.sweep_stale(cutoff) {
            match action {
                StaleAction::WentOffline(driver) => {
                    tracing::info!(driver_id = %driver.id, "driver signed off after going silent");
                    state.broadcaster.publish(
                        Entity::Driver(driver.id),
                        EventPayload::DriverStatusChanged {
                            status: driver.status,
                            version: driver.version,
                        },
                    );
                }
                StaleAction::PositionFlagged(driver) => {
                    if let Some(position) = driver.position {
                        state.broadcaster.publish(
                            Entity::Driver(driver.id),
                            EventPayload::DriverPosition {
                                position,
                                version: driver.version,
                            },
                        );
                    }
                }
            }
        }
    }
}

async fn run_checkpointer(state: Arc<AppState>, store: Arc<dyn SnapshotStore>) {
    let interval = std::time::Duration::from_secs(state.config.checkpoint_interval_secs);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        save_snapshot(&state, store.as_ref()).await;
    }
}

async fn save_snapshot(state: &AppState, store: &dyn SnapshotStore) {
    let snapshot = PersistedState {
        drivers: state.drivers.list(),
        orders: state.orders.list(),
    };
    if let Err(err) = store.save(&snapshot).await {
        tracing::error!(error = %err, "snapshot save failed");
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
