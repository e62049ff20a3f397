use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::dispatch;
use crate::error::AppError;
use crate::ingest::{self, IngestOutcome};
use crate::models::driver::{Driver, DriverStatus};
use crate::models::event::{Entity, EventPayload};
use crate::models::fix::LocationFix;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(create_driver).get(list_drivers))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/status", patch(update_driver_status))
        .route("/drivers/:id/active", patch(update_driver_active))
        .route("/locations", post(report_location))
}

#[derive(Deserialize)]
pub struct CreateDriverRequest {
    pub name: String,
    #[serde(default)]
    pub approved: bool,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DriverStatus,
    pub expected_version: u64,
}

#[derive(Deserialize)]
pub struct UpdateActiveRequest {
    pub active: bool,
}

#[derive(Serialize)]
pub struct IngestResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ingest::RejectReason>,
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::InvalidInput("name cannot be empty".to_string()));
    }

    let driver = Driver::new(payload.name, payload.approved);
    state.drivers.insert(driver.clone());
    state.broadcaster.publish(
        Entity::Driver(driver.id),
        EventPayload::DriverOnboarded {
            name: driver.name.clone(),
        },
    );

    Ok(Json(driver))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<Driver>> {
    Json(state.drivers.list())
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(state.drivers.snapshot(id)?))
}

/// The one entry point for status changes, shared by the driver app and the
/// admin console; both present the version they last read. Signing off a
/// driver who was mid-delivery sends the orphaned order back for dispatch.
async fn update_driver_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Driver>, AppError> {
    let driver = state
        .drivers
        .set_status(id, payload.status, payload.expected_version)?;

    state.broadcaster.publish(
        Entity::Driver(id),
        EventPayload::DriverStatusChanged {
            status: driver.status,
            version: driver.version,
        },
    );

    if driver.status == DriverStatus::Offline {
        dispatch::requeue_for_driver(&state, id).await?;
    }

    Ok(Json(driver))
}

async fn update_driver_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateActiveRequest>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(state.drivers.set_active(id, payload.active)?))
}

/// Ingest boundary for driver clients. A rejected fix is a normal answer
/// with a reason code, not an error status.
async fn report_location(
    State(state): State<Arc<AppState>>,
    Json(fix): Json<LocationFix>,
) -> Result<Json<IngestResponse>, AppError> {
    let response = match ingest::record(&state, &fix)? {
        IngestOutcome::Accepted | IngestOutcome::Unchanged => IngestResponse {
            accepted: true,
            reason: None,
        },
        IngestOutcome::Rejected(reason) => IngestResponse {
            accepted: false,
            reason: Some(reason),
        },
    };

    Ok(Json(response))
}
