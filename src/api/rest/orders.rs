use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::dispatch;
use crate::error::AppError;
use crate::models::driver::GeoPoint;
use crate::models::event::{Entity, EventPayload};
use crate::models::order::{Order, OrderStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", patch(update_order_status))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/dispatch", post(redispatch_order))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub dropoff: GeoPoint,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    pub expected_version: u64,
}

/// Order-creation boundary: records the order and hands it to the matcher.
async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    if !(-90.0..=90.0).contains(&payload.dropoff.lat)
        || !(-180.0..=180.0).contains(&payload.dropoff.lng)
    {
        return Err(AppError::InvalidInput(
            "dropoff coordinates out of range".to_string(),
        ));
    }

    let order = state.orders.create(payload.dropoff);
    state
        .broadcaster
        .publish(Entity::Order(order.id), EventPayload::OrderCreated);
    state.enqueue_dispatch(order.id).await?;

    Ok(Json(order))
}

async fn list_orders(State(state): State<Arc<AppState>>) -> Json<Vec<Order>> {
    Json(state.orders.list())
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.snapshot(id)?))
}

/// Progression reported by the assigned driver: EnRoute when the delivery
/// starts moving, Delivered when it lands (which also frees the driver).
async fn update_order_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, AppError> {
    let order = match payload.status {
        OrderStatus::EnRoute => {
            let order = state
                .orders
                .transition(id, OrderStatus::EnRoute, payload.expected_version)?;
            state.broadcaster.publish(
                Entity::Order(id),
                EventPayload::OrderStatusChanged {
                    status: order.status,
                    assigned_driver: order.assigned_driver,
                    version: order.version,
                },
            );
            order
        }
        OrderStatus::Delivered => dispatch::complete(&state, id, payload.expected_version)?,
        other => {
            return Err(AppError::InvalidTransition(format!(
                "{other:?} cannot be requested through this endpoint"
            )));
        }
    };

    Ok(Json(order))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(dispatch::cancel(&state, id)?))
}

/// Re-triggers matching for an order that is still Pending, typically after
/// a NoDriverAvailable outcome.
async fn redispatch_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state.orders.snapshot(id)?;
    if order.status != OrderStatus::Pending {
        return Err(AppError::InvalidTransition(format!(
            "order {id} is {:?}, only pending orders can be re-dispatched",
            order.status
        )));
    }

    state.enqueue_dispatch(id).await?;
    Ok(Json(order))
}
