use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::ranking::{rank_candidates, widening_radii};
use crate::error::AppError;
use crate::models::event::{Entity, EventPayload};
use crate::models::order::{Order, OrderStatus};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub enum AssignOutcome {
    Assigned { order: Order, driver_id: Uuid },
    NoDriverAvailable,
    AlreadyAssigned,
}

impl AssignOutcome {
    fn metric_label(&self) -> &'static str {
        match self {
            AssignOutcome::Assigned { .. } => "assigned",
            AssignOutcome::NoDriverAvailable => "no_driver",
            AssignOutcome::AlreadyAssigned => "already_assigned",
        }
    }
}

/// Consumes order ids from the dispatch queue and runs one assignment
/// attempt per order. A NoDriverAvailable outcome leaves the order Pending;
/// retry policy belongs to the order-creation side, so the loop does not
/// spin on it.
pub async fn run_dispatch_engine(state: Arc<AppState>, mut dispatch_rx: mpsc::Receiver<Uuid>) {
    info!("dispatch engine started");

    while let Some(order_id) = dispatch_rx.recv().await {
        state.metrics.orders_in_queue.dec();

        let start = Instant::now();
        match assign(&state, order_id) {
            Ok(outcome) => {
                let elapsed = start.elapsed().as_secs_f64();
                state
                    .metrics
                    .assignment_latency_seconds
                    .with_label_values(&[outcome.metric_label()])
                    .observe(elapsed);
                state
                    .metrics
                    .assignments_total
                    .with_label_values(&[outcome.metric_label()])
                    .inc();

                if let AssignOutcome::Assigned { driver_id, .. } = outcome {
                    info!(order_id = %order_id, driver_id = %driver_id, "order assigned");
                }
            }
            Err(err) => {
                state
                    .metrics
                    .assignments_total
                    .with_label_values(&["error"])
                    .inc();
                error!(order_id = %order_id, error = %err, "dispatch failed");
            }
        }
    }

    warn!("dispatch engine stopped: queue channel closed");
}

/// One bounded assignment attempt for a pending order.
///
/// Candidates come from a snapshot that may already be stale; each is tried
/// with a version-gated Available -> OnDelivery swap, and a Conflict just
/// moves on to the next. Once a driver is held, the order's own
/// Pending -> Assigned swap must also land or the driver is rolled back, so
/// a half-assignment is never observable.
pub fn assign(state: &AppState, order_id: Uuid) -> Result<AssignOutcome, AppError> {
    let mut order = state.orders.snapshot(order_id)?;
    if order.status != OrderStatus::Pending {
        return Ok(AssignOutcome::AlreadyAssigned);
    }

    let mut attempts_left = state.config.dispatch_max_attempts;
    let mut tried: HashSet<Uuid> = HashSet::new();

    for radius_km in widening_radii(
        state.config.preferred_radius_km,
        state.config.max_radius_km,
    ) {
        let candidates = state
            .drivers
            .list_available(&order.dropoff, Some(radius_km));
        let ranked = rank_candidates(candidates, &order.dropoff);

        for candidate in ranked {
            if attempts_left == 0 {
                break;
            }
            if !tried.insert(candidate.driver.id) {
                continue;
            }
            attempts_left -= 1;

            let driver = match state
                .drivers
                .begin_delivery(candidate.driver.id, candidate.driver.version)
            {
                Ok(driver) => driver,
                Err(AppError::Conflict(_)) | Err(AppError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };

            match state
                .orders
                .mark_assigned(order_id, driver.id, order.version)
            {
                Ok(assigned) => {
                    state.broadcaster.publish(
                        Entity::Driver(driver.id),
                        EventPayload::DriverStatusChanged {
                            status: driver.status,
                            version: driver.version,
                        },
                    );
                    publish_order(state, &assigned);
                    return Ok(AssignOutcome::Assigned {
                        order: assigned,
                        driver_id: driver.id,
                    });
                }
                Err(_) => {
                    // The order moved under us (raced cancel or assign).
                    // Hand the driver back, then decide from a fresh read.
                    state.drivers.end_delivery(driver.id)?;
                    order = state.orders.snapshot(order_id)?;
                    if order.status != OrderStatus::Pending {
                        return Ok(AssignOutcome::AlreadyAssigned);
                    }
                }
            }
        }

        if attempts_left == 0 {
            break;
        }
    }

    warn!(order_id = %order_id, "no driver available within search radius");
    state.broadcaster.publish(
        Entity::Order(order_id),
        EventPayload::DispatchFailed {
            reason: "no driver available".to_string(),
        },
    );
    Ok(AssignOutcome::NoDriverAvailable)
}

/// Delivery completed: the order becomes terminal and the driver goes back
/// into the dispatch pool.
pub fn complete(state: &AppState, order_id: Uuid, expected_version: u64) -> Result<Order, AppError> {
    let delivered = state.orders.mark_delivered(order_id, expected_version)?;

    if let Some(driver_id) = delivered.assigned_driver {
        let driver = state.drivers.end_delivery(driver_id)?;
        state.broadcaster.publish(
            Entity::Driver(driver_id),
            EventPayload::DriverStatusChanged {
                status: driver.status,
                version: driver.version,
            },
        );
    }

    publish_order(state, &delivered);
    Ok(delivered)
}

/// Cancels a non-terminal order. An assigned driver is released first, so no
/// reader ever sees a cancelled order still holding one.
pub fn cancel(state: &AppState, order_id: Uuid) -> Result<Order, AppError> {
    let order = state.orders.snapshot(order_id)?;
    if order.status.is_terminal() {
        return Err(AppError::AlreadyTerminal(format!(
            "order {order_id} is already {:?}",
            order.status
        )));
    }

    if let Some(driver_id) = order.assigned_driver {
        let driver = state.drivers.end_delivery(driver_id)?;
        state.broadcaster.publish(
            Entity::Driver(driver_id),
            EventPayload::DriverStatusChanged {
                status: driver.status,
                version: driver.version,
            },
        );
    }

    let cancelled = state.orders.mark_cancelled(order_id)?;
    info!(order_id = %order_id, "order cancelled");
    publish_order(state, &cancelled);
    Ok(cancelled)
}

/// A driver signed off mid-delivery; the active order goes back to Pending
/// and is queued for a fresh assignment attempt.
pub async fn requeue_for_driver(state: &AppState, driver_id: Uuid) -> Result<Option<Order>, AppError> {
    let active = state.orders.list().into_iter().find(|order| {
        order.assigned_driver == Some(driver_id)
            && matches!(order.status, OrderStatus::Assigned | OrderStatus::EnRoute)
    });

    let Some(order) = active else {
        return Ok(None);
    };

    let requeued = state.orders.mark_requeued(order.id)?;
    warn!(order_id = %requeued.id, driver_id = %driver_id, "driver withdrew, order requeued");
    publish_order(state, &requeued);
    state.enqueue_dispatch(requeued.id).await?;
    Ok(Some(requeued))
}

fn publish_order(state: &AppState, order: &Order) {
    state.broadcaster.publish(
        Entity::Order(order.id),
        EventPayload::OrderStatusChanged {
            status: order.status,
            assigned_driver: order.assigned_driver,
            version: order.version,
        },
    );
}
