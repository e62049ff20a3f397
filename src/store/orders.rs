use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::GeoPoint;
use crate::models::order::{Order, OrderStatus};

/// Owns every order's lifecycle state and assignment record. Transitions are
/// version-gated and strictly sequential per order; terminal orders are
/// immutable.
pub struct OrderLedger {
    orders: DashMap<Uuid, Order>,
}

impl OrderLedger {
    pub fn new() -> Self {
        Self {
            orders: DashMap::new(),
        }
    }

    pub fn restore(orders: Vec<Order>) -> Self {
        let ledger = Self::new();
        for order in orders {
            ledger.orders.insert(order.id, order);
        }
        ledger
    }

    pub fn create(&self, dropoff: GeoPoint) -> Order {
        let order = Order::new(dropoff);
        self.orders.insert(order.id, order.clone());
        order
    }

    pub fn snapshot(&self, order_id: Uuid) -> Result<Order, AppError> {
        self.orders
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
    }

    pub fn count(&self) -> usize {
        self.orders.len()
    }

    pub fn list(&self) -> Vec<Order> {
        self.orders
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Caller-facing transition along the forward edges of the lifecycle
    /// graph. Assignment and cancellation go through their own paths so the
    /// driver-side bookkeeping cannot be skipped.
    pub fn transition(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        expected_version: u64,
    ) -> Result<Order, AppError> {
        self.mutate(order_id, Some(expected_version), |order| {
            let allowed = matches!(
                (order.status, new_status),
                (OrderStatus::Assigned, OrderStatus::EnRoute)
            );
            if !allowed {
                return Err(AppError::InvalidTransition(format!(
                    "order {order_id} cannot go {:?} -> {new_status:?} here",
                    order.status
                )));
            }
            order.status = new_status;
            Ok(())
        })
    }

    /// Dispatch-only CAS Pending -> Assigned. The Conflict answer covers both
    /// a lost version race and an order that stopped being Pending (for
    /// instance a concurrent cancellation), so the matcher aborts either way.
    pub fn mark_assigned(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
        expected_version: u64,
    ) -> Result<Order, AppError> {
        self.mutate(order_id, Some(expected_version), |order| {
            if order.status != OrderStatus::Pending {
                return Err(AppError::Conflict(format!(
                    "order {order_id} is no longer pending"
                )));
            }
            order.status = OrderStatus::Assigned;
            order.assigned_driver = Some(driver_id);
            order.assigned_at = Some(Utc::now());
            Ok(())
        })
    }

    /// Dispatch-only EnRoute -> Delivered.
    pub fn mark_delivered(&self, order_id: Uuid, expected_version: u64) -> Result<Order, AppError> {
        self.mutate(order_id, Some(expected_version), |order| {
            if order.status != OrderStatus::EnRoute {
                return Err(AppError::InvalidTransition(format!(
                    "order {order_id} cannot be delivered from {:?}",
                    order.status
                )));
            }
            order.status = OrderStatus::Delivered;
            order.delivered_at = Some(Utc::now());
            Ok(())
        })
    }

    /// Dispatch-only: mark cancelled. The caller has already released the
    /// driver, so no reader observes a cancelled order still holding one.
    pub fn mark_cancelled(&self, order_id: Uuid) -> Result<Order, AppError> {
        self.mutate(order_id, None, |order| {
            if order.status.is_terminal() {
                return Err(AppError::AlreadyTerminal(format!(
                    "order {order_id} is already {:?}",
                    order.status
                )));
            }
            order.status = OrderStatus::Cancelled;
            order.assigned_driver = None;
            order.cancelled_at = Some(Utc::now());
            Ok(())
        })
    }

    /// Dispatch-only: driver withdrew mid-delivery; the order goes back to
    /// Pending for a fresh assignment attempt.
    pub fn mark_requeued(&self, order_id: Uuid) -> Result<Order, AppError> {
        self.mutate(order_id, None, |order| {
            if !matches!(order.status, OrderStatus::Assigned | OrderStatus::EnRoute) {
                return Err(AppError::InvalidTransition(format!(
                    "order {order_id} cannot be requeued from {:?}",
                    order.status
                )));
            }
            order.status = OrderStatus::Pending;
            order.assigned_driver = None;
            order.assigned_at = None;
            Ok(())
        })
    }

    fn mutate<F>(
        &self,
        order_id: Uuid,
        expected_version: Option<u64>,
        apply: F,
    ) -> Result<Order, AppError>
    where
        F: FnOnce(&mut Order) -> Result<(), AppError>,
    {
        let mut entry = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
        let order = entry.value_mut();

        if let Some(expected) = expected_version {
            if order.version != expected {
                return Err(AppError::Conflict(format!(
                    "order {order_id} is at version {}, expected {expected}",
                    order.version
                )));
            }
        }

        apply(order)?;
        order.version += 1;
        Ok(order.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::OrderLedger;
    use crate::error::AppError;
    use crate::models::driver::GeoPoint;
    use crate::models::order::OrderStatus;
    use uuid::Uuid;

    fn dropoff() -> GeoPoint {
        GeoPoint {
            lat: 30.28,
            lng: -97.75,
        }
    }

    #[test]
    fn lifecycle_runs_forward_only() {
        let ledger = OrderLedger::new();
        let driver = Uuid::from_u128(9);
        let order = ledger.create(dropoff());

        let order = ledger.mark_assigned(order.id, driver, order.version).unwrap();
        assert_eq!(order.status, OrderStatus::Assigned);
        assert_eq!(order.assigned_driver, Some(driver));

        let order = ledger
            .transition(order.id, OrderStatus::EnRoute, order.version)
            .unwrap();
        let order = ledger.mark_delivered(order.id, order.version).unwrap();
        assert_eq!(order.status, OrderStatus::Delivered);
        assert!(order.delivered_at.is_some());
    }

    #[test]
    fn pending_cannot_jump_to_en_route() {
        let ledger = OrderLedger::new();
        let order = ledger.create(dropoff());
        let err = ledger
            .transition(order.id, OrderStatus::EnRoute, order.version)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[test]
    fn terminal_orders_are_immutable() {
        let ledger = OrderLedger::new();
        let order = ledger.create(dropoff());
        ledger.mark_cancelled(order.id).unwrap();

        let err = ledger.mark_cancelled(order.id).unwrap_err();
        assert!(matches!(err, AppError::AlreadyTerminal(_)));

        let err = ledger
            .mark_assigned(order.id, Uuid::from_u128(1), 1)
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn assignment_race_loses_on_version() {
        let ledger = OrderLedger::new();
        let order = ledger.create(dropoff());

        ledger
            .mark_assigned(order.id, Uuid::from_u128(1), order.version)
            .unwrap();
        let err = ledger
            .mark_assigned(order.id, Uuid::from_u128(2), order.version)
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let after = ledger.snapshot(order.id).unwrap();
        assert_eq!(after.assigned_driver, Some(Uuid::from_u128(1)));
    }

    #[test]
    fn requeue_returns_order_to_pending() {
        let ledger = OrderLedger::new();
        let order = ledger.create(dropoff());
        ledger
            .mark_assigned(order.id, Uuid::from_u128(1), order.version)
            .unwrap();

        let order = ledger.mark_requeued(order.id).unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.assigned_driver, None);
        assert!(order.assigned_at.is_none());
    }
}
