use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Assigned,
    EnRoute,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub dropoff: GeoPoint,
    pub status: OrderStatus,
    pub assigned_driver: Option<Uuid>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(dropoff: GeoPoint) -> Self {
        Self {
            id: Uuid::new_v4(),
            dropoff,
            status: OrderStatus::Pending,
            assigned_driver: None,
            version: 0,
            created_at: Utc::now(),
            assigned_at: None,
            delivered_at: None,
            cancelled_at: None,
        }
    }
}
