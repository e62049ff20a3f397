use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::{DriverStatus, Position};
use crate::models::order::OrderStatus;

/// The record an event belongs to. Sequence numbers are scoped per entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Entity {
    Driver(Uuid),
    Order(Uuid),
}

impl Entity {
    pub fn id(&self) -> Uuid {
        match self {
            Entity::Driver(id) | Entity::Order(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    DriverOnboarded {
        name: String,
    },
    DriverStatusChanged {
        status: DriverStatus,
        version: u64,
    },
    DriverPosition {
        position: Position,
        version: u64,
    },
    OrderCreated,
    OrderStatusChanged {
        status: OrderStatus,
        assigned_driver: Option<Uuid>,
        version: u64,
    },
    DispatchFailed {
        reason: String,
    },
}

/// Envelope fanned out to subscribers. `seq` increases monotonically per
/// entity; a subscriber that sees a gap re-reads a snapshot from the owning
/// store instead of requesting replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub entity: Entity,
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}
