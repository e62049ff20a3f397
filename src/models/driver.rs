use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverStatus {
    Offline,
    Online,
    Available,
    OnDelivery,
}

/// Most recent accepted fix for a driver. `stale` is set by the staleness
/// sweeper when an on-delivery driver stops reporting; observers treat the
/// coordinates as last-known rather than live.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub point: GeoPoint,
    pub accuracy_m: f64,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub status: DriverStatus,
    pub position: Option<Position>,
    pub approved: bool,
    pub active: bool,
    pub version: u64,
    pub last_assigned_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    pub fn new(name: String, approved: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            status: DriverStatus::Offline,
            position: None,
            approved,
            active: true,
            version: 0,
            last_assigned_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Eligible to be handed an order right now.
    pub fn dispatchable(&self) -> bool {
        self.status == DriverStatus::Available && self.approved && self.active
    }
}
