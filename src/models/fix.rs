use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single position sample reported by a driver client. Consumed to update
/// the driver's current position; only the newest accepted fix is retained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub driver_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub accuracy_m: f64,
    pub captured_at: DateTime<Utc>,
}
