//! Restart persistence for driver and order records.
//!
//! The core's read/write contract (versioned records, point lookups, radius
//! listing) lives in the in-process stores; a snapshot backend only has to
//! get the records across a restart. Backends implement `SnapshotStore`.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::driver::Driver;
use crate::models::order::Order;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Everything that must survive a process restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    pub drivers: Vec<Driver>,
    pub orders: Vec<Order>,
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Loads the last saved state; `None` on first boot.
    async fn load(&self) -> Result<Option<PersistedState>, SnapshotError>;

    /// Replaces the saved state atomically.
    async fn save(&self, state: &PersistedState) -> Result<(), SnapshotError>;
}
