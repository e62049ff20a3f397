use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::storage::{PersistedState, SnapshotError, SnapshotStore};

/// Keeps the snapshot in memory. Useful in tests and when persistence is
/// disabled; state does not survive the process.
#[derive(Default)]
pub struct MemorySnapshotStore {
    inner: Mutex<Option<PersistedState>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> Result<Option<PersistedState>, SnapshotError> {
        Ok(self.inner.lock().await.clone())
    }

    async fn save(&self, state: &PersistedState) -> Result<(), SnapshotError> {
        *self.inner.lock().await = Some(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemorySnapshotStore;
    use crate::models::driver::Driver;
    use crate::storage::{PersistedState, SnapshotStore};

    #[tokio::test]
    async fn load_returns_what_was_saved() {
        let store = MemorySnapshotStore::new();
        assert!(store.load().await.unwrap().is_none());

        let state = PersistedState {
            drivers: vec![Driver::new("saved".to_string(), true)],
            orders: Vec::new(),
        };
        store.save(&state).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.drivers.len(), 1);
        assert_eq!(loaded.drivers[0].name, "saved");
    }
}
