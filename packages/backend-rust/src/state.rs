//! Infrastructure state persistence.
//!
//! The backend does not talk to a remote state service itself; it hands
//! whatever [`StateStore`] it was built with to operation handlers.
//! [`MemoryStateStore`] keeps state in process.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A point-in-time copy of infrastructure state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Incremented on every write of the same lineage.
    pub serial: u64,
    /// Identifies the history this snapshot belongs to.
    pub lineage: String,
    /// Resource state, opaque to the backend.
    pub resources: serde_json::Value,
}

/// Pluggable state persistence used by operation handlers.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the latest snapshot. `None` if nothing has been written yet.
    async fn read(&self) -> anyhow::Result<Option<StateSnapshot>>;

    /// Replace the stored snapshot.
    async fn write(&self, snapshot: &StateSnapshot) -> anyhow::Result<()>;
}

/// In-process `StateStore`.
///
/// Rejects writes that would move the serial backwards within a lineage.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    current: RwLock<Option<StateSnapshot>>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn read(&self) -> anyhow::Result<Option<StateSnapshot>> {
        Ok(self.current.read().clone())
    }

    async fn write(&self, snapshot: &StateSnapshot) -> anyhow::Result<()> {
        let mut current = self.current.write();
        if let Some(existing) = current.as_ref() {
            if existing.lineage == snapshot.lineage && snapshot.serial < existing.serial {
                anyhow::bail!(
                    "stale state: serial {} is older than stored serial {}",
                    snapshot.serial,
                    existing.serial
                );
            }
        }
        *current = Some(snapshot.clone());
        Ok(())
    }
}
