//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Result, StackError, StateError};

use super::lock::LockInfo;
use super::types::{ResourceState, STATE_VERSION, StateSnapshot};

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the snapshot.
    ///
    /// Returns an empty snapshot if no state exists yet. A snapshot that
    /// cannot be read or parsed is a fatal `Corrupted` error.
    async fn load(&self) -> Result<StateSnapshot>;

    /// Replaces the stored snapshot atomically.
    async fn save(&self, snapshot: &StateSnapshot) -> Result<()>;

    /// Records a single resource: load, apply, save.
    ///
    /// A `Deleted` status removes the entry.
    async fn record(&self, state: ResourceState) -> Result<()> {
        debug!("Recording {} as {}", state.logical_id, state.status);
        let mut snapshot = self.load().await?;
        snapshot.record(state);
        self.save(&snapshot).await
    }

    /// Deletes the stored snapshot.
    async fn delete(&self) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires the run lock.
    ///
    /// Returns lock information if successful.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the run lock if `lock_id` still owns it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Extends the run lock held as `lock_id` by another full lease.
    ///
    /// Fails with [`StateError::LockLost`] if the lock is gone or owned by
    /// someone else.
    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked.
    async fn is_locked(&self) -> Result<bool> {
        Ok(self
            .get_lock_info()
            .await?
            .is_some_and(|lock| !lock.is_expired()))
    }

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self) -> Result<StateSnapshot> {
        (**self).load().await
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        (**self).save(snapshot).await
    }

    async fn record(&self, state: ResourceState) -> Result<()> {
        (**self).record(state).await
    }

    async fn delete(&self) -> Result<()> {
        (**self).delete().await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo> {
        (**self).refresh_lock(lock_id).await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).get_lock_info().await
    }

    async fn is_locked(&self) -> Result<bool> {
        (**self).is_locked().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

/// Parses a stored snapshot, checking its format version.
pub(crate) fn decode_snapshot(content: &str) -> Result<StateSnapshot> {
    let snapshot: StateSnapshot = serde_json::from_str(content).map_err(|e| {
        StackError::State(StateError::Corrupted {
            message: format!("Failed to parse state: {e}"),
        })
    })?;

    if snapshot.version != STATE_VERSION {
        return Err(StackError::State(StateError::VersionMismatch {
            expected: STATE_VERSION.to_string(),
            found: snapshot.version,
        }));
    }

    Ok(snapshot)
}

/// Serializes a snapshot as pretty JSON.
pub(crate) fn encode_snapshot(snapshot: &StateSnapshot) -> Result<String> {
    serde_json::to_string_pretty(snapshot).map_err(|e| {
        StackError::State(StateError::serialization(format!(
            "Failed to serialize state: {e}"
        )))
    })
}

/// Serializes a lock as pretty JSON.
pub(crate) fn encode_lock(lock: &LockInfo) -> Result<String> {
    serde_json::to_string_pretty(lock).map_err(|e| {
        StackError::State(StateError::serialization(format!(
            "Failed to serialize lock: {e}"
        )))
    })
}

/// Checks that `existing` is the lock `lock_id` and extends it.
pub(crate) fn renew_lock(existing: Option<LockInfo>, lock_id: &str) -> Result<LockInfo> {
    match existing {
        Some(mut lock) if lock.lock_id == lock_id => {
            lock.refresh();
            Ok(lock)
        }
        _ => Err(StackError::State(StateError::LockLost {
            lock_id: lock_id.to_string(),
        })),
    }
}

/// Parses a stored lock.
pub(crate) fn decode_lock(content: &str) -> Result<LockInfo> {
    serde_json::from_str(content).map_err(|e| {
        StackError::State(StateError::Corrupted {
            message: format!("Failed to parse lock: {e}"),
        })
    })
}
