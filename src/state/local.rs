//! Local file-based state storage backend.
//!
//! This module provides a simple file-based state storage for local
//! development and single-machine use.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{Result, StackError, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, holder_or_generated};
use super::store::{StateStore, decode_lock, decode_snapshot, encode_lock, encode_snapshot, renew_lock};
use super::types::StateSnapshot;

/// Default state directory name.
pub const STATE_DIR: &str = ".edgestack";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a new local state store under `.edgestack/` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| StackError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a new local state store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let state_path = base_dir.join(STATE_FILE);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            state_path,
            lock_path,
        }
    }

    /// Creates the store for a stack file living in `stack_dir`.
    ///
    /// A configured relative `path` is taken from the stack file's
    /// directory, not the working directory. Without one, state goes to
    /// `.edgestack/` next to the stack file.
    #[must_use]
    pub fn for_stack(stack_dir: &Path, path: Option<&str>) -> Self {
        Self::with_base_dir(stack_dir.join(path.unwrap_or(STATE_DIR)))
    }

    /// Path of the state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                StackError::State(StateError::storage(format!(
                    "Failed to create state directory: {e}"
                )))
            })?;
        }
        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        match fs::read_to_string(&self.lock_path).await {
            Ok(content) => decode_lock(&content).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StackError::State(StateError::Corrupted {
                message: format!("Failed to read lock file: {e}"),
            })),
        }
    }

    /// Creates the lock file, failing if one already exists.
    ///
    /// Returns `Ok(false)` when another lock file is in the way.
    async fn create_lock_file(&self, lock_info: &LockInfo) -> Result<bool> {
        self.ensure_dir().await?;

        let content = encode_lock(lock_info)?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => {
                return Err(StackError::State(StateError::LockFailed {
                    message: format!("Failed to create lock file: {e}"),
                }));
            }
        };

        file.write_all(content.as_bytes()).await.map_err(|e| {
            StackError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        })?;

        file.sync_all().await.map_err(|e| {
            StackError::State(StateError::LockFailed {
                message: format!("Failed to sync lock file: {e}"),
            })
        })?;

        Ok(true)
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StackError::State(StateError::LockFailed {
                message: format!("Failed to delete lock file: {e}"),
            })),
        }
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<StateSnapshot> {
        let content = match fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("State file does not exist: {}", self.state_path.display());
                return Ok(StateSnapshot::empty());
            }
            Err(e) => {
                return Err(StackError::State(StateError::Corrupted {
                    message: format!("Failed to read state file: {e}"),
                }));
            }
        };

        debug!("Loaded state from: {}", self.state_path.display());
        decode_snapshot(&content)
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        self.ensure_dir().await?;

        debug!("Saving state to: {}", self.state_path.display());

        let content = encode_snapshot(snapshot)?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = self.state_path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            StackError::State(StateError::storage(format!(
                "Failed to create temp state file: {e}"
            )))
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            StackError::State(StateError::storage(format!(
                "Failed to write state file: {e}"
            )))
        })?;

        file.sync_all().await.map_err(|e| {
            StackError::State(StateError::storage(format!(
                "Failed to sync state file: {e}"
            )))
        })?;

        fs::rename(&temp_path, &self.state_path).await.map_err(|e| {
            StackError::State(StateError::storage(format!(
                "Failed to rename state file: {e}"
            )))
        })?;

        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        if self.state_path.exists() {
            info!("Deleting state file: {}", self.state_path.display());
            fs::remove_file(&self.state_path).await.map_err(|e| {
                StackError::State(StateError::storage(format!(
                    "Failed to delete state file: {e}"
                )))
            })?;
        }

        self.delete_lock_file().await
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path.exists())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let lock_info = LockInfo::new(&holder_or_generated(holder));

        if !self.create_lock_file(&lock_info).await? {
            match self.read_lock_file().await? {
                Some(existing) if !existing.is_expired() => {
                    return Err(StackError::State(StateError::LockedByOther {
                        holder: existing.holder,
                        since: existing.acquired_at.to_rfc3339(),
                    }));
                }
                Some(existing) => {
                    warn!(
                        "Taking over expired lock held by {} since {}",
                        existing.holder, existing.acquired_at
                    );
                    self.delete_lock_file().await?;
                }
                None => {}
            }

            if !self.create_lock_file(&lock_info).await? {
                return Err(StackError::State(StateError::LockFailed {
                    message: String::from("Lock was taken by another process while acquiring"),
                }));
            }
        }

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo> {
        let lock = renew_lock(self.read_lock_file().await?, lock_id)?;

        // Replace in place so the lock file never disappears.
        let temp_path = self.lock_path.with_extension("lock.tmp");
        fs::write(&temp_path, encode_lock(&lock)?).await.map_err(|e| {
            StackError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        })?;
        fs::rename(&temp_path, &self.lock_path).await.map_err(|e| {
            StackError::State(StateError::LockFailed {
                message: format!("Failed to replace lock file: {e}"),
            })
        })?;

        debug!("Refreshed state lock: {lock_id}");
        Ok(lock)
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceKind;
    use crate::state::types::{ResourceState, ResourceStatus};
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path().join(STATE_DIR));
        (store, temp_dir)
    }

    fn created(id: &str) -> ResourceState {
        ResourceState::new(id, ResourceKind::Bucket, Some(format!("{id}-remote")), "hash", ResourceStatus::Created)
    }

    #[test]
    fn test_state_dir_follows_stack_file() {
        let stack_dir = Path::new("/srv/site");

        let default = LocalStateStore::for_stack(stack_dir, None);
        assert_eq!(default.state_path(), Path::new("/srv/site/.edgestack/state.json"));

        let relative = LocalStateStore::for_stack(stack_dir, Some("state/prod"));
        assert_eq!(relative.state_path(), Path::new("/srv/site/state/prod/state.json"));

        let absolute = LocalStateStore::for_stack(stack_dir, Some("/var/lib/edgestack"));
        assert_eq!(absolute.state_path(), Path::new("/var/lib/edgestack/state.json"));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();

        let mut snapshot = StateSnapshot::new("site", "dev");
        snapshot.record(created("bucket"));
        store.save(&snapshot).await.expect("Failed to save state");

        let loaded = store.load().await.expect("Failed to load state");
        assert_eq!(loaded, snapshot);
        assert!(!store.state_path().with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_load_nonexistent_is_empty() {
        let (store, _temp) = create_test_store();

        let snapshot = store.load().await.expect("Load should not fail");
        assert!(snapshot.is_empty());
        assert!(snapshot.stack.is_empty());
        assert!(!store.exists().await.expect("exists check failed"));
    }

    #[tokio::test]
    async fn test_corrupted_state_is_fatal() {
        let (store, _temp) = create_test_store();
        store.ensure_dir().await.unwrap();
        std::fs::write(store.state_path(), "{ not json").unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, StackError::State(StateError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let (store, _temp) = create_test_store();
        let mut snapshot = StateSnapshot::new("site", "dev");
        snapshot.version = String::from("0.1");
        store.save(&snapshot).await.unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, StackError::State(StateError::VersionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_record_is_incremental() {
        let (store, _temp) = create_test_store();
        store.save(&StateSnapshot::new("site", "dev")).await.unwrap();

        assert_ok!(store.record(created("bucket")).await);
        assert_ok!(store.record(created("cdn")).await);
        assert_ok!(store.record(created("bucket").with_status(ResourceStatus::Deleted)).await);

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.stack, "site");
        assert_eq!(loaded.resource_ids(), vec!["cdn"]);
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("test-holder")
            .await
            .expect("Failed to acquire lock");

        assert!(store.is_locked().await.expect("is_locked failed"));

        store
            .release_lock(&lock.lock_id)
            .await
            .expect("Failed to release lock");

        assert!(!store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let _lock1 = store
            .acquire_lock("holder-1")
            .await
            .expect("Failed to acquire first lock");

        let err = assert_err!(store.acquire_lock("holder-2").await);
        assert!(matches!(err, StackError::State(StateError::LockedByOther { ref holder, .. }) if holder == "holder-1"));
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let (store, _temp) = create_test_store();
        let mut stale = LockInfo::new("crashed-run");
        stale.expires_at = chrono::Utc::now() - chrono::Duration::seconds(5);
        assert!(store.create_lock_file(&stale).await.unwrap());

        let lock = store.acquire_lock("fresh-run").await.unwrap();
        assert_eq!(store.get_lock_info().await.unwrap(), Some(lock));
    }

    #[tokio::test]
    async fn test_release_with_wrong_id_keeps_lock() {
        let (store, _temp) = create_test_store();
        let _lock = store.acquire_lock("holder").await.unwrap();

        store.release_lock("someone-else").await.unwrap();
        assert!(store.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_refreshed_lock_is_not_taken_over() {
        let (store, _temp) = create_test_store();
        let mut lock = store.acquire_lock("run-1").await.unwrap();

        // A minute short of expiry, as after a long readiness wait.
        lock.expires_at = chrono::Utc::now() + chrono::Duration::seconds(60);
        store.delete_lock_file().await.unwrap();
        assert!(store.create_lock_file(&lock).await.unwrap());

        let refreshed = store.refresh_lock(&lock.lock_id).await.unwrap();
        assert_eq!(refreshed.lock_id, lock.lock_id);
        assert!(refreshed.remaining_secs() > 60);
        assert_eq!(store.get_lock_info().await.unwrap(), Some(refreshed));

        let err = assert_err!(store.acquire_lock("run-2").await);
        assert!(matches!(err, StackError::State(StateError::LockedByOther { ref holder, .. }) if holder == "run-1"));
    }

    #[tokio::test]
    async fn test_refresh_after_takeover_is_lost() {
        let (store, _temp) = create_test_store();
        let mut stale = LockInfo::new("run-1");
        stale.expires_at = chrono::Utc::now() - chrono::Duration::seconds(5);
        assert!(store.create_lock_file(&stale).await.unwrap());
        let taken = store.acquire_lock("run-2").await.unwrap();

        let err = assert_err!(store.refresh_lock(&stale.lock_id).await);
        assert!(matches!(err, StackError::State(StateError::LockLost { ref lock_id }) if *lock_id == stale.lock_id));
        assert_eq!(store.get_lock_info().await.unwrap(), Some(taken));
    }

    #[tokio::test]
    async fn test_refresh_without_lock_is_lost() {
        let (store, _temp) = create_test_store();
        let err = assert_err!(store.refresh_lock("never-acquired").await);
        assert!(matches!(err, StackError::State(StateError::LockLost { .. })));
        assert!(!store.lock_path.with_extension("lock.tmp").exists());
    }
}
