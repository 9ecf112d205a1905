//! State management module for the edgestack reconciler.
//!
//! This module provides persistent state storage for tracking applied
//! resources: remote ids, property hashes, provider outputs and run history.

mod store;
mod local;
mod s3;
mod lock;
mod types;

pub use store::StateStore;
pub use local::{LocalStateStore, STATE_DIR};
pub use s3::S3StateStore;
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use types::{
    HistoryEntry, Operation, ResourceState, ResourceStatus, STATE_VERSION, StateSnapshot,
};
