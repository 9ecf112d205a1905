//! State types for tracking applied resources.
//!
//! These types represent the recorded state of a stack, used by the diff
//! engine to decide what to create, update or delete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::{Outputs, Properties, Reference, ResourceKind};
use crate::error::StateError;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Number of history entries kept in a snapshot.
const MAX_HISTORY: usize = 100;

/// The persisted state of a stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateSnapshot {
    /// State format version.
    pub version: String,
    /// Stack name.
    pub stack: String,
    /// Environment name.
    pub environment: String,
    /// Hash of the last applied configuration.
    pub config_hash: String,
    /// Recorded resources keyed by logical id.
    pub resources: BTreeMap<String, ResourceState>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Recorded state of a single resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceState {
    /// Logical id from the stack file.
    pub logical_id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Identifier assigned by the provider, absent if creation never got that far.
    #[serde(default)]
    pub remote_id: Option<String>,
    /// Hash of the declared properties last applied.
    pub properties_hash: String,
    /// Current status.
    pub status: ResourceStatus,
    /// Dependencies at the time the resource was applied.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    /// Declared properties last applied.
    #[serde(default)]
    pub properties: Properties,
    /// Attributes reported by the provider.
    #[serde(default)]
    pub outputs: Outputs,
    /// When this entry was last written.
    pub updated_at: DateTime<Utc>,
}

/// Resource status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    /// Accepted by the provider, not yet ready.
    Pending,
    /// Created and ready.
    Created,
    /// Updated and ready.
    Updated,
    /// Deleted. Recording this status removes the entry.
    Deleted,
    /// The last action on this resource failed.
    Failed,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: Operation,
    /// Configuration hash at time of the run.
    pub config_hash: String,
    /// Resources changed by the run.
    pub resources: Vec<String>,
    /// Whether the run succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of recorded operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Converge to the stack file.
    Apply,
    /// Delete everything.
    Destroy,
}

impl StateSnapshot {
    /// Creates a new empty snapshot.
    #[must_use]
    pub fn new(stack: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            stack: stack.to_string(),
            environment: environment.to_string(),
            config_hash: String::new(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// An empty snapshot not yet bound to a stack.
    #[must_use]
    pub fn empty() -> Self {
        Self::new("", "")
    }

    /// Gets a resource by logical id.
    #[must_use]
    pub fn get(&self, logical_id: &str) -> Option<&ResourceState> {
        self.resources.get(logical_id)
    }

    /// Applies a recorded resource state.
    ///
    /// A `Deleted` state removes the entry; anything else replaces it.
    pub fn record(&mut self, state: ResourceState) {
        if state.status == ResourceStatus::Deleted {
            self.resources.remove(&state.logical_id);
        } else {
            self.resources.insert(state.logical_id.clone(), state);
        }
        self.last_updated = Utc::now();
    }

    /// Resolves a `${...}` reference against recorded remote ids and outputs.
    #[must_use]
    pub fn resolve(&self, reference: &Reference) -> Option<serde_json::Value> {
        let entry = self.resources.get(&reference.logical_id)?;
        if reference.is_remote_id() {
            return entry.remote_id.clone().map(serde_json::Value::String);
        }
        let attribute = reference.attribute.as_deref()?;
        entry.outputs.get(attribute).cloned()
    }

    /// Binds an unbound snapshot to a stack, or checks it belongs to it.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::StackMismatch`] if the snapshot was written by a
    /// different stack.
    pub fn bind(&mut self, stack: &str, environment: &str) -> Result<(), StateError> {
        if self.stack.is_empty() {
            self.stack = stack.to_string();
            self.environment = environment.to_string();
            return Ok(());
        }
        if self.stack != stack {
            return Err(StateError::StackMismatch {
                expected: stack.to_string(),
                found: self.stack.clone(),
            });
        }
        Ok(())
    }

    /// Adds a history entry.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Returns all recorded logical ids.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// Returns resources whose last action failed or never finished.
    #[must_use]
    pub fn unsettled(&self) -> Vec<&ResourceState> {
        self.resources
            .values()
            .filter(|r| matches!(r.status, ResourceStatus::Failed | ResourceStatus::Pending))
            .collect()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl ResourceState {
    /// Creates a new resource state.
    #[must_use]
    pub fn new(
        logical_id: &str,
        kind: ResourceKind,
        remote_id: Option<String>,
        properties_hash: &str,
        status: ResourceStatus,
    ) -> Self {
        Self {
            logical_id: logical_id.to_string(),
            kind,
            remote_id,
            properties_hash: properties_hash.to_string(),
            status,
            depends_on: BTreeSet::new(),
            properties: Properties::new(),
            outputs: Outputs::new(),
            updated_at: Utc::now(),
        }
    }

    /// Sets the recorded dependencies.
    #[must_use]
    pub fn with_depends_on(mut self, depends_on: BTreeSet<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    /// Sets the recorded declared properties.
    #[must_use]
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// Sets the provider outputs.
    #[must_use]
    pub fn with_outputs(mut self, outputs: Outputs) -> Self {
        self.outputs = outputs;
        self
    }

    /// Returns a copy with a new status.
    #[must_use]
    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self.updated_at = Utc::now();
        self
    }

    /// Checks if the resource is settled (created or updated).
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self.status, ResourceStatus::Created | ResourceStatus::Updated)
    }
}

impl HistoryEntry {
    /// Creates a new history entry.
    #[must_use]
    pub fn new(operation: Operation, config_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: Operation,
        config_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Pending => "pending",
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Failed => "failed",
        };
        write!(f, "{status}")
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bucket_state() -> ResourceState {
        let mut outputs = Outputs::new();
        outputs.insert("arn".into(), json!("arn:bucket:b-1"));
        ResourceState::new("site", ResourceKind::Bucket, Some("b-1".into()), "h1", ResourceStatus::Created)
            .with_outputs(outputs)
    }

    #[test]
    fn test_record_and_delete() {
        let mut snapshot = StateSnapshot::new("site", "dev");
        snapshot.record(bucket_state());
        assert_eq!(snapshot.resource_ids(), vec!["site"]);

        snapshot.record(bucket_state().with_status(ResourceStatus::Deleted));
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_resolve() {
        let mut snapshot = StateSnapshot::empty();
        snapshot.record(bucket_state());

        let remote = Reference { logical_id: "site".into(), attribute: None };
        let alias = Reference { logical_id: "site".into(), attribute: Some("remote_id".into()) };
        let arn = Reference { logical_id: "site".into(), attribute: Some("arn".into()) };
        let missing = Reference { logical_id: "site".into(), attribute: Some("nope".into()) };

        assert_eq!(snapshot.resolve(&remote), Some(json!("b-1")));
        assert_eq!(snapshot.resolve(&alias), Some(json!("b-1")));
        assert_eq!(snapshot.resolve(&arn), Some(json!("arn:bucket:b-1")));
        assert_eq!(snapshot.resolve(&missing), None);
    }

    #[test]
    fn test_bind() {
        let mut snapshot = StateSnapshot::empty();
        assert!(snapshot.bind("site", "prod").is_ok());
        assert_eq!(snapshot.environment, "prod");
        assert!(snapshot.bind("site", "prod").is_ok());
        assert!(matches!(
            snapshot.bind("other", "prod"),
            Err(StateError::StackMismatch { .. })
        ));
    }

    #[test]
    fn test_history_is_capped() {
        let mut snapshot = StateSnapshot::new("site", "dev");
        for i in 0..(MAX_HISTORY + 5) {
            snapshot.add_history(HistoryEntry::new(Operation::Apply, &i.to_string(), vec![]));
        }
        assert_eq!(snapshot.history.len(), MAX_HISTORY);
        assert_eq!(snapshot.history[0].config_hash, "5");
    }

    #[test]
    fn test_unsettled() {
        let mut snapshot = StateSnapshot::new("site", "dev");
        snapshot.record(bucket_state());
        snapshot.record(
            ResourceState::new("cdn", ResourceKind::Distribution, None, "h2", ResourceStatus::Failed),
        );
        let unsettled: Vec<_> = snapshot.unsettled().iter().map(|r| r.logical_id.as_str()).collect();
        assert_eq!(unsettled, vec!["cdn"]);
    }
}
