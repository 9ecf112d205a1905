//! Types exchanged with provider adapters.

use serde::{Deserialize, Serialize};

use crate::config::{Outputs, Properties};

/// Lifecycle status reported by the provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    /// The resource is usable.
    Ready,
    /// The provider is still applying the change.
    InProgress,
    /// The provider gave up on the change.
    Failed,
}

/// Response to a create or update call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisionedResource {
    /// Identifier assigned by the provider.
    #[serde(rename = "id")]
    pub remote_id: String,
    /// Status right after the call returned.
    pub status: RemoteStatus,
    /// Attributes known so far.
    #[serde(default)]
    pub outputs: Outputs,
}

/// A resource as currently seen by the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteResource {
    /// Identifier assigned by the provider.
    #[serde(rename = "id")]
    pub remote_id: String,
    /// Current status.
    pub status: RemoteStatus,
    /// Properties the resource currently has.
    #[serde(default)]
    pub properties: Properties,
    /// Current attributes.
    #[serde(default)]
    pub outputs: Outputs,
    /// Failure reason when `status` is `Failed`.
    #[serde(default)]
    pub message: Option<String>,
}

impl ProvisionedResource {
    /// A resource that is ready immediately.
    #[must_use]
    pub fn ready(remote_id: impl Into<String>, outputs: Outputs) -> Self {
        Self {
            remote_id: remote_id.into(),
            status: RemoteStatus::Ready,
            outputs,
        }
    }

    /// A resource still being applied.
    #[must_use]
    pub fn in_progress(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            status: RemoteStatus::InProgress,
            outputs: Outputs::new(),
        }
    }
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Failed => "failed",
        };
        write!(f, "{status}")
    }
}
