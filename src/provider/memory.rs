//! In-process provider simulation.
//!
//! Keeps resources in a map and reports plausible outputs per kind, so a
//! stack can be rehearsed end to end without a control plane.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

use crate::config::{Outputs, Properties, ResourceKind};
use crate::error::{ProviderError, ProviderResult};

use super::ResourceProvider;
use super::types::{ProvisionedResource, RemoteResource, RemoteStatus};

/// Domain used for generated hostnames.
const SIMULATED_DOMAIN: &str = "edge.invalid";

#[derive(Debug, Clone)]
struct Entry {
    kind: ResourceKind,
    properties: Properties,
    outputs: Outputs,
    /// Polls left before the resource reports ready.
    polls_until_ready: u32,
}

/// In-memory provider.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    resources: Mutex<HashMap<String, Entry>>,
    /// How many `get` calls a create or update stays in progress for.
    pending_polls: u32,
}

impl MemoryProvider {
    /// Creates an empty provider whose changes are ready immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every create or update report in-progress for `polls` reads.
    #[must_use]
    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Number of live resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no resources exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns the properties a resource was last applied with.
    #[must_use]
    pub fn properties_of(&self, remote_id: &str) -> Option<Properties> {
        self.lock().get(remote_id).map(|e| e.properties.clone())
    }

    /// Replaces a resource's properties behind the reconciler's back.
    pub fn tamper(&self, remote_id: &str, key: &str, value: Value) {
        if let Some(entry) = self.lock().get_mut(remote_id) {
            entry.properties.insert(key.to_string(), value);
        }
    }

    /// Removes a resource behind the reconciler's back.
    pub fn forget(&self, remote_id: &str) {
        self.lock().remove(remote_id);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status_for(&self) -> RemoteStatus {
        if self.pending_polls == 0 {
            RemoteStatus::Ready
        } else {
            RemoteStatus::InProgress
        }
    }
}

fn string_prop<'a>(properties: &'a Properties, key: &str) -> Option<&'a str> {
    properties.get(key).and_then(Value::as_str)
}

fn id_prefix(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Bucket => "bkt",
        ResourceKind::Distribution => "dist",
        ResourceKind::Certificate => "cert",
        ResourceKind::DnsRecord => "rec",
        ResourceKind::Policy => "pol",
        ResourceKind::OriginAccessIdentity => "oai",
    }
}

/// Attributes a real control plane would report for each kind.
fn simulated_outputs(kind: ResourceKind, remote_id: &str, properties: &Properties) -> Outputs {
    let mut outputs = Outputs::new();
    match kind {
        ResourceKind::Bucket => {
            let name = string_prop(properties, "bucket_name").unwrap_or(remote_id);
            outputs.insert("name".into(), json!(name));
            outputs.insert("arn".into(), json!(format!("arn:edgestack:bucket:::{name}")));
            outputs.insert(
                "regional_domain_name".into(),
                json!(format!("{name}.storage.{SIMULATED_DOMAIN}")),
            );
        }
        ResourceKind::Distribution => {
            outputs.insert(
                "domain_name".into(),
                json!(format!("{remote_id}.cdn.{SIMULATED_DOMAIN}")),
            );
            outputs.insert("hosted_zone_id".into(), json!("ZEDGESTACKCDN"));
        }
        ResourceKind::Certificate => {
            let region = string_prop(properties, "region").unwrap_or("us-east-1");
            outputs.insert(
                "arn".into(),
                json!(format!("arn:edgestack:certificate:{region}:{remote_id}")),
            );
            outputs.insert("status".into(), json!("issued"));
        }
        ResourceKind::DnsRecord => {
            if let Some(name) = string_prop(properties, "name") {
                outputs.insert("fqdn".into(), json!(name));
            }
        }
        ResourceKind::Policy => {
            if let Some(bucket) = properties.get("bucket") {
                outputs.insert("attached_to".into(), bucket.clone());
            }
        }
        ResourceKind::OriginAccessIdentity => {
            outputs.insert(
                "canonical_user_id".into(),
                json!(Uuid::new_v4().simple().to_string()),
            );
        }
    }
    outputs
}

#[async_trait]
impl ResourceProvider for MemoryProvider {
    async fn create(
        &self,
        kind: ResourceKind,
        properties: &Properties,
    ) -> ProviderResult<ProvisionedResource> {
        let remote_id = format!(
            "{}-{}",
            id_prefix(kind),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let outputs = simulated_outputs(kind, &remote_id, properties);
        debug!("Simulating create of {kind} as {remote_id}");

        self.lock().insert(
            remote_id.clone(),
            Entry {
                kind,
                properties: properties.clone(),
                outputs: outputs.clone(),
                polls_until_ready: self.pending_polls,
            },
        );

        Ok(ProvisionedResource {
            remote_id,
            status: self.status_for(),
            outputs,
        })
    }

    async fn update(
        &self,
        kind: ResourceKind,
        remote_id: &str,
        properties: &Properties,
    ) -> ProviderResult<ProvisionedResource> {
        let mut resources = self.lock();
        let entry = resources
            .get_mut(remote_id)
            .filter(|e| e.kind == kind)
            .ok_or_else(|| ProviderError::NotFound {
                remote_id: remote_id.to_string(),
            })?;

        let mut outputs = simulated_outputs(kind, remote_id, properties);
        // Identity-like outputs survive an in-place update.
        for (key, value) in &entry.outputs {
            if key == "canonical_user_id" {
                outputs.insert(key.clone(), value.clone());
            }
        }
        entry.properties = properties.clone();
        entry.outputs = outputs.clone();
        entry.polls_until_ready = self.pending_polls;

        Ok(ProvisionedResource {
            remote_id: remote_id.to_string(),
            status: self.status_for(),
            outputs,
        })
    }

    async fn delete(&self, kind: ResourceKind, remote_id: &str) -> ProviderResult<()> {
        let mut resources = self.lock();
        if resources.get(remote_id).is_some_and(|e| e.kind == kind) {
            resources.remove(remote_id);
            debug!("Simulating delete of {kind} {remote_id}");
            Ok(())
        } else {
            Err(ProviderError::NotFound {
                remote_id: remote_id.to_string(),
            })
        }
    }

    async fn get(&self, kind: ResourceKind, remote_id: &str) -> ProviderResult<RemoteResource> {
        let mut resources = self.lock();
        let entry = resources
            .get_mut(remote_id)
            .filter(|e| e.kind == kind)
            .ok_or_else(|| ProviderError::NotFound {
                remote_id: remote_id.to_string(),
            })?;

        let status = if entry.polls_until_ready == 0 {
            RemoteStatus::Ready
        } else {
            entry.polls_until_ready -= 1;
            RemoteStatus::InProgress
        };

        Ok(RemoteResource {
            remote_id: remote_id.to_string(),
            status,
            properties: entry.properties.clone(),
            outputs: entry.outputs.clone(),
            message: None,
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket_props() -> Properties {
        let mut props = Properties::new();
        props.insert("bucket_name".into(), json!("example-site"));
        props
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let provider = MemoryProvider::new();
        let created = provider.create(ResourceKind::Bucket, &bucket_props()).await.unwrap();

        assert!(created.remote_id.starts_with("bkt-"));
        assert_eq!(created.status, RemoteStatus::Ready);
        assert_eq!(created.outputs["name"], json!("example-site"));

        let remote = provider.get(ResourceKind::Bucket, &created.remote_id).await.unwrap();
        assert_eq!(remote.properties, bucket_props());

        provider.delete(ResourceKind::Bucket, &created.remote_id).await.unwrap();
        assert!(provider.is_empty());

        let err = provider.delete(ResourceKind::Bucket, &created.remote_id).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_pending_polls() {
        let provider = MemoryProvider::new().with_pending_polls(2);
        let created = provider.create(ResourceKind::Distribution, &Properties::new()).await.unwrap();
        assert_eq!(created.status, RemoteStatus::InProgress);

        let statuses = [
            provider.get(ResourceKind::Distribution, &created.remote_id).await.unwrap().status,
            provider.get(ResourceKind::Distribution, &created.remote_id).await.unwrap().status,
            provider.get(ResourceKind::Distribution, &created.remote_id).await.unwrap().status,
        ];
        assert_eq!(
            statuses,
            [RemoteStatus::InProgress, RemoteStatus::InProgress, RemoteStatus::Ready]
        );
    }

    #[tokio::test]
    async fn test_update_keeps_identity() {
        let provider = MemoryProvider::new();
        let created = provider
            .create(ResourceKind::OriginAccessIdentity, &Properties::new())
            .await
            .unwrap();
        let mut props = Properties::new();
        props.insert("comment".into(), json!("site reader"));

        let updated = provider
            .update(ResourceKind::OriginAccessIdentity, &created.remote_id, &props)
            .await
            .unwrap();
        assert_eq!(
            updated.outputs["canonical_user_id"],
            created.outputs["canonical_user_id"]
        );
    }

    #[tokio::test]
    async fn test_kind_mismatch_is_not_found() {
        let provider = MemoryProvider::new();
        let created = provider.create(ResourceKind::Bucket, &Properties::new()).await.unwrap();

        assert!(provider.get(ResourceKind::Policy, &created.remote_id).await.is_err());
        assert_eq!(provider.len(), 1);
    }
}
