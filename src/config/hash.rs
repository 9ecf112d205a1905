//! Configuration hashing for change detection.
//!
//! This module provides deterministic hashing of declared resources so the
//! diff engine can tell whether a resource changed between runs.

use sha2::{Digest, Sha256};

use super::spec::{Properties, ResourceKind, ResourceSpec, StackConfig};

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire stack configuration.
    ///
    /// This hash changes when any resource or output changes.
    #[must_use]
    pub fn hash_config(&self, config: &StackConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.stack.name.as_bytes());
        hasher.update(config.stack.environment.as_bytes());
        if let Some(region) = &config.stack.region {
            hasher.update(region.as_bytes());
        }

        for resource in &config.resources {
            hasher.update(resource.logical_id.as_bytes());
            hasher.update(self.hash_resource(resource).as_bytes());
            for dep in &resource.depends_on {
                hasher.update(dep.as_bytes());
            }
        }

        for (name, value) in &config.outputs {
            hasher.update(name.as_bytes());
            hasher.update(value.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes the properties hash of a single resource.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceSpec) -> String {
        self.hash_properties(resource.kind, &resource.properties)
    }

    /// Hashes a kind and its declared properties.
    ///
    /// Properties are hashed unresolved, as canonical JSON with sorted keys,
    /// so the hash does not depend on remote ids assigned by the provider.
    #[must_use]
    pub fn hash_properties(&self, kind: ResourceKind, properties: &Properties) -> String {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0u8]);
        // serde_json objects are BTreeMap-backed, so nested keys serialize sorted.
        let canonical = serde_json::to_string(properties).unwrap_or_default();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
