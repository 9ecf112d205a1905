//! Configuration types for the stack file.
//!
//! This module defines all the structs that map to `edgestack.yaml`.
//! These types are declarative and fully describe the desired state.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use validator::Validate;

/// Free-form resource properties, as declared in the stack file.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Attributes a provider reports for a resource (domain names, ARNs, ...).
pub type Outputs = BTreeMap<String, serde_json::Value>;

/// The root configuration structure for a stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Stack-level metadata.
    pub stack: StackMeta,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Provider adapter configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Retry and readiness polling settings.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Resources in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
    /// Named stack outputs, each a reference string such as `${site.domain_name}`.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

/// Stack-level metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackMeta {
    /// Unique name for the stack.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Default region for regional resources.
    #[serde(default)]
    pub region: Option<String>,
    /// Tags forwarded to the provider for every resource.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// State backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Provider adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ProviderConfig {
    /// Which adapter to use.
    #[serde(default)]
    pub kind: ProviderKind,
    /// Base URL of the control-plane API (http adapter only).
    #[serde(default)]
    #[validate(url)]
    pub endpoint: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    #[validate(range(min = 1, max = 600))]
    pub timeout_secs: u64,
}

/// Provider adapter kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Remote control plane reached over HTTP.
    Http,
    /// In-process simulation.
    #[default]
    Memory,
}

/// Retry and readiness polling settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct RetryConfig {
    /// Maximum attempts per provider call, first attempt included.
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 20))]
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    #[validate(range(min = 1))]
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    #[validate(range(min = 1))]
    pub max_delay_ms: u64,
    /// Interval between readiness polls in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    #[validate(range(min = 1))]
    pub poll_interval_ms: u64,
    /// Give up waiting for readiness after this many seconds.
    #[serde(default = "default_poll_timeout_secs")]
    #[validate(range(min = 1))]
    pub poll_timeout_secs: u64,
}

/// A single declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceSpec {
    /// Logical id, unique within the stack.
    #[serde(rename = "id")]
    pub logical_id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Declared properties, possibly containing `${...}` references.
    #[serde(default)]
    pub properties: Properties,
    /// Explicit dependencies by logical id.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
}

/// Resource kinds understood by the reconciler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Object storage bucket holding the site content.
    Bucket,
    /// CDN distribution in front of the bucket.
    Distribution,
    /// Managed TLS certificate.
    Certificate,
    /// DNS record pointing at the distribution.
    DnsRecord,
    /// Access policy attached to a bucket.
    Policy,
    /// Identity the CDN uses to read from a private bucket.
    OriginAccessIdentity,
}

fn default_environment() -> String {
    String::from("dev")
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_base_delay_ms() -> u64 {
    500
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

const fn default_poll_interval_ms() -> u64 {
    5_000
}

const fn default_poll_timeout_secs() -> u64 {
    1_800
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            endpoint: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

impl StackConfig {
    /// Returns the full stack name including the environment.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}-{}", self.stack.name, self.stack.environment)
    }

    /// Returns resource logical ids in declaration order.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.logical_id.as_str()).collect()
    }

    /// Finds a resource by logical id.
    #[must_use]
    pub fn resource(&self, logical_id: &str) -> Option<&ResourceSpec> {
        self.resources.iter().find(|r| r.logical_id == logical_id)
    }
}

impl ResourceSpec {
    /// Creates a resource with no properties or dependencies.
    #[must_use]
    pub fn new(logical_id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            logical_id: logical_id.into(),
            kind,
            properties: Properties::new(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Adds an explicit dependency.
    #[must_use]
    pub fn with_dependency(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.insert(logical_id.into());
        self
    }
}

impl ResourceKind {
    /// All kinds, in a fixed order.
    pub const ALL: [Self; 6] = [
        Self::Bucket,
        Self::Distribution,
        Self::Certificate,
        Self::DnsRecord,
        Self::Policy,
        Self::OriginAccessIdentity,
    ];

    /// Properties that must be present for this kind.
    #[must_use]
    pub const fn required_properties(self) -> &'static [&'static str] {
        match self {
            Self::Bucket | Self::OriginAccessIdentity => &[],
            Self::Distribution => &["origin"],
            Self::Certificate => &["domain_name"],
            Self::DnsRecord => &["zone", "name", "target"],
            Self::Policy => &["bucket", "statements"],
        }
    }

    /// Path segment used by the HTTP control plane.
    #[must_use]
    pub const fn api_path(self) -> &'static str {
        match self {
            Self::Bucket => "buckets",
            Self::Distribution => "distributions",
            Self::Certificate => "certificates",
            Self::DnsRecord => "dns-records",
            Self::Policy => "policies",
            Self::OriginAccessIdentity => "origin-access-identities",
        }
    }

    /// Snake-case name as written in the stack file.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bucket => "bucket",
            Self::Distribution => "distribution",
            Self::Certificate => "certificate",
            Self::DnsRecord => "dns_record",
            Self::Policy => "policy",
            Self::OriginAccessIdentity => "origin_access_identity",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serde_names() {
        for kind in ResourceKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_retry_defaults_validate() {
        let retry = RetryConfig::default();
        assert!(retry.validate().is_ok());
        assert_eq!(retry.max_attempts, 5);
    }

    #[test]
    fn test_retry_out_of_range() {
        let retry = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        assert!(retry.validate().is_err());
    }

    #[test]
    fn test_provider_endpoint_must_be_url() {
        let provider = ProviderConfig {
            kind: ProviderKind::Http,
            endpoint: Some(String::from("not a url")),
            timeout_secs: 30,
        };
        assert!(provider.validate().is_err());
    }
}
