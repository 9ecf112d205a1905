//! Provider adapters.
//!
//! The reconciler never talks to a cloud API directly. Everything goes
//! through [`ResourceProvider`], which has two implementations:
//! - [`HttpProvider`]: a REST control plane reached with `reqwest`
//! - [`MemoryProvider`]: an in-process simulation for rehearsals and tests

mod http;
mod memory;
mod types;

use async_trait::async_trait;
use tracing::info;

use crate::config::{ConfigParser, Properties, ProviderConfig, ProviderKind, ResourceKind};
use crate::error::{ConfigError, ProviderResult, Result, StackError};

pub use http::HttpProvider;
pub use memory::MemoryProvider;
pub use types::{ProvisionedResource, RemoteResource, RemoteStatus};

/// Adapter boundary to the remote control plane.
///
/// Every error is classified transient or permanent through
/// [`crate::error::ProviderError::is_transient`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Creates a resource with fully resolved properties.
    async fn create(
        &self,
        kind: ResourceKind,
        properties: &Properties,
    ) -> ProviderResult<ProvisionedResource>;

    /// Updates an existing resource in place.
    async fn update(
        &self,
        kind: ResourceKind,
        remote_id: &str,
        properties: &Properties,
    ) -> ProviderResult<ProvisionedResource>;

    /// Deletes a resource.
    async fn delete(&self, kind: ResourceKind, remote_id: &str) -> ProviderResult<()>;

    /// Reads the current remote view of a resource.
    async fn get(&self, kind: ResourceKind, remote_id: &str) -> ProviderResult<RemoteResource>;

    /// Adapter name for logs and output.
    fn name(&self) -> &'static str;
}

/// Builds the provider adapter selected in the stack file.
///
/// # Errors
///
/// Returns an error if the http adapter has no endpoint, no token in the
/// environment, or its client cannot be built.
pub fn build_provider(config: &ProviderConfig) -> Result<Box<dyn ResourceProvider>> {
    match config.kind {
        ProviderKind::Memory => {
            info!("Using in-memory provider");
            Ok(Box::new(MemoryProvider::new()))
        }
        ProviderKind::Http => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                StackError::Config(ConfigError::validation(
                    "An endpoint is required when using the http provider",
                    "provider.endpoint",
                ))
            })?;
            let token = ConfigParser::get_provider_token()?;
            info!("Using http provider at {endpoint}");
            Ok(Box::new(HttpProvider::new(endpoint, Some(token), config.timeout_secs)?))
        }
    }
}
