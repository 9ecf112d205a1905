//! Configuration module for the edgestack reconciler.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `edgestack.yaml`
//! - Validation of configuration values
//! - `${...}` references between resources
//! - Computing property hashes for change detection

mod spec;
mod parser;
mod validator;
mod hash;
pub mod refs;

pub use spec::{
    Outputs, Properties, ProviderConfig, ProviderKind, ResourceKind, ResourceSpec, RetryConfig,
    StackConfig, StackMeta, StateBackend, StateConfig,
};
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, PROVIDER_TOKEN_VAR, find_config_file};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use hash::ConfigHasher;
pub use refs::Reference;
