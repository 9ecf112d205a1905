//! Configuration parser for loading stack files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, Result, StackError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::StackConfig;

/// Environment variable holding the provider bearer token.
pub const PROVIDER_TOKEN_VAR: &str = "EDGESTACK_PROVIDER_TOKEN";

/// Configuration parser for loading stack configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(StackError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            StackError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<StackConfig> {
        debug!("Parsing YAML configuration");

        let config: StackConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            StackError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed stack '{}' with {} resources",
            config.stack.name,
            config.resources.len()
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `EDGESTACK_<SECTION>_<KEY>` (e.g., `EDGESTACK_STACK_NAME`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(config: &mut StackConfig) {
        if let Ok(name) = std::env::var("EDGESTACK_STACK_NAME") {
            debug!("Overriding stack.name from environment");
            config.stack.name = name;
        }

        if let Ok(env) = std::env::var("EDGESTACK_STACK_ENVIRONMENT") {
            debug!("Overriding stack.environment from environment");
            config.stack.environment = env;
        }

        if let Ok(bucket) = std::env::var("EDGESTACK_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }

        if let Ok(prefix) = std::env::var("EDGESTACK_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            config.state.prefix = Some(prefix);
        }

        if let Ok(endpoint) = std::env::var("EDGESTACK_PROVIDER_ENDPOINT") {
            debug!("Overriding provider.endpoint from environment");
            config.provider.endpoint = Some(endpoint);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                StackError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the provider bearer token from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not set.
    pub fn get_provider_token() -> Result<String> {
        std::env::var(PROVIDER_TOKEN_VAR).map_err(|_| {
            StackError::Config(ConfigError::MissingEnvVar {
                name: String::from(PROVIDER_TOKEN_VAR),
            })
        })
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "edgestack.yaml",
    "edgestack.yml",
    "stack.yaml",
    "stack.yml",
];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(StackError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::{ProviderKind, ResourceKind, StateBackend};

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
stack:
  name: test-site
";
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).unwrap();

        assert_eq!(config.stack.name, "test-site");
        assert_eq!(config.stack.environment, "dev");
        assert_eq!(config.state.backend, StateBackend::Local);
        assert_eq!(config.provider.kind, ProviderKind::Memory);
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
stack:
  name: marketing-site
  environment: prod
  region: us-east-1
  tags:
    team: web

state:
  backend: s3
  bucket: edgestack-state
  prefix: marketing/prod

provider:
  kind: http
  endpoint: https://control.example.net
  timeout_secs: 10

retry:
  max_attempts: 3
  base_delay_ms: 100

resources:
  - id: site-bucket
    kind: bucket
    properties:
      block_public_access: true
  - id: site-oai
    kind: origin_access_identity
  - id: site-cdn
    kind: distribution
    depends_on: [site-oai]
    properties:
      origin: "${site-bucket.regional_domain_name}"
  - id: apex
    kind: dns_record
    properties:
      zone: example.com
      name: example.com
      target: "${site-cdn.domain_name}"

outputs:
  DistributionId: "${site-cdn}"
"#;
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).unwrap();

        assert_eq!(config.full_name(), "marketing-site-prod");
        assert_eq!(config.state.bucket.as_deref(), Some("edgestack-state"));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(
            config.resource_ids(),
            vec!["site-bucket", "site-oai", "site-cdn", "apex"]
        );
        let cdn = config.resource("site-cdn").unwrap();
        assert_eq!(cdn.kind, ResourceKind::Distribution);
        assert!(cdn.depends_on.contains("site-oai"));
        assert_eq!(config.outputs.len(), 1);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let yaml = r"
stack:
  name: test-site
resources:
  - id: thing
    kind: load_balancer
";
        let err = ConfigParser::new().parse_yaml(yaml, None).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("edgestack.yaml"), "stack:\n  name: x\n").unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("edgestack.yaml"));
    }

    #[test]
    fn test_starter_template_is_valid() {
        let config = ConfigParser::new()
            .parse_yaml(include_str!("../../templates/edgestack.yaml"), None)
            .unwrap();
        let result = crate::config::ConfigValidator::new().check(&config);
        assert!(result.is_valid(), "{:?}", result.errors);

        let graph = crate::graph::ResourceGraph::build(&config.resources).unwrap();
        let order: Vec<&str> = graph
            .topological_order()
            .map(|r| r.logical_id.as_str())
            .collect();
        let pos = |id: &str| order.iter().position(|x| *x == id).unwrap();
        assert!(pos("bucket") < pos("bucket_policy"));
        assert!(pos("bucket_policy") < pos("cdn"));
        assert!(pos("cert") < pos("cdn"));
        assert!(pos("cdn") < pos("apex_record"));
        assert_eq!(config.outputs.len(), 4);
    }
}
