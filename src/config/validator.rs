//! Configuration validation for stack files.
//!
//! This module validates a stack configuration before any graph building or
//! remote call, collecting every error and warning it finds.

use crate::error::{ConfigError, Result, StackError};
use std::collections::HashSet;
use tracing::debug;
use validator::Validate;

use super::refs::parse_references;
use super::spec::{ProviderKind, ResourceKind, ResourceSpec, StackConfig, StateBackend};

/// Region in which CDN certificates must live.
const CDN_CERTIFICATE_REGION: &str = "us-east-1";

/// Validator for stack configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a stack configuration.
    ///
    /// Duplicate ids, dangling references and cycles are left to the graph
    /// builder.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn validate(&self, config: &StackConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(StackError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Runs every check and returns the full result without failing.
    #[must_use]
    pub fn check(&self, config: &StackConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_stack(config, &mut result);
        Self::validate_state(config, &mut result);
        Self::validate_provider(config, &mut result);
        Self::validate_retry(config, &mut result);
        Self::validate_resources(&config.resources, &mut result);
        Self::validate_outputs(config, &mut result);

        result
    }

    fn validate_stack(config: &StackConfig, result: &mut ValidationResult) {
        let stack = &config.stack;
        if stack.name.is_empty() {
            result.push_error("stack.name", "Stack name cannot be empty");
        } else if !is_valid_name(&stack.name) {
            result.push_error(
                "stack.name",
                format!(
                    "Stack name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    stack.name
                ),
            );
        }

        if stack.environment.is_empty() {
            result.push_error("stack.environment", "Environment cannot be empty");
        }
    }

    fn validate_state(config: &StackConfig, result: &mut ValidationResult) {
        let state = &config.state;
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.push_error(
                        "state.bucket",
                        "S3 bucket name is required when using S3 backend",
                    );
                }
            }
            StateBackend::Local => {
                if state.bucket.is_some() {
                    result
                        .warnings
                        .push(String::from("state.bucket is ignored by the local backend"));
                }
            }
        }
    }

    fn validate_provider(config: &StackConfig, result: &mut ValidationResult) {
        let provider = &config.provider;
        if provider.kind == ProviderKind::Http
            && provider.endpoint.as_ref().is_none_or(String::is_empty)
        {
            result.push_error(
                "provider.endpoint",
                "An endpoint is required when using the http provider",
            );
        }

        if let Err(errors) = provider.validate() {
            for (field, _) in errors.field_errors() {
                result.push_error(
                    format!("provider.{field}"),
                    format!("provider.{field} is out of range or malformed"),
                );
            }
        }
    }

    fn validate_retry(config: &StackConfig, result: &mut ValidationResult) {
        let retry = &config.retry;
        if let Err(errors) = retry.validate() {
            for (field, _) in errors.field_errors() {
                result.push_error(
                    format!("retry.{field}"),
                    format!("retry.{field} is out of range"),
                );
            }
        }

        if retry.base_delay_ms > retry.max_delay_ms {
            result.push_error(
                "retry.base_delay_ms",
                format!(
                    "base_delay_ms ({}) must not exceed max_delay_ms ({})",
                    retry.base_delay_ms, retry.max_delay_ms
                ),
            );
        }
    }

    fn validate_resources(resources: &[ResourceSpec], result: &mut ValidationResult) {
        if resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources defined in configuration"));
            return;
        }

        for (i, resource) in resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if !is_valid_logical_id(&resource.logical_id) {
                result.push_error(
                    format!("{prefix}.id"),
                    format!(
                        "Logical id '{}' is invalid. Use letters, digits, '-' or '_'.",
                        resource.logical_id
                    ),
                );
            }

            for key in resource.kind.required_properties() {
                if !resource.properties.contains_key(*key) {
                    result.push_error(
                        format!("{prefix}.properties.{key}"),
                        format!(
                            "{} '{}' is missing required property '{key}'",
                            resource.kind, resource.logical_id
                        ),
                    );
                }
            }

            Self::check_kind_warnings(resource, result);
        }
    }

    fn check_kind_warnings(resource: &ResourceSpec, result: &mut ValidationResult) {
        match resource.kind {
            ResourceKind::Bucket => {
                let blocked = resource
                    .properties
                    .get("block_public_access")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if !blocked {
                    result.warnings.push(format!(
                        "Bucket '{}' does not block public access",
                        resource.logical_id
                    ));
                }
            }
            ResourceKind::Certificate => {
                if let Some(region) = resource.properties.get("region").and_then(|v| v.as_str())
                    && region != CDN_CERTIFICATE_REGION
                {
                    result.warnings.push(format!(
                        "Certificate '{}' is in {region}; CDN distributions only accept certificates from {CDN_CERTIFICATE_REGION}",
                        resource.logical_id
                    ));
                }
            }
            ResourceKind::Distribution
            | ResourceKind::DnsRecord
            | ResourceKind::Policy
            | ResourceKind::OriginAccessIdentity => {}
        }
    }

    fn validate_outputs(config: &StackConfig, result: &mut ValidationResult) {
        let known: HashSet<&str> = config
            .resources
            .iter()
            .map(|r| r.logical_id.as_str())
            .collect();

        for (name, value) in &config.outputs {
            let refs = parse_references(value);
            if refs.is_empty() {
                result.push_error(
                    format!("outputs.{name}"),
                    format!("Output '{name}' must contain a reference such as ${{resource.attribute}}"),
                );
            }
            for (_, reference) in refs {
                if !known.contains(reference.logical_id.as_str()) {
                    result.push_error(
                        format!("outputs.{name}"),
                        format!(
                            "Output '{name}' references unknown resource '{}'",
                            reference.logical_id
                        ),
                    );
                }
            }
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    let mut chars = name.chars();

    if let Some(first) = chars.next()
        && !first.is_ascii_lowercase()
    {
        return false;
    }

    for c in chars {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return false;
        }
    }

    if name.ends_with('-') {
        return false;
    }

    !name.contains("--")
}

/// Logical ids must be usable inside `${...}` references.
fn is_valid_logical_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl ValidationResult {
    /// Records an error against a field.
    pub fn push_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> StackConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("static-site"));
        assert!(is_valid_name("site-123"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Static-Site"));
        assert!(!is_valid_name("123-site"));
        assert!(!is_valid_name("static_site"));
        assert!(!is_valid_name("site-"));
        assert!(!is_valid_name("static--site"));
    }

    #[test]
    fn test_missing_required_property() {
        let config = parse(
            r"
stack:
  name: site
resources:
  - id: apex
    kind: dns_record
    properties:
      zone: example.com
      name: example.com
",
        );
        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "resources[0].properties.target");
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_s3_backend_requires_bucket() {
        let config = parse(
            r"
stack:
  name: site
state:
  backend: s3
",
        );
        let result = ConfigValidator::new().check(&config);
        assert!(result.errors.iter().any(|e| e.field == "state.bucket"));
    }

    #[test]
    fn test_http_provider_requires_endpoint() {
        let config = parse(
            r"
stack:
  name: site
provider:
  kind: http
",
        );
        let result = ConfigValidator::new().check(&config);
        assert!(result.errors.iter().any(|e| e.field == "provider.endpoint"));
    }

    #[test]
    fn test_retry_bounds() {
        let config = parse(
            r"
stack:
  name: site
retry:
  max_attempts: 50
  base_delay_ms: 5000
  max_delay_ms: 100
",
        );
        let result = ConfigValidator::new().check(&config);
        assert!(result.errors.iter().any(|e| e.field == "retry.max_attempts"));
        assert!(result.errors.iter().any(|e| e.field == "retry.base_delay_ms"));
    }

    #[test]
    fn test_output_unknown_resource() {
        let config = parse(
            r#"
stack:
  name: site
resources:
  - id: site-bucket
    kind: bucket
    properties:
      block_public_access: true
outputs:
  BucketName: "${site-bucket.name}"
  Missing: "${nope}"
"#,
        );
        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "outputs.Missing");
    }

    #[test]
    fn test_warnings() {
        let config = parse(
            r"
stack:
  name: site
resources:
  - id: open-bucket
    kind: bucket
  - id: cert
    kind: certificate
    properties:
      domain_name: example.com
      region: eu-west-1
",
        );
        let result = ConfigValidator::new().validate(&config).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 2);
    }
}
