// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # edgestack
//!
//! A declarative, idempotent reconciler for static-site hosting stacks:
//! object storage, CDN distribution, DNS records and TLS certificates.
//!
//! ## Overview
//!
//! You describe the stack once in `edgestack.yaml`; edgestack works out
//! what exists, what changed and in which order to touch things:
//!
//! - Resources reference each other with `${id}` and `${id.attribute}`
//! - References become dependency edges; cycles are rejected before any
//!   remote call
//! - Every step is recorded, so a failed run resumes where it stopped
//! - Transient provider errors are retried with exponential backoff
//!
//! ## Architecture
//!
//! 1. **Desired State**: the stack file, turned into a [`graph::ResourceGraph`]
//! 2. **Recorded State**: the snapshot kept by a [`state::StateStore`]
//! 3. **Plan**: the ordered diff computed by [`planner::DiffEngine`]
//! 4. **Execution**: [`planner::PlanExecutor`] drives a [`provider::ResourceProvider`]
//!
//! ## Modules
//!
//! - [`config`]: Stack file parsing, references and validation
//! - [`graph`]: Dependency graph and topological ordering
//! - [`state`]: State storage backends (local, S3) and the run lock
//! - [`provider`]: Provider adapters (http, memory)
//! - [`planner`]: Diff computation, retry and plan execution
//! - [`reconciler`]: Apply, destroy, drift and outputs
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! stack:
//!   name: example-site
//!   environment: prod
//!
//! resources:
//!   - id: bucket
//!     kind: bucket
//!     properties:
//!       bucket_name: example-site-assets
//!   - id: cdn
//!     kind: distribution
//!     properties:
//!       origin: "${bucket.regional_domain_name}"
//!
//! outputs:
//!   CloudFrontDomain: "https://${cdn.domain_name}"
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, StackConfig};
pub use error::{Result, StackError};
pub use graph::ResourceGraph;
pub use planner::{DiffEngine, Plan, PlanExecutor};
pub use provider::{HttpProvider, MemoryProvider, ResourceProvider};
pub use reconciler::{DriftReport, ReconciliationResult, Reconciler};
pub use state::{LocalStateStore, S3StateStore, StateSnapshot, StateStore};
