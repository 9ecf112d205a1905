//! Planning and execution.
//!
//! The diff engine compares the resource graph with recorded state and
//! produces an ordered plan; the executor applies it through a provider,
//! retrying transient errors and recording every step.

mod diff;
mod executor;
mod plan;
mod retry;

pub use diff::DiffEngine;
pub use executor::{ActionResult, CancelFlag, ExecutionFailure, ExecutionResult, PlanExecutor};
pub use plan::{Action, ActionType, Plan};
pub use retry::{RetryFailure, RetryPolicy};
