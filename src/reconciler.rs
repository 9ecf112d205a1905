//! Reconciler for converging a stack.
//!
//! This module ties the pieces together: it builds the resource graph,
//! loads recorded state under the run lock, computes a plan, asks for
//! approval, executes it and saves the final snapshot. The lock is always
//! released, whatever the outcome.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{ConfigHasher, Reference, ResourceKind, StackConfig, refs};
use crate::error::{ProviderError, Result, StackError};
use crate::graph::ResourceGraph;
use crate::planner::{ActionType, CancelFlag, DiffEngine, ExecutionResult, Plan, PlanExecutor, RetryPolicy};
use crate::provider::ResourceProvider;
use crate::state::{
    HistoryEntry, Operation, ResourceStatus, StateSnapshot, StateStore, generate_holder_id,
};

/// Reconciler for a single stack.
pub struct Reconciler<'a, S: StateStore> {
    /// Stack configuration.
    config: &'a StackConfig,
    /// State store.
    state_store: &'a S,
    /// Provider adapter, absent for read-only use.
    provider: Option<&'a dyn ResourceProvider>,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// Diff engine.
    diff_engine: DiffEngine,
    /// Cancellation flag for running plans.
    cancel: Option<CancelFlag>,
    /// Lock holder identifier.
    holder: String,
}

/// Result of an apply or destroy run.
#[derive(Debug, Serialize)]
pub struct ReconciliationResult {
    /// Operation performed.
    pub operation: Operation,
    /// Whether every planned change was applied.
    pub success: bool,
    /// Whether the plan was approved. A declined plan changes nothing.
    pub approved: bool,
    /// Whether the run stopped on a cancellation request.
    pub cancelled: bool,
    /// Number of resources created.
    pub created: usize,
    /// Number of resources updated.
    pub updated: usize,
    /// Number of resources deleted.
    pub deleted: usize,
    /// Number of resources unchanged.
    pub unchanged: usize,
    /// Number of changes not attempted.
    pub skipped: usize,
    /// Errors encountered.
    pub errors: Vec<String>,
    /// Final state after reconciliation.
    #[serde(skip)]
    pub final_state: Option<StateSnapshot>,
}

/// Report of drift detection.
#[derive(Debug, Serialize)]
pub struct DriftReport {
    /// Whether drift was detected.
    pub has_drift: bool,
    /// Resources whose remote view differs from recorded state.
    pub drifted: Vec<DriftedResource>,
    /// Number of recorded resources checked.
    pub checked: usize,
    /// Changes the stack file would cause on the next apply.
    pub pending_changes: usize,
}

/// A resource that drifted.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DriftedResource {
    /// Logical id.
    pub logical_id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Recorded remote id.
    pub remote_id: String,
    /// What drifted.
    pub drift: Drift,
}

/// Kind of drift.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Drift {
    /// The provider no longer knows the resource.
    Missing,
    /// Properties differ from what was last applied.
    Modified {
        /// Property keys that differ.
        keys: Vec<String>,
    },
}

/// A stack output resolved against recorded state.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StackOutput {
    /// Output name.
    pub name: String,
    /// Reference expression from the stack file.
    pub expression: String,
    /// Resolved value, if every reference is recorded.
    pub value: Option<Value>,
}

impl<'a, S: StateStore> Reconciler<'a, S> {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(config: &'a StackConfig, state_store: &'a S, provider: &'a dyn ResourceProvider) -> Self {
        Self {
            provider: Some(provider),
            ..Self::read_only(config, state_store)
        }
    }

    /// Creates a reconciler that can plan and resolve outputs but never
    /// talks to a provider.
    #[must_use]
    pub fn read_only(config: &'a StackConfig, state_store: &'a S) -> Self {
        Self {
            config,
            state_store,
            provider: None,
            hasher: ConfigHasher::new(),
            diff_engine: DiffEngine::new(),
            cancel: None,
            holder: generate_holder_id(),
        }
    }

    /// Sets the cancellation flag checked between actions.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Builds and validates the resource graph.
    ///
    /// # Errors
    ///
    /// Returns a graph error for duplicate ids, dangling references or cycles.
    pub fn graph(&self) -> Result<ResourceGraph> {
        Ok(ResourceGraph::build(&self.config.resources)?)
    }

    /// Computes the apply plan without changing anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid or state cannot be loaded.
    pub async fn plan(&self) -> Result<Plan> {
        let graph = self.graph()?;
        let snapshot = self.load_bound().await?;
        self.diff_engine
            .compute(&graph, &snapshot, &self.hasher.hash_config(self.config))
    }

    /// Computes the destroy plan without changing anything.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be loaded.
    pub async fn plan_destroy(&self) -> Result<Plan> {
        let snapshot = self.load_bound().await?;
        self.diff_engine.compute(&ResourceGraph::empty(), &snapshot, "")
    }

    /// Converges remote resources to the stack file.
    ///
    /// `approve` sees the plan before anything runs; returning false leaves
    /// everything untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid, the lock is held, or state
    /// cannot be loaded or saved. A failed action is reported in the result.
    pub async fn apply<F>(&self, approve: F) -> Result<ReconciliationResult>
    where
        F: FnOnce(&Plan) -> bool + Send,
    {
        info!(
            "Applying stack {}/{}",
            self.config.stack.name, self.config.stack.environment
        );
        let graph = self.graph()?;
        self.provider()?;
        self.run_locked(Operation::Apply, &graph, approve).await
    }

    /// Deletes every recorded resource, dependents first.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held or state cannot be loaded or saved.
    pub async fn destroy<F>(&self, approve: F) -> Result<ReconciliationResult>
    where
        F: FnOnce(&Plan) -> bool + Send,
    {
        info!(
            "Destroying stack {}/{}",
            self.config.stack.name, self.config.stack.environment
        );
        self.provider()?;
        self.run_locked(Operation::Destroy, &ResourceGraph::empty(), approve)
            .await
    }

    async fn run_locked<F>(
        &self,
        operation: Operation,
        graph: &ResourceGraph,
        approve: F,
    ) -> Result<ReconciliationResult>
    where
        F: FnOnce(&Plan) -> bool + Send,
    {
        let lock = self.state_store.acquire_lock(&self.holder).await?;
        debug!("Acquired state lock {}", lock.lock_id);

        let outcome = self.run(operation, graph, &lock.lock_id, approve).await;

        if let Err(e) = self.state_store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock {}: {e}", lock.lock_id);
        }

        outcome
    }

    async fn run<F>(
        &self,
        operation: Operation,
        graph: &ResourceGraph,
        lock_id: &str,
        approve: F,
    ) -> Result<ReconciliationResult>
    where
        F: FnOnce(&Plan) -> bool + Send,
    {
        let mut snapshot = self.load_bound().await?;
        let config_hash = match operation {
            Operation::Apply => self.hasher.hash_config(self.config),
            Operation::Destroy => String::new(),
        };

        let plan = self.diff_engine.compute(graph, &snapshot, &config_hash)?;
        info!(
            "Plan: {} to create, {} to update, {} to delete, {} unchanged",
            plan.create_count(),
            plan.update_count(),
            plan.delete_count(),
            plan.noop_count()
        );

        if plan.is_converged() {
            info!("No changes required - stack is converged");
            if refresh_dependencies(graph, &mut snapshot) {
                self.state_store.save(&snapshot).await?;
            }
            return Ok(ReconciliationResult::converged(operation, &plan, snapshot));
        }

        if !approve(&plan) {
            info!("Plan was not approved, nothing changed");
            return Ok(ReconciliationResult::declined(operation, &plan));
        }

        // Stamp the stack name before incremental records land.
        self.state_store.save(&snapshot).await?;

        let mut executor = PlanExecutor::new(self.provider()?, self.state_store)
            .with_config(&self.config.retry)
            .with_lock(lock_id);
        if let Some(cancel) = &self.cancel {
            executor = executor.with_cancel_flag(cancel.clone());
        }
        let execution = executor.execute(&plan, &mut snapshot).await?;

        let history = if execution.success() {
            refresh_dependencies(graph, &mut snapshot);
            snapshot.config_hash = config_hash;
            HistoryEntry::new(operation, &snapshot.config_hash, execution.changed_ids())
        } else {
            let reason = execution.failure.as_ref().map_or_else(
                || String::from("cancelled"),
                |f| format!("{} '{}' failed: {}", f.action_type, f.logical_id, f.error),
            );
            HistoryEntry::failed(operation, &plan.config_hash, execution.changed_ids(), &reason)
        };
        snapshot.add_history(history);
        self.state_store.save(&snapshot).await?;

        Ok(ReconciliationResult::from_execution(operation, &plan, &execution, snapshot))
    }

    fn provider(&self) -> Result<&'a dyn ResourceProvider> {
        self.provider.ok_or_else(|| {
            StackError::internal("this operation needs a provider; the reconciler is read-only")
        })
    }

    /// Loads the snapshot and checks it belongs to this stack.
    async fn load_bound(&self) -> Result<StateSnapshot> {
        let mut snapshot = self.state_store.load().await?;
        snapshot.bind(&self.config.stack.name, &self.config.stack.environment)?;
        Ok(snapshot)
    }

    /// Compares the provider's view of every recorded resource with the
    /// properties last applied.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be loaded or the provider fails with
    /// anything other than "not found".
    pub async fn check_drift(&self) -> Result<DriftReport> {
        info!(
            "Checking for drift in {}/{}",
            self.config.stack.name, self.config.stack.environment
        );

        let provider = self.provider()?;
        let snapshot = self.load_bound().await?;
        let retry = RetryPolicy::from_config(&self.config.retry);
        let mut drifted = Vec::new();
        let mut checked = 0;

        for state in snapshot.resources.values() {
            let Some(remote_id) = state.remote_id.as_deref() else {
                continue;
            };
            checked += 1;

            let remote = retry
                .run(&state.logical_id, || provider.get(state.kind, remote_id))
                .await;
            let drift = match remote {
                Err(f) if matches!(f.error, ProviderError::NotFound { .. }) => Some(Drift::Missing),
                Err(f) => return Err(f.into_error("read", state.kind.as_str(), &state.logical_id)),
                Ok(remote) => {
                    let expected = refs::substitute(&state.properties, &|r: &Reference| snapshot.resolve(r))
                        .unwrap_or_else(|_| state.properties.clone());
                    let keys: Vec<String> = expected
                        .iter()
                        .filter(|(key, value)| remote.properties.get(*key) != Some(*value))
                        .map(|(key, _)| key.clone())
                        .collect();
                    (!keys.is_empty()).then_some(Drift::Modified { keys })
                }
            };

            if let Some(drift) = drift {
                debug!("'{}' drifted: {drift:?}", state.logical_id);
                drifted.push(DriftedResource {
                    logical_id: state.logical_id.clone(),
                    kind: state.kind,
                    remote_id: remote_id.to_string(),
                    drift,
                });
            }
        }

        let graph = self.graph()?;
        let pending_changes = self
            .diff_engine
            .compute(&graph, &snapshot, "")?
            .changes()
            .count();

        Ok(DriftReport {
            has_drift: !drifted.is_empty(),
            drifted,
            checked,
            pending_changes,
        })
    }

    /// Resolves the stack outputs against recorded state.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be loaded.
    pub async fn outputs(&self) -> Result<Vec<StackOutput>> {
        let snapshot = self.load_bound().await?;

        Ok(self
            .config
            .outputs
            .iter()
            .map(|(name, expression)| StackOutput {
                name: name.clone(),
                expression: expression.clone(),
                value: refs::substitute_value(&Value::String(expression.clone()), &|r: &Reference| {
                    snapshot.resolve(r)
                })
                .ok(),
            })
            .collect())
    }
}

/// Records the current graph dependencies on settled entries. Returns true if
/// anything changed.
fn refresh_dependencies(graph: &ResourceGraph, snapshot: &mut StateSnapshot) -> bool {
    let mut changed = false;
    for resource in graph.resources() {
        let Some(state) = snapshot.resources.get_mut(&resource.logical_id) else {
            continue;
        };
        let deps = graph
            .dependencies_of(&resource.logical_id)
            .into_iter()
            .map(str::to_string)
            .collect();
        if state.depends_on != deps {
            state.depends_on = deps;
            changed = true;
        }
    }
    changed
}

impl ReconciliationResult {
    fn empty(operation: Operation, plan: &Plan) -> Self {
        Self {
            operation,
            success: true,
            approved: true,
            cancelled: false,
            created: 0,
            updated: 0,
            deleted: 0,
            unchanged: plan.noop_count(),
            skipped: 0,
            errors: vec![],
            final_state: None,
        }
    }

    fn converged(operation: Operation, plan: &Plan, snapshot: StateSnapshot) -> Self {
        Self {
            final_state: Some(snapshot),
            ..Self::empty(operation, plan)
        }
    }

    fn declined(operation: Operation, plan: &Plan) -> Self {
        Self {
            approved: false,
            skipped: plan.changes().count(),
            ..Self::empty(operation, plan)
        }
    }

    fn from_execution(
        operation: Operation,
        plan: &Plan,
        execution: &ExecutionResult,
        snapshot: StateSnapshot,
    ) -> Self {
        let applied = |action_type: ActionType| {
            execution
                .results
                .iter()
                .filter(|r| r.success && r.action_type == action_type)
                .count()
        };

        let mut errors = Vec::new();
        if let Some(failure) = &execution.failure {
            errors.push(format!(
                "Failed to {} '{}': {}",
                failure.action_type, failure.logical_id, failure.error
            ));
        }
        if execution.cancelled {
            errors.push(format!("Cancelled with {} changes not applied", execution.skipped));
        }

        Self {
            operation,
            success: execution.success(),
            approved: true,
            cancelled: execution.cancelled,
            created: applied(ActionType::Create),
            updated: applied(ActionType::Update),
            deleted: applied(ActionType::Delete),
            unchanged: plan.noop_count(),
            skipped: execution.skipped,
            errors,
            final_state: Some(snapshot),
        }
    }

    /// Returns true if the run left unsettled resources behind.
    #[must_use]
    pub fn has_unsettled(&self) -> bool {
        self.final_state.as_ref().is_some_and(|s| {
            s.resources
                .values()
                .any(|r| matches!(r.status, ResourceStatus::Failed | ResourceStatus::Pending))
        })
    }
}

impl DriftReport {
    /// Returns true if nothing drifted and no change is pending.
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        !self.has_drift && self.pending_changes == 0
    }
}

impl std::fmt::Display for Drift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "missing remotely"),
            Self::Modified { keys } => write!(f, "modified: {}", keys.join(", ")),
        }
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_drift {
            writeln!(f, "Drift detected:")?;
            for resource in &self.drifted {
                writeln!(
                    f,
                    "  - {} {} ({}): {}",
                    resource.kind, resource.logical_id, resource.remote_id, resource.drift
                )?;
            }
        } else {
            writeln!(f, "No drift detected in {} resources", self.checked)?;
        }
        if self.pending_changes > 0 {
            write!(f, "{} changes pending from the stack file", self.pending_changes)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if !self.approved {
            "not approved"
        } else if self.success {
            "successful"
        } else if self.cancelled {
            "cancelled"
        } else {
            "failed"
        };
        writeln!(f, "{} {status}:", capitalized(self.operation))?;
        writeln!(f, "  Created: {}", self.created)?;
        writeln!(f, "  Updated: {}", self.updated)?;
        writeln!(f, "  Deleted: {}", self.deleted)?;
        writeln!(f, "  Unchanged: {}", self.unchanged)?;
        if self.skipped > 0 {
            writeln!(f, "  Skipped: {}", self.skipped)?;
        }

        if !self.errors.is_empty() {
            writeln!(f, "  Errors:")?;
            for error in &self.errors {
                writeln!(f, "    - {error}")?;
            }
        }

        Ok(())
    }
}

const fn capitalized(operation: Operation) -> &'static str {
    match operation {
        Operation::Apply => "Apply",
        Operation::Destroy => "Destroy",
    }
}
