//! Plan executor for applying plans.
//!
//! Actions run one at a time in plan order. Every finished action is
//! recorded in the state store before the next one starts, so an
//! interrupted run leaves state that the next run can pick up from. The
//! first failed action halts the run.
//!
//! When given the run lock, the executor renews it before every action and
//! between readiness polls so a long run never outlives its lease.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigHasher, Outputs, Properties, Reference, RetryConfig, refs};
use crate::error::{PlanError, ProviderError, ReconcileError, Result, StackError, StateError};
use crate::provider::{RemoteResource, RemoteStatus, ResourceProvider};
use crate::state::{ResourceState, ResourceStatus, StateSnapshot, StateStore};

use super::plan::{Action, ActionType, Plan};
use super::retry::RetryPolicy;

/// Default interval between readiness polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default readiness timeout.
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1800);

/// Shared flag asking a running plan to stop before its next action.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Executor for plans.
pub struct PlanExecutor<'a> {
    /// Provider adapter.
    provider: &'a dyn ResourceProvider,
    /// State store receiving per-action records.
    store: &'a dyn StateStore,
    /// Retry policy for provider calls.
    retry: RetryPolicy,
    /// Interval between readiness polls.
    poll_interval: Duration,
    /// How long to wait for readiness.
    poll_timeout: Duration,
    /// Cancellation flag.
    cancel: Option<CancelFlag>,
    /// Run lock renewed while the plan executes.
    lock_id: Option<String>,
}

/// Result of executing a single action.
#[derive(Debug, Clone)]
pub struct ActionResult {
    /// Position in the plan.
    pub index: usize,
    /// Logical id of the resource.
    pub logical_id: String,
    /// Action that was executed.
    pub action_type: ActionType,
    /// Whether the action succeeded.
    pub success: bool,
    /// Remote id after the action, if known.
    pub remote_id: Option<String>,
    /// Error message (if failed).
    pub error: Option<String>,
}

/// The action that halted a run.
#[derive(Debug)]
pub struct ExecutionFailure {
    /// Logical id of the resource.
    pub logical_id: String,
    /// Action that failed.
    pub action_type: ActionType,
    /// Underlying error.
    pub error: StackError,
}

/// Result of executing a plan.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    /// Results of the actions that ran, in order.
    pub results: Vec<ActionResult>,
    /// Number of successful actions.
    pub successful: usize,
    /// Number of no-op actions.
    pub unchanged: usize,
    /// Number of changes never attempted.
    pub skipped: usize,
    /// The failure that halted the run, if any.
    pub failure: Option<ExecutionFailure>,
    /// Whether the run stopped on a cancellation request.
    pub cancelled: bool,
}

/// A failed action along with the remote id it left behind.
struct ActionFailure {
    error: StackError,
    remote_id: Option<String>,
}

impl ActionFailure {
    fn new(error: impl Into<StackError>, remote_id: Option<String>) -> Self {
        Self {
            error: error.into(),
            remote_id,
        }
    }
}

impl<'a> PlanExecutor<'a> {
    /// Creates a new plan executor with the default retry policy.
    #[must_use]
    pub fn new(provider: &'a dyn ResourceProvider, store: &'a dyn StateStore) -> Self {
        Self {
            provider,
            store,
            retry: RetryPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            cancel: None,
            lock_id: None,
        }
    }

    /// Applies the `retry` section of the stack file.
    #[must_use]
    pub const fn with_config(mut self, config: &RetryConfig) -> Self {
        self.retry = RetryPolicy::from_config(config);
        self.poll_interval = Duration::from_millis(config.poll_interval_ms);
        self.poll_timeout = Duration::from_secs(config.poll_timeout_secs);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets readiness polling.
    #[must_use]
    pub const fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_timeout = timeout;
        self
    }

    /// Sets the cancellation flag checked before each action.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Sets the run lock to renew as actions complete.
    #[must_use]
    pub fn with_lock(mut self, lock_id: impl Into<String>) -> Self {
        self.lock_id = Some(lock_id.into());
        self
    }

    /// Extends the run lock, if one was given.
    async fn keep_lock(&self) -> Result<()> {
        if let Some(lock_id) = &self.lock_id {
            let lock = self.store.refresh_lock(lock_id).await?;
            debug!("Renewed state lock {lock_id} until {}", lock.expires_at);
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled)
    }

    /// Executes a plan, updating `snapshot` and the store as it goes.
    ///
    /// A failed action is recorded as failed and halts the run; it is
    /// reported in [`ExecutionResult::failure`], not as an `Err`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state store cannot record an action.
    pub async fn execute(&self, plan: &Plan, snapshot: &mut StateSnapshot) -> Result<ExecutionResult> {
        let changes = plan.changes().count();
        info!("Executing plan with {changes} changes");

        let mut result = ExecutionResult::default();

        for (index, action) in plan.actions.iter().enumerate() {
            if action.action_type == ActionType::NoOp {
                result.unchanged += 1;
                continue;
            }
            if self.is_cancelled() {
                warn!("Cancellation requested, stopping before '{}'", action.logical_id());
                result.cancelled = true;
                break;
            }

            self.keep_lock().await?;
            info!("{}", action.description());
            match self.execute_action(action, snapshot).await {
                Ok(state) => {
                    let remote_id = state.remote_id.clone();
                    self.persist(state, snapshot).await?;
                    result.successful += 1;
                    result.results.push(ActionResult {
                        index,
                        logical_id: action.logical_id().to_string(),
                        action_type: action.action_type,
                        success: true,
                        remote_id,
                        error: None,
                    });
                }
                Err(failure) if matches!(failure.error, StackError::State(StateError::LockLost { .. })) => {
                    error!("Stopping before recording '{}': {}", action.logical_id(), failure.error);
                    return Err(failure.error);
                }
                Err(failure) => {
                    error!("Failed to {} '{}': {}", action.action_type, action.logical_id(), failure.error);
                    let state = failed_state(action, failure.remote_id.clone());
                    self.persist(state, snapshot).await?;
                    result.results.push(ActionResult {
                        index,
                        logical_id: action.logical_id().to_string(),
                        action_type: action.action_type,
                        success: false,
                        remote_id: failure.remote_id,
                        error: Some(failure.error.to_string()),
                    });
                    result.failure = Some(ExecutionFailure {
                        logical_id: action.logical_id().to_string(),
                        action_type: action.action_type,
                        error: failure.error,
                    });
                    break;
                }
            }
        }

        result.skipped = changes - result.results.len();
        info!("{result}");
        Ok(result)
    }

    /// Records a state in memory and in the store.
    async fn persist(&self, state: ResourceState, snapshot: &mut StateSnapshot) -> Result<()> {
        snapshot.record(state.clone());
        self.store.record(state).await
    }

    async fn execute_action(
        &self,
        action: &Action,
        snapshot: &mut StateSnapshot,
    ) -> std::result::Result<ResourceState, ActionFailure> {
        match action.action_type {
            ActionType::Create | ActionType::Update => self.execute_apply(action, snapshot).await,
            ActionType::Delete => self.execute_delete(action).await,
            ActionType::NoOp => Err(ActionFailure::new(
                PlanError::InvalidAction {
                    logical_id: action.logical_id().to_string(),
                    message: String::from("no-op actions are not executed"),
                },
                None,
            )),
        }
    }

    /// Executes a create or update.
    async fn execute_apply(
        &self,
        action: &Action,
        snapshot: &mut StateSnapshot,
    ) -> std::result::Result<ResourceState, ActionFailure> {
        let kind = action.resource.kind;
        let logical_id = action.logical_id();
        let prior_remote_id = action.prior_remote_id().map(str::to_string);
        let properties = resolve_properties(action, snapshot)
            .map_err(|e| ActionFailure::new(e, prior_remote_id.clone()))?;
        let applied_hash = ConfigHasher::new().hash_properties(kind, &properties);

        let (verb, settled) = if action.action_type == ActionType::Create {
            ("create", ResourceStatus::Created)
        } else {
            ("update", ResourceStatus::Updated)
        };

        let response = match (action.action_type, prior_remote_id.as_deref()) {
            (ActionType::Create, _) => {
                self.retry
                    .run(logical_id, || self.provider.create(kind, &properties))
                    .await
            }
            (_, Some(remote_id)) => {
                self.retry
                    .run(logical_id, || self.provider.update(kind, remote_id, &properties))
                    .await
            }
            (_, None) => {
                return Err(ActionFailure::new(
                    PlanError::InvalidAction {
                        logical_id: logical_id.to_string(),
                        message: String::from("update without a recorded remote id"),
                    },
                    None,
                ));
            }
        };
        let provisioned = response.map_err(|f| {
            ActionFailure::new(f.into_error(verb, kind.as_str(), logical_id), prior_remote_id.clone())
        })?;

        let remote_id = provisioned.remote_id;
        let mut outputs = provisioned.outputs;
        debug!("Provider accepted {verb} of '{logical_id}' as {remote_id} ({})", provisioned.status);

        match provisioned.status {
            RemoteStatus::Ready => {}
            RemoteStatus::Failed => {
                return Err(ActionFailure::new(
                    ReconcileError::ResourceFailed {
                        action: verb.to_string(),
                        kind: kind.to_string(),
                        logical_id: logical_id.to_string(),
                        source: ProviderError::OperationFailed {
                            remote_id: remote_id.clone(),
                            message: String::from("provider rejected the change"),
                        },
                    },
                    Some(remote_id),
                ));
            }
            RemoteStatus::InProgress => {
                let pending = applied_state(
                    action,
                    &remote_id,
                    &applied_hash,
                    outputs.clone(),
                    ResourceStatus::Pending,
                );
                self.persist(pending, snapshot)
                    .await
                    .map_err(|e| ActionFailure::new(e, Some(remote_id.clone())))?;

                let remote = self
                    .wait_until_ready(action, &remote_id)
                    .await
                    .map_err(|e| ActionFailure::new(e, Some(remote_id.clone())))?;
                outputs.extend(remote.outputs);
            }
        }

        info!("{} {kind} '{logical_id}' ({remote_id})", capitalize(verb));
        Ok(applied_state(action, &remote_id, &applied_hash, outputs, settled))
    }

    /// Executes a delete. A resource that is already gone counts as deleted.
    async fn execute_delete(&self, action: &Action) -> std::result::Result<ResourceState, ActionFailure> {
        let kind = action.resource.kind;
        let logical_id = action.logical_id();
        let deleted = |remote_id: Option<String>| {
            ResourceState::new(logical_id, kind, remote_id, &action.properties_hash, ResourceStatus::Deleted)
        };

        let Some(remote_id) = action.prior_remote_id() else {
            debug!("No remote id recorded for '{logical_id}', nothing to delete");
            return Ok(deleted(None));
        };

        match self
            .retry
            .run(logical_id, || self.provider.delete(kind, remote_id))
            .await
        {
            Ok(()) => info!("Deleted {kind} '{logical_id}' ({remote_id})"),
            Err(f) if matches!(f.error, ProviderError::NotFound { .. }) => {
                info!("{kind} '{logical_id}' ({remote_id}) was already deleted");
            }
            Err(f) => {
                return Err(ActionFailure::new(
                    f.into_error("delete", kind.as_str(), logical_id),
                    Some(remote_id.to_string()),
                ));
            }
        }

        Ok(deleted(Some(remote_id.to_string())))
    }

    /// Polls the provider until the resource is ready.
    async fn wait_until_ready(&self, action: &Action, remote_id: &str) -> Result<RemoteResource> {
        let kind = action.resource.kind;
        let logical_id = action.logical_id();
        let started = Instant::now();

        loop {
            let remote = self
                .retry
                .run(logical_id, || self.provider.get(kind, remote_id))
                .await
                .map_err(|f| f.into_error("poll", kind.as_str(), logical_id))?;

            match remote.status {
                RemoteStatus::Ready => return Ok(remote),
                RemoteStatus::Failed => {
                    return Err(StackError::Reconcile(ReconcileError::ResourceFailed {
                        action: action.action_type.to_string(),
                        kind: kind.to_string(),
                        logical_id: logical_id.to_string(),
                        source: ProviderError::OperationFailed {
                            remote_id: remote_id.to_string(),
                            message: remote.message.unwrap_or_else(|| String::from("no reason given")),
                        },
                    }));
                }
                RemoteStatus::InProgress => {}
            }

            let waited = started.elapsed();
            if waited >= self.poll_timeout {
                return Err(StackError::Reconcile(ReconcileError::ReadinessTimeout {
                    logical_id: logical_id.to_string(),
                    remote_id: remote_id.to_string(),
                    waited_secs: waited.as_secs(),
                }));
            }

            self.keep_lock().await?;
            debug!("Waiting for '{logical_id}' ({remote_id}) to become ready");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Substitutes references with recorded remote ids and outputs.
fn resolve_properties(action: &Action, snapshot: &StateSnapshot) -> Result<Properties> {
    refs::substitute(&action.resource.properties, &|r: &Reference| snapshot.resolve(r)).map_err(|r| {
        StackError::Reconcile(ReconcileError::UnresolvedReference {
            logical_id: action.logical_id().to_string(),
            reference: r.to_string(),
        })
    })
}

/// State recorded for an applied resource. `hash` covers the properties as
/// sent, with references resolved.
fn applied_state(
    action: &Action,
    remote_id: &str,
    hash: &str,
    outputs: Outputs,
    status: ResourceStatus,
) -> ResourceState {
    ResourceState::new(
        action.logical_id(),
        action.resource.kind,
        Some(remote_id.to_string()),
        hash,
        status,
    )
    .with_depends_on(action.depends_on.clone())
    .with_properties(action.resource.properties.clone())
    .with_outputs(outputs)
}

/// State recorded for a failed action: any known remote id, the prior hash.
fn failed_state(action: &Action, remote_id: Option<String>) -> ResourceState {
    let prior = action.prior_state.as_ref();
    let remote_id = remote_id.or_else(|| action.prior_remote_id().map(str::to_string));
    let hash = prior.map(|p| p.properties_hash.as_str()).unwrap_or_default();

    ResourceState::new(action.logical_id(), action.resource.kind, remote_id, hash, ResourceStatus::Failed)
        .with_depends_on(action.depends_on.clone())
        .with_properties(prior.map_or_else(|| action.resource.properties.clone(), |p| p.properties.clone()))
        .with_outputs(prior.map(|p| p.outputs.clone()).unwrap_or_default())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars
        .next()
        .map(|c| c.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}

impl ExecutionResult {
    /// Returns true if every change was applied.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.failure.is_none() && !self.cancelled
    }

    /// Logical ids changed by this run.
    #[must_use]
    pub fn changed_ids(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.logical_id.clone())
            .collect()
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} actions: {} succeeded, {} failed, {} skipped",
            self.results.len(),
            self.successful,
            usize::from(self.failure.is_some()),
            self.skipped
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}
