//! Plan types.
//!
//! A plan is an ordered list of actions. Creates, updates and no-ops come
//! first in dependency order; deletes follow in reverse dependency order.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::config::ResourceSpec;
use crate::state::ResourceState;

/// A complete plan for one run.
#[derive(Debug, Clone)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Stack the plan targets.
    pub stack: String,
    /// Configuration hash this plan is based on.
    pub config_hash: String,
    /// Actions in execution order.
    pub actions: Vec<Action>,
}

/// A single planned action.
#[derive(Debug, Clone)]
pub struct Action {
    /// Action type.
    pub action_type: ActionType,
    /// Desired resource, or the recorded one for deletes.
    pub resource: ResourceSpec,
    /// Recorded state before this run, if any.
    pub prior_state: Option<ResourceState>,
    /// Hash of the desired declared properties.
    pub properties_hash: String,
    /// Effective dependencies (explicit and referenced).
    pub depends_on: BTreeSet<String>,
    /// Why this action was chosen.
    pub reason: String,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// Create a new resource.
    Create,
    /// Update an existing resource in place.
    Update,
    /// Delete a resource.
    Delete,
    /// Nothing to do.
    NoOp,
}

impl Plan {
    /// Creates a plan from ordered actions.
    #[must_use]
    pub fn new(stack: &str, config_hash: &str, actions: Vec<Action>) -> Self {
        Self {
            created_at: Utc::now(),
            stack: stack.to_string(),
            config_hash: config_hash.to_string(),
            actions,
        }
    }

    /// Returns true if no action changes anything.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.actions.iter().all(|a| a.action_type == ActionType::NoOp)
    }

    /// Actions that change something.
    pub fn changes(&self) -> impl Iterator<Item = &Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type != ActionType::NoOp)
    }

    /// Returns the number of actions.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Returns the number of actions of one type.
    #[must_use]
    pub fn count(&self, action_type: ActionType) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count()
    }

    /// Returns the number of create actions.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.count(ActionType::Create)
    }

    /// Returns the number of update actions.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.count(ActionType::Update)
    }

    /// Returns the number of delete actions.
    #[must_use]
    pub fn delete_count(&self) -> usize {
        self.count(ActionType::Delete)
    }

    /// Returns the number of no-op actions.
    #[must_use]
    pub fn noop_count(&self) -> usize {
        self.count(ActionType::NoOp)
    }

    /// `(action type, logical id)` pairs in execution order.
    #[must_use]
    pub fn summary(&self) -> Vec<(ActionType, &str)> {
        self.actions
            .iter()
            .map(|a| (a.action_type, a.logical_id()))
            .collect()
    }
}

impl Action {
    /// Logical id of the target resource.
    #[must_use]
    pub fn logical_id(&self) -> &str {
        &self.resource.logical_id
    }

    /// Remote id recorded before this run.
    #[must_use]
    pub fn prior_remote_id(&self) -> Option<&str> {
        self.prior_state.as_ref().and_then(|s| s.remote_id.as_deref())
    }

    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        let kind = self.resource.kind;
        let id = self.logical_id();
        match self.action_type {
            ActionType::Create => format!("Create {kind} '{id}'"),
            ActionType::Update => format!("Update {kind} '{id}'"),
            ActionType::Delete => format!("Delete {kind} '{id}'"),
            ActionType::NoOp => format!("No change for {kind} '{id}'"),
        }
    }
}

impl ActionType {
    /// One-character marker used in plan output.
    #[must_use]
    pub const fn symbol(self) -> char {
        match self {
            Self::Create => '+',
            Self::Update => '~',
            Self::Delete => '-',
            Self::NoOp => ' ',
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "noop",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} ({})",
            self.action_type.symbol(),
            self.resource.kind,
            self.logical_id(),
            self.reason
        )
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_converged() {
            return write!(f, "No changes required");
        }

        writeln!(
            f,
            "Plan: {} to create, {} to update, {} to delete",
            self.create_count(),
            self.update_count(),
            self.delete_count()
        )?;
        for action in self.changes() {
            writeln!(f, "  {action}")?;
        }

        Ok(())
    }
}
