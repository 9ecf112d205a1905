//! Diff engine for comparing the resource graph with recorded state.
//!
//! For every resource in topological order:
//! - not recorded, or recorded without a remote id: create
//! - recorded but failed, pending, or with a different properties hash: update
//! - referencing a resource that changes earlier in the same plan: update
//! - otherwise: no-op
//!
//! The properties hash is taken after substituting references with what is
//! recorded, so a new remote id or output upstream changes it too.
//!
//! Recorded resources missing from the graph are deleted after everything
//! else, dependents before their dependencies.

use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::config::{ConfigHasher, Reference, ResourceSpec, refs};
use crate::error::{Result, StackError, StateError};
use crate::graph::{ResourceGraph, find_cycle, stable_topological_order};
use crate::state::{ResourceState, ResourceStatus, StateSnapshot};

use super::plan::{Action, ActionType, Plan};

/// Engine for computing plans.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Configuration hasher.
    hasher: ConfigHasher,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Computes the plan that converges `snapshot` to `graph`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Corrupted`] if the dependencies recorded for
    /// resources about to be deleted form a cycle.
    pub fn compute(
        &self,
        graph: &ResourceGraph,
        snapshot: &StateSnapshot,
        config_hash: &str,
    ) -> Result<Plan> {
        let mut actions = Vec::with_capacity(graph.len());
        // Resources with a create, update or replacement earlier in the plan.
        let mut changing: HashSet<&str> = HashSet::new();

        for resource in graph.topological_order() {
            let depends_on: BTreeSet<String> = graph
                .dependencies_of(&resource.logical_id)
                .into_iter()
                .map(str::to_string)
                .collect();
            let new_hash = self.resolved_hash(resource, snapshot);
            let prior = snapshot.get(&resource.logical_id);

            if let Some(prior) = prior
                && prior.kind != resource.kind
            {
                debug!(
                    "{} changed kind from {} to {}",
                    resource.logical_id, prior.kind, resource.kind
                );
                actions.push(delete_action(
                    prior,
                    format!("Kind changed from {} to {}", prior.kind, resource.kind),
                ));
                actions.push(Action {
                    action_type: ActionType::Create,
                    resource: resource.clone(),
                    prior_state: None,
                    properties_hash: new_hash,
                    depends_on,
                    reason: String::from("Replacing resource of a different kind"),
                });
                changing.insert(&resource.logical_id);
                continue;
            }

            let (mut action_type, mut reason) = Self::classify(prior, &new_hash);
            if action_type == ActionType::NoOp
                && let Some(upstream) = refs::referenced_ids(&resource.properties)
                    .into_iter()
                    .find(|id| changing.contains(id.as_str()))
            {
                action_type = ActionType::Update;
                reason = format!("References '{upstream}', which changes in this plan");
            }
            if action_type != ActionType::NoOp {
                changing.insert(&resource.logical_id);
            }
            debug!("{} -> {action_type} ({reason})", resource.logical_id);

            actions.push(Action {
                action_type,
                resource: resource.clone(),
                prior_state: prior.cloned(),
                properties_hash: new_hash,
                depends_on,
                reason,
            });
        }

        actions.extend(Self::orphan_deletes(graph, snapshot)?);

        Ok(Plan::new(&snapshot.stack, config_hash, actions))
    }

    /// Hashes a resource's properties resolved against recorded state.
    ///
    /// References that cannot be resolved yet are hashed as written; their
    /// targets are created in the same plan, which forces an update anyway.
    #[must_use]
    pub fn resolved_hash(&self, resource: &ResourceSpec, snapshot: &StateSnapshot) -> String {
        refs::substitute(&resource.properties, &|r: &Reference| snapshot.resolve(r)).map_or_else(
            |_| self.hasher.hash_resource(resource),
            |resolved| self.hasher.hash_properties(resource.kind, &resolved),
        )
    }

    fn classify(prior: Option<&ResourceState>, new_hash: &str) -> (ActionType, String) {
        let (action_type, reason) = match prior {
            None => (ActionType::Create, "Not yet created"),
            Some(prior) if prior.remote_id.is_none() => {
                (ActionType::Create, "Previous create did not complete")
            }
            Some(prior) => match prior.status {
                ResourceStatus::Failed => (ActionType::Update, "Previous attempt failed"),
                ResourceStatus::Pending => (ActionType::Update, "Previous change did not finish"),
                _ if !ConfigHasher::hashes_match(&prior.properties_hash, new_hash) => {
                    (ActionType::Update, "Properties changed")
                }
                _ => (ActionType::NoOp, "Up to date"),
            },
        };
        (action_type, reason.to_string())
    }

    /// Deletes for recorded resources absent from the graph, in reverse
    /// topological order of their recorded dependencies.
    fn orphan_deletes(graph: &ResourceGraph, snapshot: &StateSnapshot) -> Result<Vec<Action>> {
        let orphans: Vec<&ResourceState> = snapshot
            .resources
            .values()
            .filter(|r| !graph.contains(&r.logical_id))
            .collect();
        if orphans.is_empty() {
            return Ok(Vec::new());
        }

        let index: HashMap<&str, usize> = orphans
            .iter()
            .enumerate()
            .map(|(i, r)| (r.logical_id.as_str(), i))
            .collect();
        // Edges to resources that stay are irrelevant for ordering deletes.
        let dependencies: Vec<BTreeSet<usize>> = orphans
            .iter()
            .map(|r| {
                r.depends_on
                    .iter()
                    .filter_map(|dep| index.get(dep.as_str()).copied())
                    .collect()
            })
            .collect();

        if let Some(cycle) = find_cycle(&dependencies) {
            let path: Vec<&str> = cycle.iter().map(|&i| orphans[i].logical_id.as_str()).collect();
            return Err(StackError::State(StateError::corrupted(format!(
                "recorded dependencies form a cycle: {}",
                path.join(" -> ")
            ))));
        }

        let order = stable_topological_order(&dependencies).ok_or_else(|| {
            StackError::State(StateError::corrupted("recorded dependencies cannot be ordered"))
        })?;

        Ok(order
            .into_iter()
            .rev()
            .map(|i| delete_action(orphans[i], String::from("Removed from stack")))
            .collect())
    }
}

fn delete_action(prior: &ResourceState, reason: String) -> Action {
    Action {
        action_type: ActionType::Delete,
        resource: ResourceSpec {
            logical_id: prior.logical_id.clone(),
            kind: prior.kind,
            properties: prior.properties.clone(),
            depends_on: prior.depends_on.clone(),
        },
        prior_state: Some(prior.clone()),
        properties_hash: prior.properties_hash.clone(),
        depends_on: prior.depends_on.clone(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Outputs, ResourceKind};
    use serde_json::json;

    fn recorded(id: &str, kind: ResourceKind, hash: &str, deps: &[&str]) -> ResourceState {
        ResourceState::new(id, kind, Some(format!("{id}-remote")), hash, ResourceStatus::Created)
            .with_depends_on(deps.iter().map(|d| (*d).to_string()).collect())
    }

    fn site() -> Vec<ResourceSpec> {
        vec![
            ResourceSpec::new("B1", ResourceKind::Bucket).with_property("block_public_access", true),
            ResourceSpec::new("D1", ResourceKind::Distribution)
                .with_property("origin", "${B1}"),
        ]
    }

    fn converged_snapshot(resources: &[ResourceSpec]) -> StateSnapshot {
        let engine = DiffEngine::new();
        let graph = ResourceGraph::build(resources).unwrap();
        let mut snapshot = StateSnapshot::new("site", "dev");
        for r in graph.topological_order() {
            let deps: Vec<&str> = graph.dependencies_of(&r.logical_id);
            let hash = engine.resolved_hash(r, &snapshot);
            snapshot.record(recorded(&r.logical_id, r.kind, &hash, &deps));
        }
        snapshot
    }

    #[test]
    fn test_empty_state_creates_everything_in_order() {
        let graph = ResourceGraph::build(&site()).unwrap();
        let plan = DiffEngine::new()
            .compute(&graph, &StateSnapshot::empty(), "h")
            .unwrap();

        assert_eq!(
            plan.summary(),
            vec![(ActionType::Create, "B1"), (ActionType::Create, "D1")]
        );
        assert_eq!(plan.actions[1].depends_on, BTreeSet::from([String::from("B1")]));
    }

    #[test]
    fn test_converged_state_is_all_noop() {
        let resources = site();
        let graph = ResourceGraph::build(&resources).unwrap();
        let plan = DiffEngine::new()
            .compute(&graph, &converged_snapshot(&resources), "h")
            .unwrap();

        assert!(plan.is_converged());
        assert_eq!(plan.noop_count(), 2);
        assert_eq!(plan.to_string(), "No changes required");
    }

    #[test]
    fn test_property_change_is_update() {
        let resources = site();
        let snapshot = converged_snapshot(&resources);
        let mut changed = resources;
        changed[0] = changed[0].clone().with_property("versioned", true);
        let graph = ResourceGraph::build(&changed).unwrap();

        let plan = DiffEngine::new().compute(&graph, &snapshot, "h").unwrap();
        assert_eq!(
            plan.summary(),
            vec![(ActionType::Update, "B1"), (ActionType::Update, "D1")]
        );
        assert_eq!(plan.actions[0].prior_remote_id(), Some("B1-remote"));
        assert!(plan.actions[1].reason.contains("'B1'"));
    }

    #[test]
    fn test_unrelated_resource_stays_noop() {
        let mut resources = site();
        resources.push(
            ResourceSpec::new("C1", ResourceKind::Certificate).with_property("domain_name", "example.com"),
        );
        let snapshot = converged_snapshot(&resources);
        resources[2] = resources[2].clone().with_property("validation", "dns");
        let graph = ResourceGraph::build(&resources).unwrap();

        let plan = DiffEngine::new().compute(&graph, &snapshot, "h").unwrap();
        assert_eq!(
            plan.summary(),
            vec![
                (ActionType::NoOp, "B1"),
                (ActionType::NoOp, "D1"),
                (ActionType::Update, "C1"),
            ]
        );
    }

    #[test]
    fn test_changed_upstream_output_updates_dependent() {
        let resources = vec![
            ResourceSpec::new("B1", ResourceKind::Bucket).with_property("bucket_name", "old-site"),
            ResourceSpec::new("D1", ResourceKind::Distribution)
                .with_property("origin", "${B1.regional_domain_name}"),
        ];
        let mut snapshot = StateSnapshot::new("site", "dev");
        let engine = DiffEngine::new();
        let b1 = recorded("B1", ResourceKind::Bucket, &engine.resolved_hash(&resources[0], &snapshot), &[])
            .with_outputs(Outputs::from([(
                String::from("regional_domain_name"),
                json!("old-site.storage"),
            )]));
        snapshot.record(b1.clone());
        let d1_hash = engine.resolved_hash(&resources[1], &snapshot);
        snapshot.record(recorded("D1", ResourceKind::Distribution, &d1_hash, &["B1"]));
        let graph = ResourceGraph::build(&resources).unwrap();
        assert!(engine.compute(&graph, &snapshot, "h").unwrap().is_converged());

        // B1 was updated and now reports a new domain; D1 still points at the old one.
        snapshot.record(b1.with_outputs(Outputs::from([(
            String::from("regional_domain_name"),
            json!("new-site.storage"),
        )])));
        let plan = engine.compute(&graph, &snapshot, "h").unwrap();
        assert_eq!(
            plan.summary(),
            vec![(ActionType::NoOp, "B1"), (ActionType::Update, "D1")]
        );
    }

    #[test]
    fn test_unsettled_entries() {
        let resources = site();
        let mut snapshot = converged_snapshot(&resources);
        let b1 = snapshot.get("B1").unwrap().clone();
        snapshot.record(b1.with_status(ResourceStatus::Failed));
        let mut d1 = snapshot.get("D1").unwrap().clone();
        d1.remote_id = None;
        snapshot.record(d1.with_status(ResourceStatus::Failed));

        let graph = ResourceGraph::build(&resources).unwrap();
        let plan = DiffEngine::new().compute(&graph, &snapshot, "h").unwrap();

        assert_eq!(
            plan.summary(),
            vec![(ActionType::Update, "B1"), (ActionType::Create, "D1")]
        );
    }

    #[test]
    fn test_deletes_come_last_in_reverse_dependency_order() {
        let mut snapshot = StateSnapshot::new("site", "dev");
        snapshot.record(recorded("A", ResourceKind::Bucket, "ha", &[]));
        snapshot.record(recorded("B", ResourceKind::Policy, "hb", &["A"]));
        snapshot.record(recorded("C", ResourceKind::DnsRecord, "hc", &["B"]));

        let keep = vec![ResourceSpec::new("Z", ResourceKind::Certificate)];
        let graph = ResourceGraph::build(&keep).unwrap();
        let plan = DiffEngine::new().compute(&graph, &snapshot, "h").unwrap();

        assert_eq!(
            plan.summary(),
            vec![
                (ActionType::Create, "Z"),
                (ActionType::Delete, "C"),
                (ActionType::Delete, "B"),
                (ActionType::Delete, "A"),
            ]
        );
    }

    #[test]
    fn test_destroy_plan() {
        let snapshot = converged_snapshot(&site());
        let plan = DiffEngine::new()
            .compute(&ResourceGraph::empty(), &snapshot, "")
            .unwrap();

        assert_eq!(
            plan.summary(),
            vec![(ActionType::Delete, "D1"), (ActionType::Delete, "B1")]
        );
        assert_eq!(plan.stack, "site");
    }

    #[test]
    fn test_recorded_cycle_is_corruption() {
        let mut snapshot = StateSnapshot::new("site", "dev");
        snapshot.record(recorded("A", ResourceKind::Bucket, "ha", &["B"]));
        snapshot.record(recorded("B", ResourceKind::Policy, "hb", &["A"]));

        let err = DiffEngine::new()
            .compute(&ResourceGraph::empty(), &snapshot, "")
            .unwrap_err();
        assert!(matches!(err, StackError::State(StateError::Corrupted { ref message }) if message.contains("A -> B -> A")));
    }

    #[test]
    fn test_kind_change_replaces() {
        let mut snapshot = StateSnapshot::new("site", "dev");
        snapshot.record(recorded("edge", ResourceKind::Bucket, "h", &[]));
        let graph = ResourceGraph::build(&[ResourceSpec::new("edge", ResourceKind::Certificate)
            .with_property("domain_name", "example.com")])
        .unwrap();

        let plan = DiffEngine::new().compute(&graph, &snapshot, "h").unwrap();
        assert_eq!(
            plan.summary(),
            vec![(ActionType::Delete, "edge"), (ActionType::Create, "edge")]
        );
        assert_eq!(plan.actions[0].resource.kind, ResourceKind::Bucket);
    }

    #[test]
    fn test_kind_change_updates_dependents() {
        let resources = site();
        let mut snapshot = converged_snapshot(&resources);
        let b1 = snapshot.get("B1").unwrap().clone();
        snapshot.record(ResourceState {
            kind: ResourceKind::Certificate,
            ..b1
        });
        let graph = ResourceGraph::build(&resources).unwrap();

        let plan = DiffEngine::new().compute(&graph, &snapshot, "h").unwrap();
        assert_eq!(
            plan.summary(),
            vec![
                (ActionType::Delete, "B1"),
                (ActionType::Create, "B1"),
                (ActionType::Update, "D1"),
            ]
        );
    }
}
