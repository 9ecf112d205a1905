//! Resource dependency graph.
//!
//! Turns the declared resource list into a validated DAG keyed by logical
//! id. An edge `a -> b` means "a depends on b": b must exist before a is
//! created, and a must be deleted before b.
//!
//! Dependencies are the union of the explicit `depends_on` set and every
//! logical id referenced through `${...}` in the properties, so the graph the
//! executor walks is always the one the user can read in the stack file.
//!
//! The topological order is stable: among resources that are ready at the
//! same time, the one declared first goes first.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use tracing::debug;

use crate::config::refs::referenced_ids;
use crate::config::ResourceSpec;
use crate::error::GraphError;

/// A validated resource DAG.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    /// Resources in declaration order.
    nodes: Vec<ResourceSpec>,
    /// Logical id -> declaration index.
    index: HashMap<String, usize>,
    /// Declaration index -> indices of its dependencies.
    upstream: Vec<BTreeSet<usize>>,
    /// Declaration index -> indices of its dependents.
    downstream: Vec<BTreeSet<usize>>,
    /// Declaration indices in topological order.
    order: Vec<usize>,
}

impl ResourceGraph {
    /// Builds and validates the graph.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateId`] when two resources share an id,
    /// [`GraphError::DanglingReference`] when a dependency or reference
    /// names an unknown id, and [`GraphError::CyclicDependency`] with the
    /// cycle path when the dependencies are not acyclic.
    pub fn build(resources: &[ResourceSpec]) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(resources.len());
        for (i, resource) in resources.iter().enumerate() {
            if index.insert(resource.logical_id.clone(), i).is_some() {
                return Err(GraphError::DuplicateId {
                    logical_id: resource.logical_id.clone(),
                });
            }
        }

        let mut upstream = vec![BTreeSet::new(); resources.len()];
        for (i, resource) in resources.iter().enumerate() {
            let referenced = referenced_ids(&resource.properties);
            for dep in resource.depends_on.iter().chain(referenced.iter()) {
                let Some(&target) = index.get(dep) else {
                    return Err(GraphError::DanglingReference {
                        logical_id: resource.logical_id.clone(),
                        missing: dep.clone(),
                    });
                };
                upstream[i].insert(target);
            }
        }

        if let Some(cycle) = find_cycle(&upstream) {
            return Err(GraphError::CyclicDependency {
                cycle: cycle
                    .into_iter()
                    .map(|i| resources[i].logical_id.clone())
                    .collect(),
            });
        }

        let order = stable_topological_order(&upstream).ok_or_else(|| {
            GraphError::CyclicDependency {
                cycle: resources.iter().map(|r| r.logical_id.clone()).collect(),
            }
        })?;

        let mut downstream = vec![BTreeSet::new(); resources.len()];
        for (i, deps) in upstream.iter().enumerate() {
            for &dep in deps {
                downstream[dep].insert(i);
            }
        }

        debug!("Built resource graph with {} nodes", resources.len());

        Ok(Self {
            nodes: resources.to_vec(),
            index,
            upstream,
            downstream,
            order,
        })
    }

    /// A graph with no resources. Diffing against it deletes everything.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Resources in topological order, dependencies first.
    pub fn topological_order(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.order.iter().map(|&i| &self.nodes[i])
    }

    /// Resources in declaration order.
    #[must_use]
    pub fn resources(&self) -> &[ResourceSpec] {
        &self.nodes
    }

    /// Looks up a resource by logical id.
    #[must_use]
    pub fn get(&self, logical_id: &str) -> Option<&ResourceSpec> {
        self.index.get(logical_id).map(|&i| &self.nodes[i])
    }

    /// Returns true if the graph holds the logical id.
    #[must_use]
    pub fn contains(&self, logical_id: &str) -> bool {
        self.index.contains_key(logical_id)
    }

    /// Direct dependencies of a resource, in declaration order.
    #[must_use]
    pub fn dependencies_of(&self, logical_id: &str) -> Vec<&str> {
        self.neighbours(logical_id, &self.upstream)
    }

    /// Direct dependents of a resource, in declaration order.
    #[must_use]
    pub fn dependents_of(&self, logical_id: &str) -> Vec<&str> {
        self.neighbours(logical_id, &self.downstream)
    }

    fn neighbours<'a>(&'a self, logical_id: &str, edges: &'a [BTreeSet<usize>]) -> Vec<&'a str> {
        self.index
            .get(logical_id)
            .map(|&i| {
                edges[i]
                    .iter()
                    .map(|&j| self.nodes[j].logical_id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if there are no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Kahn's algorithm over index-based adjacency, breaking ties by lowest index.
///
/// `dependencies[i]` holds the nodes `i` depends on. Returns `None` if the
/// nodes cannot all be ordered.
pub(crate) fn stable_topological_order(dependencies: &[BTreeSet<usize>]) -> Option<Vec<usize>> {
    let n = dependencies.len();
    let mut in_degree: Vec<usize> = dependencies.iter().map(BTreeSet::len).collect();
    let mut dependents = vec![Vec::new(); n];
    for (node, deps) in dependencies.iter().enumerate() {
        for &dep in deps {
            dependents[dep].push(node);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
        .filter(|&i| in_degree[i] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::with_capacity(n);

    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &dependent in &dependents[node] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    (order.len() == n).then_some(order)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// DFS with a recursion stack. Returns the first cycle found, with its first
/// node repeated at the end.
pub(crate) fn find_cycle(dependencies: &[BTreeSet<usize>]) -> Option<Vec<usize>> {
    let mut marks = vec![Mark::Unvisited; dependencies.len()];
    let mut stack = Vec::new();

    for start in 0..dependencies.len() {
        if marks[start] == Mark::Unvisited
            && let Some(cycle) = visit(start, dependencies, &mut marks, &mut stack)
        {
            return Some(cycle);
        }
    }

    None
}

fn visit(
    node: usize,
    dependencies: &[BTreeSet<usize>],
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    marks[node] = Mark::OnStack;
    stack.push(node);

    for &next in &dependencies[node] {
        match marks[next] {
            Mark::OnStack => {
                let from = stack.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle = stack[from..].to_vec();
                cycle.push(next);
                return Some(cycle);
            }
            Mark::Unvisited => {
                if let Some(cycle) = visit(next, dependencies, marks, stack) {
                    return Some(cycle);
                }
            }
            Mark::Done => {}
        }
    }

    stack.pop();
    marks[node] = Mark::Done;
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceKind;

    fn ids(graph: &ResourceGraph) -> Vec<&str> {
        graph
            .topological_order()
            .map(|r| r.logical_id.as_str())
            .collect()
    }

    #[test]
    fn test_dependencies_come_first() {
        let resources = vec![
            ResourceSpec::new("dns", ResourceKind::DnsRecord).with_dependency("cdn"),
            ResourceSpec::new("bucket", ResourceKind::Bucket),
            ResourceSpec::new("cdn", ResourceKind::Distribution).with_dependency("bucket"),
        ];
        let graph = ResourceGraph::build(&resources).unwrap();

        assert_eq!(ids(&graph), vec!["bucket", "cdn", "dns"]);
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let resources = vec![
            ResourceSpec::new("x", ResourceKind::Bucket),
            ResourceSpec::new("y", ResourceKind::Policy).with_dependency("x"),
            ResourceSpec::new("z", ResourceKind::Certificate),
        ];
        let graph = ResourceGraph::build(&resources).unwrap();

        assert_eq!(ids(&graph), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_every_edge_respected() {
        let resources = vec![
            ResourceSpec::new("apex", ResourceKind::DnsRecord)
                .with_property("target", "${cdn.domain_name}"),
            ResourceSpec::new("www", ResourceKind::DnsRecord)
                .with_property("target", "${cdn.domain_name}"),
            ResourceSpec::new("cdn", ResourceKind::Distribution)
                .with_property("origin", "${bucket.regional_domain_name}")
                .with_property("certificate", "${cert.arn}")
                .with_dependency("oai"),
            ResourceSpec::new("policy", ResourceKind::Policy)
                .with_property("bucket", "${bucket}")
                .with_property("principal", "${oai.canonical_user_id}"),
            ResourceSpec::new("cert", ResourceKind::Certificate),
            ResourceSpec::new("oai", ResourceKind::OriginAccessIdentity),
            ResourceSpec::new("bucket", ResourceKind::Bucket),
        ];
        let graph = ResourceGraph::build(&resources).unwrap();
        let order = ids(&graph);
        let pos = |id: &str| order.iter().position(|o| *o == id).unwrap();

        for resource in graph.resources() {
            for dep in graph.dependencies_of(&resource.logical_id) {
                assert!(pos(dep) < pos(&resource.logical_id), "{dep} before {}", resource.logical_id);
            }
        }
        assert_eq!(order, vec!["cert", "oai", "bucket", "cdn", "apex", "www", "policy"]);
    }

    #[test]
    fn test_references_become_edges() {
        let resources = vec![
            ResourceSpec::new("bucket", ResourceKind::Bucket),
            ResourceSpec::new("policy", ResourceKind::Policy).with_property("bucket", "${bucket}"),
        ];
        let graph = ResourceGraph::build(&resources).unwrap();

        assert_eq!(graph.dependencies_of("policy"), vec!["bucket"]);
        assert_eq!(graph.dependents_of("bucket"), vec!["policy"]);
        assert!(graph.dependencies_of("unknown").is_empty());
    }

    #[test]
    fn test_duplicate_id() {
        let resources = vec![
            ResourceSpec::new("a", ResourceKind::Bucket),
            ResourceSpec::new("a", ResourceKind::Certificate),
        ];
        assert_eq!(
            ResourceGraph::build(&resources).unwrap_err(),
            GraphError::DuplicateId { logical_id: "a".into() }
        );
    }

    #[test]
    fn test_dangling_reference() {
        let resources = vec![
            ResourceSpec::new("policy", ResourceKind::Policy).with_property("bucket", "${ghost}"),
        ];
        assert_eq!(
            ResourceGraph::build(&resources).unwrap_err(),
            GraphError::DanglingReference {
                logical_id: "policy".into(),
                missing: "ghost".into(),
            }
        );
    }

    #[test]
    fn test_two_node_cycle() {
        let resources = vec![
            ResourceSpec::new("a", ResourceKind::Bucket).with_dependency("b"),
            ResourceSpec::new("b", ResourceKind::Policy).with_dependency("a"),
        ];
        let err = ResourceGraph::build(&resources).unwrap_err();

        assert_eq!(
            err,
            GraphError::CyclicDependency {
                cycle: vec!["a".into(), "b".into(), "a".into()],
            }
        );
        assert_eq!(err.to_string(), "Cyclic dependency: a -> b -> a");
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let resources = vec![ResourceSpec::new("a", ResourceKind::Bucket).with_dependency("a")];
        assert!(matches!(
            ResourceGraph::build(&resources),
            Err(GraphError::CyclicDependency { cycle }) if cycle == vec!["a", "a"]
        ));
    }

    #[test]
    fn test_cycle_path_excludes_prefix() {
        let resources = vec![
            ResourceSpec::new("root", ResourceKind::DnsRecord).with_dependency("b"),
            ResourceSpec::new("b", ResourceKind::Distribution).with_dependency("c"),
            ResourceSpec::new("c", ResourceKind::Bucket).with_dependency("b"),
        ];
        let err = ResourceGraph::build(&resources).unwrap_err();
        assert_eq!(err.to_string(), "Cyclic dependency: b -> c -> b");
    }

    #[test]
    fn test_empty_graph() {
        let graph = ResourceGraph::empty();
        assert!(graph.is_empty());
        assert_eq!(graph.len(), 0);
        assert!(!graph.contains("a"));
        assert_eq!(graph.topological_order().count(), 0);
    }
}
