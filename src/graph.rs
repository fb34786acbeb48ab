//! Pure dependency graph over agent names: topological start order (Kahn's algorithm,
//! tie-broken by `(priority, name)` for determinism), its reverse for shutdown, and
//! cycle detection.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub name: String,
    pub priority: i64,
    pub dependencies: HashSet<String>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DependencyGraphError {
    #[error("agent '{agent}' depends on unknown agent '{dependency}'")]
    UnknownDependency { agent: String, dependency: String },
    #[error("dependency cycle detected: {0:?}")]
    Cycle(Vec<String>),
}

/// A dependency graph built from a snapshot of agent descriptors. Immutable once built;
/// a new `FleetConfig` version produces a new `DependencyGraph`.
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    index_by_name: HashMap<String, NodeIndex>,
    priority_by_name: HashMap<String, i64>,
}

impl DependencyGraph {
    /// Builds the graph, validating that every dependency refers to a declared node.
    pub fn build(nodes: Vec<GraphNode>) -> Result<Self, DependencyGraphError> {
        let mut graph = DiGraph::new();
        let mut index_by_name = HashMap::new();
        let mut priority_by_name = HashMap::new();

        for node in &nodes {
            let idx = graph.add_node(node.name.clone());
            index_by_name.insert(node.name.clone(), idx);
            priority_by_name.insert(node.name.clone(), node.priority);
        }

        for node in &nodes {
            let to = index_by_name[&node.name];
            for dep in &node.dependencies {
                let from = index_by_name.get(dep).ok_or_else(|| {
                    DependencyGraphError::UnknownDependency {
                        agent: node.name.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                // Edge dependency -> agent: the agent starts only after its dependency.
                graph.add_edge(*from, to, ());
            }
        }

        let built = Self {
            graph,
            index_by_name,
            priority_by_name,
        };
        if let Some(cycle) = built.detect_cycle() {
            return Err(DependencyGraphError::Cycle(cycle));
        }
        Ok(built)
    }

    /// Returns one offending cycle (as a sequence of agent names) if the graph is not
    /// acyclic, or `None` if it is.
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        // Kahn's algorithm: if after removing all zero-indegree nodes repeatedly some
        // nodes remain, those remaining nodes form at least one cycle.
        let mut indegree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| (idx, self.graph.edges_directed(idx, Direction::Incoming).count()))
            .collect();

        let mut queue: VecDeque<NodeIndex> = indegree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&idx, _)| idx)
            .collect();

        let mut visited = 0usize;
        while let Some(idx) = queue.pop_front() {
            visited += 1;
            for succ in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                let deg = indegree.get_mut(&succ).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(succ);
                }
            }
        }

        if visited == self.graph.node_count() {
            return None;
        }

        let remaining: Vec<String> = indegree
            .iter()
            .filter(|(_, &deg)| deg > 0)
            .map(|(&idx, _)| self.graph[idx].clone())
            .collect();
        Some(remaining)
    }

    /// Topological tiers: each tier is a maximal set of agents that may start in
    /// parallel, ordered `(priority asc, name asc)` within the tier for determinism.
    pub fn start_order(&self) -> Vec<Vec<String>> {
        let mut indegree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| (idx, self.graph.edges_directed(idx, Direction::Incoming).count()))
            .collect();

        let mut tiers = Vec::new();
        let mut frontier: Vec<NodeIndex> = indegree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&idx, _)| idx)
            .collect();

        while !frontier.is_empty() {
            let mut tier_names: Vec<String> = frontier.iter().map(|&idx| self.graph[idx].clone()).collect();
            tier_names.sort_by(|a, b| {
                self.priority_by_name[a]
                    .cmp(&self.priority_by_name[b])
                    .then_with(|| a.cmp(b))
            });

            let mut next_frontier = Vec::new();
            for &idx in &frontier {
                for succ in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                    let deg = indegree.get_mut(&succ).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        next_frontier.push(succ);
                    }
                }
            }

            tiers.push(tier_names);
            frontier = next_frontier;
        }

        tiers
    }

    /// The reverse of [`start_order`](Self::start_order), used for shutdown.
    pub fn stop_order(&self) -> Vec<Vec<String>> {
        let mut tiers = self.start_order();
        tiers.reverse();
        tiers
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_by_name.contains_key(name)
    }

    /// Restricts the graph to a subset of agent names (e.g. `enabled && auto_start`),
    /// preserving only edges whose both endpoints survive the filter.
    pub fn restricted_to(&self, names: &HashSet<String>) -> Self {
        let kept: BTreeMap<String, i64> = self
            .priority_by_name
            .iter()
            .filter(|(name, _)| names.contains(*name))
            .map(|(n, p)| (n.clone(), *p))
            .collect();

        let nodes = kept
            .into_iter()
            .map(|(name, priority)| {
                let deps = self
                    .graph
                    .edges_directed(self.index_by_name[&name], Direction::Incoming)
                    .map(|e| self.graph[e.source()].clone())
                    .filter(|dep| names.contains(dep))
                    .collect();
                GraphNode {
                    name,
                    priority,
                    dependencies: deps,
                }
            })
            .collect();

        // Filtering a subset of an already-acyclic graph cannot introduce a cycle.
        Self::build(nodes).expect("restriction of an acyclic graph is always acyclic")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, priority: i64, deps: &[&str]) -> GraphNode {
        GraphNode {
            name: name.to_string(),
            priority,
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn linear_chain_produces_ordered_tiers() {
        let graph = DependencyGraph::build(vec![
            node("a", 100, &[]),
            node("b", 100, &["a"]),
            node("c", 100, &["b"]),
        ])
        .unwrap();

        assert_eq!(
            graph.start_order(),
            vec![vec!["a".to_string()], vec!["b".to_string()], vec!["c".to_string()]]
        );
        assert_eq!(
            graph.stop_order(),
            vec![vec!["c".to_string()], vec!["b".to_string()], vec!["a".to_string()]]
        );
    }

    #[test]
    fn independent_agents_share_a_tier_sorted_by_priority_then_name() {
        let graph = DependencyGraph::build(vec![
            node("z", 50, &[]),
            node("a", 100, &[]),
            node("m", 50, &[]),
        ])
        .unwrap();

        assert_eq!(graph.start_order(), vec![vec!["m".to_string(), "z".to_string(), "a".to_string()]]);
    }

    #[test]
    fn cycle_is_detected_at_build_time() {
        let result = DependencyGraph::build(vec![node("a", 100, &["b"]), node("b", 100, &["a"])]);
        assert!(matches!(result, Err(DependencyGraphError::Cycle(_))));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let result = DependencyGraph::build(vec![node("a", 100, &["ghost"])]);
        assert_eq!(
            result.unwrap_err(),
            DependencyGraphError::UnknownDependency {
                agent: "a".to_string(),
                dependency: "ghost".to_string(),
            }
        );
    }

    #[test]
    fn restricted_to_drops_excluded_nodes_and_their_edges() {
        let graph = DependencyGraph::build(vec![
            node("a", 100, &[]),
            node("b", 100, &["a"]),
            node("c", 100, &["b"]),
        ])
        .unwrap();

        let subset: HashSet<String> = ["a".to_string(), "c".to_string()].into_iter().collect();
        let restricted = graph.restricted_to(&subset);
        assert_eq!(
            restricted.start_order(),
            vec![vec!["a".to_string(), "c".to_string()]]
        );
    }
}
