//! Load sequencing
//!
//! Flattens a [`ResolutionPlan`] into a [`LoadPlan`]: every provider in the
//! plan, each placed after every provider chosen anywhere in its own
//! sub-plan. Uses petgraph for the dependency edges and incoming-edge
//! counting for the order.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::Serialize;
use thiserror::Error;

use super::resolve::ResolutionPlan;

#[derive(Debug, Error, PartialEq)]
pub enum SequenceError {
    /// Only reachable if the plan carries a cycle the resolver missed
    #[error("dependency resolution could not converge; unordered plugins: {}", remaining.join(", "))]
    Unconverged { remaining: Vec<String> },
}

/// Plugins in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LoadPlan {
    order: Vec<String>,
}

impl LoadPlan {
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl From<Vec<String>> for LoadPlan {
    fn from(order: Vec<String>) -> Self {
        Self { order }
    }
}

/// Builds the load order for `plan`.
///
/// Ties between providers that become ready together are broken by the
/// order in which they were first seen walking the plan, so the result is
/// stable for a given plan.
pub fn linearize(plan: &ResolutionPlan) -> Result<LoadPlan, SequenceError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
    add_edges(plan, &mut graph, &mut nodes);

    let mut incoming: Vec<usize> = graph
        .node_indices()
        .map(|idx| graph.neighbors_directed(idx, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<NodeIndex>> = graph
        .node_indices()
        .filter(|idx| incoming[idx.index()] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse(idx)) = ready.pop() {
        order.push(graph[idx].to_string());
        for next in graph.neighbors_directed(idx, Direction::Outgoing) {
            incoming[next.index()] -= 1;
            if incoming[next.index()] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() < graph.node_count() {
        let remaining = graph
            .node_indices()
            .filter(|idx| incoming[idx.index()] > 0)
            .map(|idx| graph[idx].to_string())
            .collect();
        return Err(SequenceError::Unconverged { remaining });
    }

    tracing::debug!("load order: {}", order.join(", "));
    Ok(LoadPlan { order })
}

/// Registers every provider under `plan` and adds an edge from each of its
/// dependencies. Returns every provider chosen beneath `plan`.
fn add_edges<'p>(
    plan: &'p ResolutionPlan,
    graph: &mut DiGraph<&'p str, ()>,
    nodes: &mut HashMap<&'p str, NodeIndex>,
) -> BTreeSet<&'p str> {
    let mut beneath = BTreeSet::new();
    for choice in plan.choices() {
        let provider = choice.provider.as_str();
        let node = *nodes
            .entry(provider)
            .or_insert_with(|| graph.add_node(provider));

        let deps = add_edges(&choice.plan, graph, nodes);
        for dep in &deps {
            let dep_node = nodes[dep];
            graph.update_edge(dep_node, node, ());
        }

        beneath.insert(provider);
        beneath.extend(deps);
    }
    beneath
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::registry::PluginRegistry;
    use crate::domain::resolve::resolve_requirements;
    use crate::domain::spec::{Pipeline, PluginSpec};
    use proptest::prelude::*;

    fn leaf() -> ResolutionPlan {
        ResolutionPlan::new()
    }

    fn plan(choices: Vec<(&str, &str, ResolutionPlan)>) -> ResolutionPlan {
        let mut plan = ResolutionPlan::new();
        for (slot, provider, sub) in choices {
            plan.push(slot, provider, sub);
        }
        plan
    }

    #[test]
    fn empty_plan_gives_empty_order() {
        let order = linearize(&leaf()).unwrap();
        assert!(order.is_empty());
    }

    #[test]
    fn dependencies_load_first() {
        // root -> render -> parser -> reader
        let tree = plan(vec![(
            "render",
            "render",
            plan(vec![("html", "parser", plan(vec![("reader", "reader", leaf())]))]),
        )]);

        let order = linearize(&tree).unwrap();
        assert_eq!(order.names(), ["reader", "parser", "render"]);
    }

    #[test]
    fn shared_provider_loads_once() {
        let tree = plan(vec![
            ("left", "left", plan(vec![("shared", "shared", leaf())])),
            ("right", "right", plan(vec![("shared", "shared", leaf())])),
        ]);

        let order = linearize(&tree).unwrap();
        assert_eq!(order.len(), 3);
        assert!(order.position("shared") < order.position("left"));
        assert!(order.position("shared") < order.position("right"));
    }

    #[test]
    fn ties_follow_discovery_order() {
        let tree = plan(vec![
            ("b", "b", leaf()),
            ("a", "a", plan(vec![("c", "c", leaf())])),
            ("d", "d", leaf()),
        ]);

        let order = linearize(&tree).unwrap();
        assert_eq!(order.names(), ["b", "c", "a", "d"]);
        assert_eq!(linearize(&tree).unwrap(), order);
    }

    #[test]
    fn contradictory_plan_does_not_converge() {
        // x needs y in one branch, y needs x in another
        let tree = plan(vec![
            ("x", "x", plan(vec![("y", "y", leaf())])),
            ("y", "y", plan(vec![("x", "x", leaf())])),
        ]);

        let err = linearize(&tree).unwrap_err();
        assert_eq!(
            err,
            SequenceError::Unconverged {
                remaining: vec!["x".to_string(), "y".to_string()]
            }
        );
    }

    #[test]
    fn no_requirements_round_trip() {
        let registry = PluginRegistry::from_specs([
            PluginSpec::user("a", Pipeline::project("main"), "./a"),
            PluginSpec::user("b", Pipeline::project("main"), "./b"),
        ])
        .unwrap();

        let requirements = vec!["a".to_string(), "b".to_string()];
        let resolved = resolve_requirements("preprocess", &requirements, &registry.providers()).unwrap();
        let order = linearize(&resolved.plan).unwrap();

        assert_eq!(order.names(), ["a", "b"]);
    }

    /// Every provider chosen beneath each provider, across all occurrences
    fn dependencies(plan: &ResolutionPlan, out: &mut HashMap<String, BTreeSet<String>>) {
        for choice in plan.choices() {
            let deps = out.entry(choice.provider.clone()).or_default();
            deps.extend(choice.plan.providers().into_iter().map(String::from));
            dependencies(&choice.plan, out);
        }
    }

    proptest! {
        /// Plugin i may only use plugins with a larger index, so the set is acyclic
        #[test]
        fn acyclic_sets_resolve_and_order(matrix in prop::collection::vec(prop::collection::vec(any::<bool>(), 8), 1..8)) {
            let n = matrix.len();
            let specs: Vec<PluginSpec> = (0..n)
                .map(|i| {
                    let uses: Vec<String> = ((i + 1)..n)
                        .filter(|&j| matrix[i][j])
                        .map(|j| format!("p{}", j))
                        .collect();
                    PluginSpec::user(format!("p{}", i), Pipeline::project("main"), "./p")
                        .with_uses(uses)
                })
                .collect();
            let registry = PluginRegistry::from_specs(specs).unwrap();
            let requirements: Vec<String> = (0..n).map(|i| format!("p{}", i)).collect();

            let resolved = resolve_requirements("test", &requirements, &registry.providers()).unwrap();
            let order = linearize(&resolved.plan).unwrap();

            let mut expected: Vec<&str> = resolved.plan.providers();
            let mut actual: Vec<&str> = order.iter().collect();
            expected.sort_unstable();
            actual.sort_unstable();
            prop_assert_eq!(actual, expected);

            let mut deps = HashMap::new();
            dependencies(&resolved.plan, &mut deps);
            for (provider, before) in &deps {
                let at = order.position(provider).unwrap();
                for dep in before {
                    prop_assert!(order.position(dep).unwrap() < at, "{} must load before {}", dep, provider);
                }
            }
        }
    }
}
