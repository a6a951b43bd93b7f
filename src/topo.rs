//! Shared topological sort + cycle detection, used by both the agent
//! registry's dependency resolution (§4.6) and the workflow engine's
//! step-execution ordering (§4.7).
//!
//! Grounded on `models::workflow::WorkflowDefinition::find_unreachable_states()`'s
//! DFS/graph-traversal approach, reshaped into Kahn's algorithm so that a
//! cycle is detected structurally (leftover in-degree > 0) rather than by
//! walking reachability from a root.

use crate::error::{OrchestratorError, Result};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Orders `nodes` so that every dependency precedes its dependents.
/// `dependencies(node)` returns the nodes that must appear earlier in the
/// returned order. Fails with `OrchestratorError::Cycle` if the graph is
/// not a DAG, before any node has been emitted, so a cyclic graph never
/// leaves a caller with partial ordering to act on.
pub fn topological_sort<T, F>(nodes: &[T], dependencies: F) -> Result<Vec<T>>
where
    T: Eq + Hash + Clone + std::fmt::Debug,
    F: Fn(&T) -> Vec<T>,
{
    let mut in_degree: HashMap<T, usize> = nodes.iter().map(|n| (n.clone(), 0)).collect();
    let mut successors: HashMap<T, Vec<T>> = HashMap::new();

    for node in nodes {
        for dep in dependencies(node) {
            successors.entry(dep).or_default().push(node.clone());
            *in_degree.entry(node.clone()).or_insert(0) += 1;
        }
    }

    let mut queue: VecDeque<T> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(node, _)| node.clone())
        .collect();
    // Stable ordering: nodes become ready in their original input order.
    let position: HashMap<&T, usize> = nodes.iter().enumerate().map(|(i, n)| (n, i)).collect();
    let mut queue: Vec<T> = queue.drain(..).collect();
    queue.sort_by_key(|n| position.get(n).copied().unwrap_or(usize::MAX));
    let mut queue: VecDeque<T> = queue.into();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(node) = queue.pop_front() {
        order.push(node.clone());
        if let Some(children) = successors.get(&node) {
            let mut ready = Vec::new();
            for child in children {
                let degree = in_degree.get_mut(child).expect("child was seeded into in_degree");
                *degree -= 1;
                if *degree == 0 {
                    ready.push(child.clone());
                }
            }
            ready.sort_by_key(|n| position.get(n).copied().unwrap_or(usize::MAX));
            for r in ready {
                queue.push_back(r);
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck: Vec<T> = nodes.iter().filter(|n| !order.contains(n)).cloned().collect();
        return Err(OrchestratorError::Cycle(format!("{stuck:?}")));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_a_simple_chain() {
        let nodes = vec!["extract", "analyze", "estimate"];
        let deps = |n: &&str| match *n {
            "analyze" => vec!["extract"],
            "estimate" => vec!["analyze"],
            _ => vec![],
        };
        let order = topological_sort(&nodes, deps).unwrap();
        assert_eq!(order, vec!["extract", "analyze", "estimate"]);
    }

    #[test]
    fn detects_a_cycle() {
        let nodes = vec!["a", "b"];
        let deps = |n: &&str| match *n {
            "a" => vec!["b"],
            "b" => vec!["a"],
            _ => vec![],
        };
        assert!(matches!(topological_sort(&nodes, deps), Err(OrchestratorError::Cycle(_))));
    }

    #[test]
    fn independent_nodes_keep_input_order() {
        let nodes = vec!["x", "y", "z"];
        let order = topological_sort(&nodes, |_: &&str| Vec::new()).unwrap();
        assert_eq!(order, vec!["x", "y", "z"]);
    }
}
