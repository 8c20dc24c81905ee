use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::planner::{ActionType, ChangeOrder};

/// Execution graph over change-step ids. An edge A -> B means A must finish
/// before B starts.
pub type ChangeGraph = DiGraph<String, ()>;

/// Order `nodes` (id, dependency ids) so that every dependency precedes its
/// dependents.
///
/// Kahn's algorithm; among ready nodes the one declared first wins, so the
/// result is stable across runs. Unknown dependencies and cycles are planning
/// errors.
pub fn topological_order(nodes: &[(String, Vec<String>)]) -> Result<Vec<String>> {
    let position: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, (id, _))| (id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, (id, deps)) in nodes.iter().enumerate() {
        for dep in deps {
            let Some(&from) = position.get(dep.as_str()) else {
                return Err(EngineError::planning(format!(
                    "resource '{}' depends on unknown resource '{}'",
                    id, dep
                )));
            };
            dependents[from].push(i);
            in_degree[i] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &deg)| deg == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut ordered = Vec::with_capacity(nodes.len());
    while let Some(Reverse(i)) = ready.pop() {
        ordered.push(nodes[i].0.clone());
        for &next in &dependents[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if ordered.len() != nodes.len() {
        let stuck: Vec<&str> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg > 0)
            .map(|(i, _)| nodes[i].0.as_str())
            .collect();
        return Err(EngineError::planning(format!(
            "dependency cycle detected among: {}",
            stuck.join(", ")
        )));
    }
    Ok(ordered)
}

/// Build the execution graph for `order`.
///
/// Creates and updates follow the desired resource's `depends_on`. Deletes
/// run against the recorded edges reversed, so a dependent is removed before
/// what it depends on.
pub fn build_change_dag(order: &ChangeOrder) -> Result<(ChangeGraph, HashMap<String, NodeIndex>)> {
    let mut graph = ChangeGraph::new();
    let mut node_map: HashMap<String, NodeIndex> = HashMap::new();

    for key in &order.step_keys {
        let idx = graph.add_node(key.clone());
        node_map.insert(key.clone(), idx);
    }

    for step in order.steps() {
        let this = node_map[&step.id];
        let (resource, reversed) = match step.action {
            ActionType::Delete => (step.from.as_ref(), true),
            _ => (step.to.as_ref(), false),
        };
        let Some(resource) = resource else { continue };
        for dep in &resource.depends_on {
            let Some(&other) = node_map.get(dep) else {
                debug!(id = %step.id, dependency = %dep, "Dependency has no change step; edge dropped");
                continue;
            };
            if reversed {
                graph.update_edge(this, other, ());
            } else {
                graph.update_edge(other, this, ());
            }
        }
    }

    if petgraph::algo::is_cyclic_directed(&graph) {
        return Err(EngineError::planning("circular dependency detected in change graph"));
    }
    Ok((graph, node_map))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, deps: &[&str]) -> (String, Vec<String>) {
        (id.to_string(), deps.iter().map(|d| d.to_string()).collect())
    }

    #[test]
    fn ties_follow_declaration_order() {
        let nodes = vec![node("c", &[]), node("b", &["a"]), node("a", &[]), node("d", &[])];
        let order = topological_order(&nodes).unwrap();
        assert_eq!(order, vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn cycle_is_reported() {
        let nodes = vec![node("a", &["b"]), node("b", &["a"]), node("c", &[])];
        let err = topological_order(&nodes).unwrap_err();
        assert!(matches!(err, EngineError::Planning { .. }));
        assert!(err.to_string().contains("a, b"));
    }

    #[test]
    fn unknown_dependency_is_reported() {
        let nodes = vec![node("a", &["ghost"])];
        let err = topological_order(&nodes).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
