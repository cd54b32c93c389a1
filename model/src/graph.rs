use crate::error::{self, Result};
use std::collections::{BTreeMap, BTreeSet};
use topological_sort::TopologicalSort;

/// Group `nodes` into layers such that every node appears in a later layer than everything it
/// depends on. `dependencies` maps a node to the nodes it must come after; edges to nodes outside
/// of `nodes` are ignored. Each layer is sorted so the order is stable from one run to the next.
pub(crate) fn topological_layers(
    nodes: &BTreeSet<String>,
    dependencies: &BTreeMap<String, BTreeSet<String>>,
) -> Result<Vec<Vec<String>>> {
    let mut topo_sort = TopologicalSort::<String>::new();
    for node in nodes {
        topo_sort.insert(node.clone());
        for dependency in dependencies.get(node).into_iter().flatten() {
            if nodes.contains(dependency) {
                topo_sort.add_dependency(dependency.clone(), node.clone());
            }
        }
    }

    let mut layers = Vec::new();
    loop {
        let mut layer = topo_sort.pop_all();
        if layer.is_empty() {
            break;
        }
        layer.sort();
        layers.push(layer);
    }

    if !topo_sort.is_empty() {
        let placed: BTreeSet<&String> = layers.iter().flatten().collect();
        let resources: Vec<String> = nodes
            .iter()
            .filter(|node| !placed.contains(node))
            .cloned()
            .collect();
        return Err(error::CycleSnafu { resources }.build().into());
    }
    Ok(layers)
}
