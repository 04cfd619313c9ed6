//! Dependency Graph Resolver
//!
//! Turns a set of requested modules into ordered parallel load groups. Every
//! module in group `k` has all of its dependencies in groups `0..k`.

use crate::core::errors::{ModlinkError, Result};
use crate::registry::{Module, ModuleId, Registry};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// A set of modules that can be loaded concurrently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadGroup {
    pub index: usize,
    /// Sorted lexicographically
    pub modules: Vec<ModuleId>,
}

impl LoadGroup {
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.modules.binary_search_by(|m| m.as_str().cmp(id)).is_ok()
    }
}

/// Flatten groups back into plain id lists
pub fn group_ids(groups: &[LoadGroup]) -> Vec<Vec<ModuleId>> {
    groups.iter().map(|g| g.modules.clone()).collect()
}

pub struct Resolver<'a> {
    registry: &'a Registry,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Requested ids plus every transitive dependency, snapshotted from the registry
    pub fn closure<'i, I>(&self, ids: I) -> Result<HashMap<ModuleId, Arc<Module>>>
    where
        I: IntoIterator<Item = &'i ModuleId>,
    {
        let mut snapshot: HashMap<ModuleId, Arc<Module>> = HashMap::new();
        let mut stack: Vec<(ModuleId, Option<ModuleId>)> =
            ids.into_iter().map(|id| (id.clone(), None)).collect();

        while let Some((id, parent)) = stack.pop() {
            if snapshot.contains_key(&id) {
                continue;
            }
            let module = match self.registry.get(&id) {
                Some(module) => module,
                None => {
                    return Err(match parent {
                        Some(parent) => ModlinkError::unknown_dependency(id, parent),
                        None => ModlinkError::unknown_module(id),
                    })
                }
            };
            for dep in &module.dependencies {
                if !snapshot.contains_key(dep) {
                    stack.push((dep.clone(), Some(id.clone())));
                }
            }
            snapshot.insert(id, module);
        }

        Ok(snapshot)
    }

    /// Resolve a set of modules into ordered load groups
    pub fn resolve<'i, I>(&self, ids: I) -> Result<Vec<LoadGroup>>
    where
        I: IntoIterator<Item = &'i ModuleId>,
    {
        let snapshot = self.closure(ids)?;
        let (graph, _) = build_graph(&snapshot);

        let mut in_degree: HashMap<NodeIndex, usize> = graph
            .node_indices()
            .map(|idx| {
                (
                    idx,
                    graph.neighbors_directed(idx, Direction::Incoming).count(),
                )
            })
            .collect();

        let mut ready: Vec<NodeIndex> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(idx, _)| *idx)
            .collect();

        let mut groups = Vec::new();
        let mut placed = 0usize;

        while !ready.is_empty() {
            ready.sort_by(|a, b| graph[*a].cmp(&graph[*b]));

            let mut next = Vec::new();
            for idx in &ready {
                for dependent in graph.neighbors_directed(*idx, Direction::Outgoing) {
                    if let Some(degree) = in_degree.get_mut(&dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(dependent);
                        }
                    }
                }
            }

            placed += ready.len();
            groups.push(LoadGroup {
                index: groups.len(),
                modules: ready.iter().map(|idx| graph[*idx].clone()).collect(),
            });
            ready = next;
        }

        if placed < graph.node_count() {
            return Err(ModlinkError::cycle(cycle_members(&graph)));
        }

        debug!(
            "Resolved {} modules into {} groups",
            placed,
            groups.len()
        );
        Ok(groups)
    }

    /// Resolve a single module and its dependencies
    pub fn resolve_one(&self, id: &str) -> Result<Vec<LoadGroup>> {
        let ids = [id.to_string()];
        self.resolve(ids.iter())
    }
}

/// Build a graph with an edge dependency -> dependent for every module in the snapshot
fn build_graph(
    snapshot: &HashMap<ModuleId, Arc<Module>>,
) -> (DiGraph<ModuleId, ()>, HashMap<ModuleId, NodeIndex>) {
    let mut graph = DiGraph::new();
    let mut node_indices = HashMap::new();

    let ordered: BTreeSet<&ModuleId> = snapshot.keys().collect();
    for id in &ordered {
        let idx = graph.add_node((*id).clone());
        node_indices.insert((*id).clone(), idx);
    }
    for id in ordered {
        let to = node_indices[id];
        for dep in &snapshot[id].dependencies {
            if let Some(&from) = node_indices.get(dep) {
                graph.add_edge(from, to, ());
            }
        }
    }

    (graph, node_indices)
}

/// Members of every strongly connected component that forms a cycle
fn cycle_members(graph: &DiGraph<ModuleId, ()>) -> Vec<ModuleId> {
    tarjan_scc(graph)
        .into_iter()
        .filter(|component| {
            component.len() > 1
                || graph.contains_edge(component[0], component[0])
        })
        .flatten()
        .map(|idx| graph[idx].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Category;
    use pretty_assertions::assert_eq;

    fn ids(list: &[&str]) -> Vec<ModuleId> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn registry(modules: Vec<Module>) -> Registry {
        Registry::from_modules(modules).unwrap()
    }

    #[test]
    fn test_diamond_groups() {
        let registry = registry(vec![
            Module::new("A", Category::Core),
            Module::new("B", Category::Core).with_dep("A"),
            Module::new("C", Category::Core).with_dep("A"),
            Module::new("D", Category::Core).with_deps(["B", "C"]),
        ]);
        let groups = Resolver::new(&registry).resolve(ids(&["D"]).iter()).unwrap();
        assert_eq!(
            group_ids(&groups),
            vec![ids(&["A"]), ids(&["B", "C"]), ids(&["D"])]
        );
        assert_eq!(groups[1].index, 1);
        assert!(groups[1].contains("C"));
    }

    #[test]
    fn test_lexicographic_tie_break() {
        let registry = registry(vec![
            Module::new("zeta", Category::Core),
            Module::new("alpha", Category::Core),
            Module::new("mid", Category::Core),
        ]);
        let groups = Resolver::new(&registry)
            .resolve(ids(&["zeta", "mid", "alpha"]).iter())
            .unwrap();
        assert_eq!(group_ids(&groups), vec![ids(&["alpha", "mid", "zeta"])]);
    }

    #[test]
    fn test_unknown_dependency() {
        let registry = registry(vec![Module::new("a", Category::Core).with_dep("ghost")]);
        let err = Resolver::new(&registry).resolve_one("a").unwrap_err();
        match err {
            ModlinkError::UnknownModule { id, referenced_by } => {
                assert_eq!(id, "ghost");
                assert_eq!(referenced_by.as_deref(), Some("a"));
            }
            other => panic!("Expected unknown module, got {other:?}"),
        }

        let err = Resolver::new(&registry).resolve_one("nope").unwrap_err();
        assert!(matches!(err, ModlinkError::UnknownModule { referenced_by: None, .. }));
    }

    #[test]
    fn test_cycle_detected_lists_only_cycle_members() {
        let registry = registry(vec![
            Module::new("root", Category::Core),
            Module::new("x", Category::Core).with_deps(["root", "z"]),
            Module::new("y", Category::Core).with_dep("x"),
            Module::new("z", Category::Core).with_dep("y"),
            Module::new("tail", Category::Core).with_dep("z"),
        ]);
        let err = Resolver::new(&registry).resolve_one("tail").unwrap_err();
        match err {
            ModlinkError::CycleDetected { ids: members } => {
                assert_eq!(members, ids(&["x", "y", "z"]))
            }
            other => panic!("Expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_disjoint_request_only_loads_closure() {
        let registry = registry(vec![
            Module::new("a", Category::Core),
            Module::new("b", Category::Core).with_dep("a"),
            Module::new("unrelated", Category::Core),
        ]);
        let groups = Resolver::new(&registry).resolve_one("b").unwrap();
        assert_eq!(group_ids(&groups), vec![ids(&["a"]), ids(&["b"])]);
    }

    #[test]
    fn test_empty_request() {
        let registry = Registry::new();
        let groups = Resolver::new(&registry).resolve(Vec::<ModuleId>::new().iter()).unwrap();
        assert!(groups.is_empty());
    }
}
