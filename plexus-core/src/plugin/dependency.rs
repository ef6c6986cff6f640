//! Dependency graph and load ordering.
//!
//! Registration is transactional: candidate edges are checked against a
//! cloned graph and only committed when the clone stays acyclic, so a
//! rejected registration leaves the live graph untouched.
//!
//! Load order is a DFS post-order over the requested ids. Ties between
//! independent plugins follow the order of the input ids, and a plugin's
//! dependencies are visited in the order they were declared.

use crate::plugin::descriptor::{DependencySpec, PluginDescriptor};
use crate::plugin::error::{DependencyError, DependencyResult};
use crate::plugin::version::PluginVersion;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct DependencyGraph {
    /// Plugin id to required ids, in declaration order
    requires: HashMap<String, Vec<String>>,
    /// Plugin id to the ids requiring it
    required_by: HashMap<String, BTreeSet<String>>,
    /// Registered plugin versions
    versions: HashMap<String, PluginVersion>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

impl DependencyGraph {
    fn contains(&self, plugin_id: &str) -> bool {
        self.versions.contains_key(plugin_id)
    }

    fn insert(&mut self, plugin_id: &str, version: PluginVersion, requires: Vec<String>) {
        if let Some(previous) = self.requires.remove(plugin_id) {
            for dependency in previous {
                if let Some(dependents) = self.required_by.get_mut(&dependency) {
                    dependents.remove(plugin_id);
                }
            }
        }
        for dependency in &requires {
            self.required_by
                .entry(dependency.clone())
                .or_default()
                .insert(plugin_id.to_string());
        }
        self.requires.insert(plugin_id.to_string(), requires);
        self.versions.insert(plugin_id.to_string(), version);
    }

    fn remove(&mut self, plugin_id: &str) -> bool {
        let existed = self.versions.remove(plugin_id).is_some();
        if let Some(requires) = self.requires.remove(plugin_id) {
            for dependency in requires {
                if let Some(dependents) = self.required_by.get_mut(&dependency) {
                    dependents.remove(plugin_id);
                    if dependents.is_empty() {
                        self.required_by.remove(&dependency);
                    }
                }
            }
        }
        if let Some(dependents) = self.required_by.remove(plugin_id) {
            for dependent in dependents {
                if let Some(requires) = self.requires.get_mut(&dependent) {
                    requires.retain(|dependency| dependency != plugin_id);
                }
            }
        }
        existed
    }

    /// Three-color DFS from `start`; returns the cycle path when one is found.
    fn find_cycle(&self, start: &str) -> Option<Vec<String>> {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();
        self.visit(start, &mut marks, &mut path)
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(node) {
            Some(Mark::Done) => return None,
            Some(Mark::InProgress) => {
                let begin = path.iter().position(|id| *id == node).unwrap_or(0);
                let mut cycle: Vec<String> = path[begin..].iter().map(|id| id.to_string()).collect();
                cycle.push(node.to_string());
                return Some(cycle);
            }
            None => {}
        }

        marks.insert(node, Mark::InProgress);
        path.push(node);
        if let Some(requires) = self.requires.get(node) {
            for dependency in requires {
                if let Some(cycle) = self.visit(dependency, marks, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        marks.insert(node, Mark::Done);
        None
    }
}

/// Serialized owner of the dependency graph.
#[derive(Debug, Default)]
pub struct DependencyResolver {
    graph: RwLock<DependencyGraph>,
}

impl DependencyResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `plugin_id` with its requirements.
    ///
    /// Fails without touching the graph when a dependency is absent, when a
    /// version constraint is unmet, or when the new edges close a cycle.
    /// Registering an id again replaces its previous edges.
    pub fn register_dependencies(
        &self,
        plugin_id: &str,
        version: &PluginVersion,
        dependencies: &[DependencySpec],
    ) -> DependencyResult<()> {
        let mut graph = self.graph.write();

        for spec in dependencies {
            if spec.id == plugin_id {
                return Err(DependencyError::CycleDetected {
                    plugin_id: plugin_id.to_string(),
                    cycle: vec![plugin_id.to_string(), plugin_id.to_string()],
                });
            }
            Self::check_spec(&graph, plugin_id, spec)?;
        }

        let mut candidate = graph.clone();
        candidate.insert(
            plugin_id,
            version.clone(),
            dependencies.iter().map(|spec| spec.id.clone()).collect(),
        );
        if let Some(cycle) = candidate.find_cycle(plugin_id) {
            tracing::warn!(plugin_id = %plugin_id, cycle = ?cycle, "Rejected dependency registration");
            return Err(DependencyError::CycleDetected {
                plugin_id: plugin_id.to_string(),
                cycle,
            });
        }

        *graph = candidate;
        tracing::debug!(
            plugin_id = %plugin_id,
            dependencies = dependencies.len(),
            "Dependencies registered"
        );
        Ok(())
    }

    fn check_spec(graph: &DependencyGraph, plugin_id: &str, spec: &DependencySpec) -> DependencyResult<()> {
        let actual = graph.versions.get(&spec.id).ok_or_else(|| DependencyError::Missing {
            plugin_id: plugin_id.to_string(),
            dependency: spec.id.clone(),
        })?;

        if let Some(required) = &spec.min_version {
            if !actual.satisfies(required) {
                return Err(DependencyError::VersionMismatch {
                    plugin_id: plugin_id.to_string(),
                    dependency: spec.id.clone(),
                    required: required.to_string(),
                    actual: actual.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Read-only presence and version check of a descriptor's dependencies.
    pub fn check_dependencies(&self, descriptor: &PluginDescriptor) -> DependencyResult<()> {
        let graph = self.graph.read();
        for spec in &descriptor.dependencies {
            Self::check_spec(&graph, &descriptor.id, spec)?;
        }
        Ok(())
    }

    /// Remove `plugin_id` and its edges in both directions.
    ///
    /// Dependents stay registered; later registrations naming `plugin_id`
    /// fail until it is registered again.
    pub fn unregister(&self, plugin_id: &str) -> bool {
        let removed = self.graph.write().remove(plugin_id);
        if removed {
            tracing::debug!(plugin_id = %plugin_id, "Dependencies unregistered");
        }
        removed
    }

    /// Like [`unregister`](Self::unregister), but refuses while anything
    /// still requires `plugin_id`.
    ///
    /// The check and the removal happen under one write lock, so no
    /// registration can add a dependent in between.
    pub fn unregister_if_unreferenced(&self, plugin_id: &str) -> DependencyResult<bool> {
        let mut graph = self.graph.write();
        if let Some(dependents) = graph.required_by.get(plugin_id).filter(|d| !d.is_empty()) {
            return Err(DependencyError::HasDependents {
                plugin_id: plugin_id.to_string(),
                dependents: dependents.iter().cloned().collect(),
            });
        }
        let removed = graph.remove(plugin_id);
        if removed {
            tracing::debug!(plugin_id = %plugin_id, "Dependencies unregistered");
        }
        Ok(removed)
    }

    /// Topological order of `ids`, dependencies first.
    ///
    /// Only edges between ids in the input are followed.
    pub fn compute_load_order(&self, ids: &[String]) -> DependencyResult<Vec<String>> {
        let graph = self.graph.read();
        let subset: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let edges = |id: &str| -> Vec<String> {
            graph
                .requires
                .get(id)
                .map(|requires| requires.iter().filter(|d| subset.contains(d.as_str())).cloned().collect())
                .unwrap_or_default()
        };
        order_by(ids, edges)
    }

    /// Topological order of descriptors not yet registered, using their
    /// declared dependencies.
    pub fn order_descriptors(descriptors: &[&PluginDescriptor]) -> DependencyResult<Vec<String>> {
        let ids: Vec<String> = descriptors.iter().map(|d| d.id.clone()).collect();
        let subset: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let by_id: HashMap<&str, &PluginDescriptor> = descriptors.iter().map(|d| (d.id.as_str(), *d)).collect();
        let edges = |id: &str| -> Vec<String> {
            by_id
                .get(id)
                .map(|d| {
                    d.dependencies
                        .iter()
                        .filter(|spec| subset.contains(spec.id.as_str()))
                        .map(|spec| spec.id.clone())
                        .collect()
                })
                .unwrap_or_default()
        };
        order_by(&ids, edges)
    }

    /// Direct dependents of `plugin_id`, sorted.
    pub fn dependents_of(&self, plugin_id: &str) -> Vec<String> {
        self.graph
            .read()
            .required_by
            .get(plugin_id)
            .map(|dependents| dependents.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Direct dependencies of `plugin_id`, in declaration order.
    pub fn dependencies_of(&self, plugin_id: &str) -> Vec<String> {
        self.graph.read().requires.get(plugin_id).cloned().unwrap_or_default()
    }

    /// Every plugin that transitively requires `plugin_id`, sorted.
    pub fn transitive_dependents(&self, plugin_id: &str) -> Vec<String> {
        let graph = self.graph.read();
        let mut seen = BTreeSet::new();
        let mut frontier = vec![plugin_id.to_string()];
        while let Some(id) = frontier.pop() {
            if let Some(dependents) = graph.required_by.get(&id) {
                for dependent in dependents {
                    if seen.insert(dependent.clone()) {
                        frontier.push(dependent.clone());
                    }
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Registered version of `plugin_id`.
    pub fn version_of(&self, plugin_id: &str) -> Option<PluginVersion> {
        self.graph.read().versions.get(plugin_id).cloned()
    }

    /// Whether `plugin_id` is registered.
    pub fn contains(&self, plugin_id: &str) -> bool {
        self.graph.read().contains(plugin_id)
    }

    /// Edge set snapshot, for inspection and comparison.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.graph
            .read()
            .requires
            .iter()
            .map(|(id, requires)| (id.clone(), requires.clone()))
            .collect()
    }
}

fn order_by<F>(ids: &[String], edges: F) -> DependencyResult<Vec<String>>
where
    F: Fn(&str) -> Vec<String>,
{
    let mut marks: HashMap<String, Mark> = HashMap::new();
    let mut order = Vec::with_capacity(ids.len());

    fn visit<F: Fn(&str) -> Vec<String>>(
        id: &str,
        edges: &F,
        marks: &mut HashMap<String, Mark>,
        path: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> DependencyResult<()> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                let begin = path.iter().position(|p| p == id).unwrap_or(0);
                let mut cycle = path[begin..].to_vec();
                cycle.push(id.to_string());
                return Err(DependencyError::CycleDetected {
                    plugin_id: id.to_string(),
                    cycle,
                });
            }
            None => {}
        }

        marks.insert(id.to_string(), Mark::InProgress);
        path.push(id.to_string());
        for dependency in edges(id) {
            visit(&dependency, edges, marks, path, order)?;
        }
        path.pop();
        marks.insert(id.to_string(), Mark::Done);
        order.push(id.to_string());
        Ok(())
    }

    let mut path = Vec::new();
    for id in ids {
        visit(id, &edges, &mut marks, &mut path, &mut order)?;
    }
    Ok(order)
}
