//! Dependency graph management using `petgraph`.
//!
//! Builds a directed acyclic graph from resource declarations and resolves
//! the orders the engine needs: creation order, teardown order, and the
//! waves of resources that have no edge between them.

use std::collections::BTreeMap;

use petgraph::Direction;
use petgraph::graph::NodeIndex;
use skiff_common::error::{Result, SkiffError};
use skiff_common::types::ResourceName;

use crate::resource::ResourceDecl;

/// A dependency graph of resources.
#[derive(Debug)]
pub struct DependencyGraph {
    /// Internal petgraph representation.
    graph: petgraph::Graph<ResourceName, ()>,
    /// Node lookup by logical name.
    nodes: BTreeMap<ResourceName, NodeIndex>,
}

impl DependencyGraph {
    /// Creates an empty dependency graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: petgraph::Graph::new(),
            nodes: BTreeMap::new(),
        }
    }

    /// Builds the graph for a set of declarations.
    ///
    /// # Errors
    ///
    /// Returns an error if two declarations share a name or if a declaration
    /// references a resource that is not declared.
    pub fn from_declarations(decls: &[ResourceDecl]) -> Result<Self> {
        let mut graph = Self::new();
        for decl in decls {
            if graph.nodes.contains_key(&decl.name) {
                return Err(SkiffError::topology(
                    decl.name.as_str(),
                    "name",
                    "declared more than once",
                ));
            }
            let _ = graph.add_resource(decl.name.clone());
        }
        for decl in decls {
            let dependent = graph.nodes[&decl.name];
            for dep in decl.dependencies() {
                let Some(&dependency) = graph.nodes.get(&dep) else {
                    return Err(SkiffError::NotFound {
                        kind: "resource",
                        id: format!("\"{dep}\" referenced by \"{}\"", decl.name),
                    });
                };
                graph.add_dependency(dependent, dependency);
            }
        }
        Ok(graph)
    }

    /// Adds a resource node to the graph.
    pub fn add_resource(&mut self, name: ResourceName) -> NodeIndex {
        let idx = self.graph.add_node(name.clone());
        let _ = self.nodes.insert(name, idx);
        idx
    }

    /// Adds a dependency edge: `dependent` depends on `dependency`.
    ///
    /// The graph edge points from `dependency` to `dependent`
    /// so that topological sort yields dependencies first.
    pub fn add_dependency(&mut self, dependent: NodeIndex, dependency: NodeIndex) {
        if self.graph.find_edge(dependency, dependent).is_none() {
            let _ = self.graph.add_edge(dependency, dependent, ());
        }
    }

    /// Number of resources in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns `true` if the graph has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Returns a creation order: dependencies before their dependents.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains cycles.
    pub fn resolve_order(&self) -> Result<Vec<ResourceName>> {
        let indices = petgraph::algo::toposort(&self.graph, None).map_err(|_| SkiffError::Cycle)?;
        Ok(indices
            .iter()
            .filter_map(|&idx| self.graph.node_weight(idx).cloned())
            .collect())
    }

    /// Returns a teardown order: dependents before their dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains cycles.
    pub fn teardown_order(&self) -> Result<Vec<ResourceName>> {
        let mut order = self.resolve_order()?;
        order.reverse();
        Ok(order)
    }

    /// Returns node indices in teardown order.
    ///
    /// Unlike [`Self::teardown_order`] this stays unambiguous when several
    /// nodes carry the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains cycles.
    pub fn teardown_nodes(&self) -> Result<Vec<NodeIndex>> {
        let mut order =
            petgraph::algo::toposort(&self.graph, None).map_err(|_| SkiffError::Cycle)?;
        order.reverse();
        Ok(order)
    }

    /// Groups resources into waves: every resource's dependencies lie in
    /// earlier waves, and resources within a wave are independent.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains cycles.
    pub fn waves(&self) -> Result<Vec<Vec<ResourceName>>> {
        let order = petgraph::algo::toposort(&self.graph, None).map_err(|_| SkiffError::Cycle)?;
        let mut depth: BTreeMap<NodeIndex, usize> = BTreeMap::new();
        let mut waves: Vec<Vec<ResourceName>> = Vec::new();
        for idx in order {
            let level = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter_map(|dep| depth.get(&dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            let _ = depth.insert(idx, level);
            if waves.len() <= level {
                waves.resize_with(level + 1, Vec::new);
            }
            waves[level].push(self.graph[idx].clone());
        }
        for wave in &mut waves {
            wave.sort();
        }
        Ok(waves)
    }

    /// Returns the direct dependencies of `name`.
    #[must_use]
    pub fn dependencies_of(&self, name: &ResourceName) -> Vec<ResourceName> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Returns the direct dependents of `name`.
    #[must_use]
    pub fn dependents_of(&self, name: &ResourceName) -> Vec<ResourceName> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Returns `true` if `from` depends on `to`, directly or transitively.
    #[must_use]
    pub fn depends_on(&self, from: &ResourceName, to: &ResourceName) -> bool {
        match (self.nodes.get(to), self.nodes.get(from)) {
            (Some(&to), Some(&from)) if to != from => {
                petgraph::algo::has_path_connecting(&self.graph, to, from, None)
            }
            _ => false,
        }
    }

    fn neighbors(&self, name: &ResourceName, direction: Direction) -> Vec<ResourceName> {
        let Some(&idx) = self.nodes.get(name) else {
            return Vec::new();
        };
        let mut names: Vec<_> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        names.sort();
        names
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}
