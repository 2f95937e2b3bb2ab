//! The resolved dependency graph of one plan.

use std::collections::{BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::plan::{PackageIdent, Plan};
use crate::store::{InstalledPackage, PackageStore, StoreError};

/// How the root plan needs a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepKind {
  /// Needed when the package runs, and therefore also while it builds.
  Runtime,
  /// Needed only while the root builds.
  Build,
}

/// Where a dependency comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSource {
  Plan(Box<Plan>),
  Installed(Box<InstalledPackage>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepNode {
  /// Resolved identity: plan version, or the installed fully qualified ident.
  pub ident: PackageIdent,
  /// The identifier as first declared.
  pub requested: PackageIdent,
  pub kind: DepKind,
  pub source: NodeSource,
  /// Runtime dependencies this node expands along.
  pub runtime_deps: Vec<PackageIdent>,
}

impl DepNode {
  pub fn key(&self) -> String {
    self.ident.key()
  }

  pub fn plan(&self) -> Option<&Plan> {
    match &self.source {
      NodeSource::Plan(plan) => Some(plan),
      NodeSource::Installed(_) => None,
    }
  }

  pub fn installed(&self) -> Option<&InstalledPackage> {
    match &self.source {
      NodeSource::Installed(pkg) => Some(pkg),
      NodeSource::Plan(_) => None,
    }
  }
}

/// Dependencies of a root plan in build order, leaves first.
///
/// Edges point from a dependent to its runtime dependency.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
  root: PackageIdent,
  graph: DiGraph<DepNode, ()>,
  index: HashMap<String, NodeIndex>,
  order: Vec<NodeIndex>,
  build_deps: Vec<String>,
}

impl DependencyGraph {
  /// Assemble the graph and order it with Kahn's algorithm, breaking ties by
  /// key. Returns the keys left over when the runtime edges contain a cycle.
  pub(crate) fn new(root: PackageIdent, nodes: Vec<DepNode>, build_deps: Vec<String>) -> Result<Self, Vec<String>> {
    let mut graph = DiGraph::new();
    let mut index = HashMap::new();
    for node in nodes {
      let key = node.key();
      let idx = graph.add_node(node);
      index.insert(key, idx);
    }

    let edges: Vec<(NodeIndex, NodeIndex)> = graph
      .node_indices()
      .flat_map(|idx| {
        graph[idx]
          .runtime_deps
          .iter()
          .filter_map(|dep| index.get(&dep.key()).map(|&dep_idx| (idx, dep_idx)))
          .collect::<Vec<_>>()
      })
      .collect();
    for (from, to) in edges {
      graph.update_edge(from, to, ());
    }

    let mut pending: HashMap<NodeIndex, usize> = graph
      .node_indices()
      .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Outgoing).count()))
      .collect();
    let mut ready: BTreeSet<(String, NodeIndex)> = pending
      .iter()
      .filter(|(_, count)| **count == 0)
      .map(|(&idx, _)| (graph[idx].key(), idx))
      .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some((_, idx)) = ready.pop_first() {
      order.push(idx);
      for dependent in graph.neighbors_directed(idx, Direction::Incoming) {
        if let Some(count) = pending.get_mut(&dependent) {
          *count -= 1;
          if *count == 0 {
            ready.insert((graph[dependent].key(), dependent));
          }
        }
      }
    }

    if order.len() != graph.node_count() {
      let mut stuck: Vec<String> = graph
        .node_indices()
        .filter(|idx| !order.contains(idx))
        .map(|idx| graph[idx].key())
        .collect();
      stuck.sort();
      return Err(stuck);
    }

    Ok(Self {
      root,
      graph,
      index,
      order,
      build_deps,
    })
  }

  pub fn root(&self) -> &PackageIdent {
    &self.root
  }

  /// Nodes in topological order, leaves first.
  pub fn nodes(&self) -> impl Iterator<Item = &DepNode> {
    self.order.iter().map(|&idx| &self.graph[idx])
  }

  /// Node keys in topological order.
  pub fn keys(&self) -> Vec<String> {
    self.nodes().map(DepNode::key).collect()
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }

  pub fn contains(&self, key: &str) -> bool {
    self.index.contains_key(key)
  }

  pub fn get(&self, key: &str) -> Option<&DepNode> {
    self.index.get(key).map(|&idx| &self.graph[idx])
  }

  /// Direct build dependencies of the root, in declaration order.
  pub fn build_deps(&self) -> Vec<&DepNode> {
    self.build_deps.iter().filter_map(|key| self.get(key)).collect()
  }

  /// Every node the root needs at runtime, in topological order.
  pub fn runtime_closure(&self) -> Vec<&DepNode> {
    self.nodes().filter(|node| node.kind == DepKind::Runtime).collect()
  }

  /// Direct runtime dependencies of the node with `key`.
  pub fn dependencies_of(&self, key: &str) -> Vec<&DepNode> {
    let Some(&idx) = self.index.get(key) else {
      return Vec::new();
    };
    let mut deps: Vec<&DepNode> = self
      .graph
      .neighbors_directed(idx, Direction::Outgoing)
      .map(|dep| &self.graph[dep])
      .collect();
    deps.sort_by_key(|node| node.key());
    deps
  }

  /// Plan nodes without an installed artifact in `store`, in build order.
  pub fn missing_from(&self, store: &PackageStore) -> Result<Vec<&DepNode>, StoreError> {
    let mut missing = Vec::new();
    for node in self.nodes() {
      if node.plan().is_some() && !store.is_installed(&node.ident)? {
        missing.push(node);
      }
    }
    Ok(missing)
  }
}
