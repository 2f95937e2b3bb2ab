//! Dependency resolution.
//!
//! The resolver turns a plan's declared dependencies into a
//! [`DependencyGraph`]: override rules are applied first, runtime
//! dependencies are expanded transitively, cycles are rejected and the
//! result is ordered leaves first.
//!
//! A dependency is looked up in the [`PlanRepository`] first and in the
//! installed packages of the [`PackageStore`] second.

mod graph;
mod repo;

use std::collections::{HashMap, VecDeque};

use thiserror::Error;
use tracing::{debug, info};

pub use graph::{DepKind, DepNode, DependencyGraph, NodeSource};
pub use repo::PlanRepository;

use crate::plan::{PackageIdent, Plan, PlanError};
use crate::store::{PackageStore, StoreError};
use crate::studio::SessionConfig;

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("dependency cycle: {}", cycle.join(" -> "))]
  CyclicDependency { cycle: Vec<String> },

  #[error("unknown dependency {ident} (required by {required_by})")]
  UnknownDependency {
    ident: PackageIdent,
    required_by: PackageIdent,
  },

  #[error(transparent)]
  Plan(#[from] PlanError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Edges a build of a node would need, for cycle detection.
#[derive(Debug, Clone)]
struct Edges {
  runtime: Vec<PackageIdent>,
  /// Build edges; empty unless the node would have to be built.
  build: Vec<PackageIdent>,
}

pub struct Resolver<'a> {
  repo: &'a PlanRepository,
  store: &'a PackageStore,
}

impl<'a> Resolver<'a> {
  pub fn new(repo: &'a PlanRepository, store: &'a PackageStore) -> Self {
    Self { repo, store }
  }

  pub fn resolve(&self, plan: &Plan, config: &SessionConfig) -> Result<DependencyGraph, ResolveError> {
    let root = plan.ident();
    let effective = plan.effective_deps(config);
    if let Some(rule) = effective.applied_rule {
      debug!(plan = %root, rule, studio_type = %config.studio_type, "applied dependency override");
    }

    self.check_cycles(&root, &effective.runtime_deps, &effective.build_deps, config)?;

    let mut nodes: Vec<DepNode> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut queue: VecDeque<(PackageIdent, PackageIdent)> = effective
      .runtime_deps
      .iter()
      .chain(&effective.build_deps)
      .map(|dep| (dep.clone(), root.clone()))
      .collect();

    while let Some((request, required_by)) = queue.pop_front() {
      let key = request.key();
      if key == root.key() || seen.contains_key(&key) {
        continue;
      }
      let node = self.lookup(&request, &required_by, config)?;
      for dep in &node.runtime_deps {
        queue.push_back((dep.clone(), node.ident.clone()));
      }
      seen.insert(key, nodes.len());
      nodes.push(node);
    }

    mark_runtime(&mut nodes, &seen, &effective.runtime_deps);

    let build_keys = effective.build_deps.iter().map(PackageIdent::key).collect();
    let graph = DependencyGraph::new(root.clone(), nodes, build_keys)
      .map_err(|cycle| ResolveError::CyclicDependency { cycle })?;

    info!(plan = %root, deps = graph.len(), studio_type = %config.studio_type, "resolved dependencies");
    Ok(graph)
  }

  fn lookup(
    &self,
    request: &PackageIdent,
    required_by: &PackageIdent,
    config: &SessionConfig,
  ) -> Result<DepNode, ResolveError> {
    if let Some(plan) = self.repo.find(request) {
      return Ok(DepNode {
        ident: plan.ident(),
        requested: request.clone(),
        kind: DepKind::Build,
        runtime_deps: plan.effective_deps(config).runtime_deps,
        source: NodeSource::Plan(Box::new(plan.clone())),
      });
    }

    if let Some(pkg) = self.store.latest(request)? {
      return Ok(DepNode {
        ident: pkg.ident.clone(),
        requested: request.clone(),
        kind: DepKind::Build,
        runtime_deps: pkg.manifest.runtime_deps.clone(),
        source: NodeSource::Installed(Box::new(pkg)),
      });
    }

    Err(ResolveError::UnknownDependency {
      ident: request.clone(),
      required_by: required_by.clone(),
    })
  }

  /// Edges out of a non-root node, or `None` when it cannot be resolved.
  fn edges_of(&self, request: &PackageIdent, config: &SessionConfig) -> Result<Option<Edges>, ResolveError> {
    if let Some(plan) = self.repo.find(request) {
      let effective = plan.effective_deps(config);
      let build = if self.store.is_installed(&plan.ident())? {
        Vec::new()
      } else {
        effective.build_deps
      };
      return Ok(Some(Edges {
        runtime: effective.runtime_deps,
        build,
      }));
    }

    Ok(self.store.latest(request)?.map(|pkg| Edges {
      runtime: pkg.manifest.runtime_deps,
      build: Vec::new(),
    }))
  }

  /// Depth-first search with white/gray/black coloring over every edge a
  /// build of `root` would need.
  fn check_cycles(
    &self,
    root: &PackageIdent,
    runtime: &[PackageIdent],
    build: &[PackageIdent],
    config: &SessionConfig,
  ) -> Result<(), ResolveError> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Color {
      Gray,
      Black,
    }

    let mut colors: HashMap<String, Color> = HashMap::new();
    let mut edges: HashMap<String, Vec<PackageIdent>> = HashMap::new();
    edges.insert(root.key(), runtime.iter().chain(build).cloned().collect());

    // (key, next child index)
    let mut stack: Vec<(String, usize)> = vec![(root.key(), 0)];
    colors.insert(root.key(), Color::Gray);

    while let Some((key, child)) = stack.last_mut() {
      let next = edges.get(key.as_str()).and_then(|children| children.get(*child)).cloned();
      *child += 1;

      let Some(next) = next else {
        colors.insert(key.clone(), Color::Black);
        stack.pop();
        continue;
      };

      let next_key = next.key();
      match colors.get(&next_key) {
        Some(Color::Black) => continue,
        Some(Color::Gray) => {
          let start = stack.iter().position(|(k, _)| *k == next_key).unwrap_or(0);
          let mut cycle: Vec<String> = stack[start..].iter().map(|(k, _)| k.clone()).collect();
          cycle.push(next_key);
          return Err(ResolveError::CyclicDependency { cycle });
        }
        None => {}
      }

      if !edges.contains_key(&next_key) {
        let children = self
          .edges_of(&next, config)?
          .map(|e| e.runtime.into_iter().chain(e.build).collect())
          .unwrap_or_default();
        edges.insert(next_key.clone(), children);
      }
      colors.insert(next_key.clone(), Color::Gray);
      stack.push((next_key, 0));
    }

    Ok(())
  }
}

/// Mark every node reachable from the root's runtime deps as `Runtime`.
fn mark_runtime(nodes: &mut [DepNode], seen: &HashMap<String, usize>, roots: &[PackageIdent]) {
  let mut queue: VecDeque<String> = roots.iter().map(PackageIdent::key).collect();
  while let Some(key) = queue.pop_front() {
    let Some(&i) = seen.get(&key) else {
      continue;
    };
    if nodes[i].kind == DepKind::Runtime {
      continue;
    }
    nodes[i].kind = DepKind::Runtime;
    queue.extend(nodes[i].runtime_deps.iter().map(PackageIdent::key));
  }
}
