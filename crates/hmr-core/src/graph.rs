// SPDX-License-Identifier: Apache-2.0
//! Dependency graph (`spec.md` §3 "Dependency Graph", invariants I1–I3).
//!
//! This is a plain, non-thread-safe data structure. `hmr-watch` wraps one of
//! these behind a `parking_lot::RwLock` per the concurrency model in
//! `spec.md` §5 ("Dependency graph: protected by a reader-writer lock;
//! graph mutations are infrequent and batched").

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::HmrError;

/// Whether a dependency edge is load-bearing for correctness (`hard`) or
/// merely informative (`soft`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criticality {
    /// Correctness requires this dependency to be up to date.
    Hard,
    /// Informative only; staleness does not block a build.
    Soft,
}

#[derive(Debug, Clone)]
struct Edge {
    to: String,
    criticality: Criticality,
    weight: f64,
}

/// `G = (V, E)` where an edge `a -> b` means "a's build or correctness
/// requires b" (`spec.md` §3).
///
/// Invariants upheld by every public mutator:
/// - **I1**: the graph is acyclic immediately after any operation returns
///   `Ok`; [`DependencyGraph::add_edge`] rejects edges that would violate
///   this with [`HmrError::WouldCreateCycle`] and leaves the graph
///   unchanged.
/// - **I2**: [`DependencyGraph::remove_vertex`] removes all incident edges
///   in the same mutation.
/// - **I3**: [`DependencyGraph::topological_order`] is deterministic given
///   a tie-breaker on vertex identifier (lexicographic).
#[derive(Debug, Default)]
pub struct DependencyGraph {
    vertices: HashSet<String>,
    /// Outgoing edges: `a -> [edges to a's dependencies]`.
    out_edges: HashMap<String, Vec<Edge>>,
    /// Incoming edges, maintained for O(deg) vertex removal.
    in_edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Construct an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vertex. Returns `false` without mutating the graph if it
    /// already exists.
    pub fn add_vertex(&mut self, id: &str) -> bool {
        if self.vertices.contains(id) {
            return false;
        }
        self.vertices.insert(id.to_string());
        self.out_edges.entry(id.to_string()).or_default();
        self.in_edges.entry(id.to_string()).or_default();
        true
    }

    /// Returns `true` if `id` is a vertex in this graph.
    #[must_use]
    pub fn contains_vertex(&self, id: &str) -> bool {
        self.vertices.contains(id)
    }

    /// Number of vertices.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Remove a vertex and every edge incident to it (**I2**). Returns
    /// `false` if the vertex did not exist.
    pub fn remove_vertex(&mut self, id: &str) -> bool {
        if !self.vertices.remove(id) {
            return false;
        }
        if let Some(outs) = self.out_edges.remove(id) {
            for edge in outs {
                if let Some(ins) = self.in_edges.get_mut(&edge.to) {
                    ins.retain(|v| v != id);
                }
            }
        }
        if let Some(ins) = self.in_edges.remove(id) {
            for src in ins {
                if let Some(outs) = self.out_edges.get_mut(&src) {
                    outs.retain(|e| e.to != id);
                }
            }
        }
        true
    }

    /// Add edge `from -> to`. Both vertices must already exist. Rejects the
    /// edge with [`HmrError::WouldCreateCycle`] — leaving the graph
    /// unchanged — if `to` can already reach `from` (**I1**).
    pub fn add_edge(
        &mut self,
        from: &str,
        to: &str,
        criticality: Criticality,
        weight: f64,
    ) -> Result<(), HmrError> {
        if !self.vertices.contains(from) {
            return Err(HmrError::NotFound(format!("vertex {from}")));
        }
        if !self.vertices.contains(to) {
            return Err(HmrError::NotFound(format!("vertex {to}")));
        }
        if from == to || self.can_reach(to, from) {
            return Err(HmrError::WouldCreateCycle {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        self.out_edges.entry(from.to_string()).or_default().push(Edge {
            to: to.to_string(),
            criticality,
            weight,
        });
        self.in_edges.entry(to.to_string()).or_default().push(from.to_string());
        Ok(())
    }

    /// `true` if there is a directed path from `start` to `target`.
    #[must_use]
    pub fn can_reach(&self, start: &str, target: &str) -> bool {
        if start == target {
            return true;
        }
        let mut visited = HashSet::new();
        let mut stack = vec![start.to_string()];
        while let Some(node) = stack.pop() {
            if !visited.insert(node.clone()) {
                continue;
            }
            if node == target {
                return true;
            }
            if let Some(edges) = self.out_edges.get(&node) {
                for edge in edges {
                    stack.push(edge.to.clone());
                }
            }
        }
        false
    }

    /// Direct dependencies of `id` (the vertices `id` points to), in
    /// lexicographic order.
    #[must_use]
    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .out_edges
            .get(id)
            .map(|edges| edges.iter().map(|e| e.to.clone()).collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Direct dependents of `id` (vertices that point to `id`), in
    /// lexicographic order.
    #[must_use]
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        let mut out = self.in_edges.get(id).cloned().unwrap_or_default();
        out.sort();
        out
    }

    /// Criticality of the edge `from -> to`, if it exists.
    #[must_use]
    pub fn edge_criticality(&self, from: &str, to: &str) -> Option<Criticality> {
        self.out_edges
            .get(from)
            .and_then(|edges| edges.iter().find(|e| e.to == to))
            .map(|e| e.criticality)
    }

    /// Deterministic topological order of the full graph's vertices, with
    /// ties broken lexicographically (**I3**). Every predecessor appears
    /// before every successor reachable through a `from -> to` edge chain —
    /// i.e. dependencies come first, the dependent vertex last.
    #[must_use]
    pub fn topological_order(&self) -> Vec<String> {
        self.topological_order_of(&self.vertices.iter().cloned().collect::<Vec<_>>())
    }

    /// Deterministic topological order restricted to `subset` (and any
    /// edges between members of `subset`); vertices outside `subset` are
    /// ignored even if they participate in edges with members.
    #[must_use]
    pub fn topological_order_of(&self, subset: &[String]) -> Vec<String> {
        let members: HashSet<&str> = subset.iter().map(String::as_str).collect();

        // A member's indegree is its own number of not-yet-satisfied
        // dependencies (out-edges restricted to other members) — zero means
        // every dependency it has is already in `order`.
        let mut indegree: HashMap<&str, usize> = members.iter().map(|&v| (v, 0)).collect();
        for &v in &members {
            if let Some(edges) = self.out_edges.get(v) {
                let count = edges.iter().filter(|e| members.contains(e.to.as_str())).count();
                indegree.insert(v, count);
            }
        }

        let mut ready: BTreeSet<&str> = indegree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&v, _)| v)
            .collect();

        let mut order = Vec::with_capacity(members.len());
        while let Some(&node) = ready.iter().next() {
            ready.remove(node);
            order.push(node.to_string());
            // `node` is now satisfied; its dependents (in_edges) each lose
            // one unsatisfied dependency.
            if let Some(dependents) = self.in_edges.get(node) {
                for dependent in dependents {
                    let dependent = dependent.as_str();
                    if !members.contains(dependent) {
                        continue;
                    }
                    if let Some(deg) = indegree.get_mut(dependent) {
                        *deg -= 1;
                        if *deg == 0 {
                            ready.insert(dependent);
                        }
                    }
                }
            }
        }
        order
    }

    /// Reorder `order` (a dependency-first list produced by
    /// [`topological_order_of`](Self::topological_order_of)) so dependencies
    /// precede dependents — this is the shape `compute_reload_order` needs:
    /// a changed leaf's own rebuild first, its dependents last.
    #[must_use]
    pub fn reload_order_from(&self, changed: &str) -> Vec<String> {
        if !self.vertices.contains(changed) {
            return Vec::new();
        }
        // Everything reachable *from* `changed` via dependents (in_edges)
        // must reload, because their build input changed.
        let mut affected = HashSet::new();
        let mut stack = vec![changed.to_string()];
        while let Some(node) = stack.pop() {
            if !affected.insert(node.clone()) {
                continue;
            }
            for dependent in self.dependents_of(&node) {
                stack.push(dependent);
            }
        }
        let subset: Vec<String> = affected.into_iter().collect();
        self.topological_order_of(&subset)
    }
}
