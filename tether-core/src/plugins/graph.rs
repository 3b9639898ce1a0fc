//! Dependency graph between units
//!
//! Edges are keyed by unit *path*, not by id, so they survive a hot reload
//! of either endpoint. Values are plain ids/names; an edge pointing at a unit
//! that is no longer loaded is just a failed lookup in the registry.

use std::collections::{BTreeSet, HashMap};

use tether_plugin_api::unit_path;

/// Bidirectional dependency edges
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// `referents[path]`: ids of units that reference `path`
    referents: HashMap<String, BTreeSet<String>>,
    /// `references[path]`: names that units at `path` reference
    references: HashMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that unit `requester` references `target`.
    ///
    /// Returns `false` for self references, which are never recorded.
    pub fn add_edge(&mut self, requester: &str, target: &str) -> bool {
        let target_path = unit_path(target);
        let requester_path = unit_path(requester);
        if requester_path == target_path {
            return false;
        }
        self.referents
            .entry(target_path.to_string())
            .or_default()
            .insert(requester.to_string());
        self.references
            .entry(requester_path.to_string())
            .or_default()
            .insert(target.to_string());
        true
    }

    /// Ids of units that reference `path`
    pub fn referents(&self, path: &str) -> Vec<String> {
        self.referents
            .get(unit_path(path))
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Names referenced by units at `path`
    pub fn references(&self, path: &str) -> Vec<String> {
        self.references
            .get(unit_path(path))
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `requester` is recorded as referencing `target`
    pub fn depends_on(&self, requester: &str, target: &str) -> bool {
        self.referents
            .get(unit_path(target))
            .is_some_and(|ids| ids.contains(requester))
    }

    /// Drop the outgoing edges of `path`.
    ///
    /// Incoming edges stay: the units that reference `path` still do, and
    /// they are needed to cascade and retry when `path` is loaded again.
    /// Outgoing edges are recorded afresh when the unit body runs again.
    pub fn remove_outgoing(&mut self, path: &str) {
        let path = unit_path(path);
        let Some(targets) = self.references.remove(path) else {
            return;
        };
        for target in targets {
            let target_path = unit_path(&target);
            if let Some(ids) = self.referents.get_mut(target_path) {
                ids.retain(|id| unit_path(id) != path);
                if ids.is_empty() {
                    self.referents.remove(target_path);
                }
            }
        }
    }

    /// Number of recorded edges
    pub fn edge_count(&self) -> usize {
        self.referents.values().map(BTreeSet::len).sum()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.referents.clear();
        self.references.clear();
    }
}
