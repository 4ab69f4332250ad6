//! Runtime dependency and containment bookkeeping.
//!
//! Tracks which beans depend on which, so that destruction can proceed
//! dependents-first, and which beans contain which, so that inner beans
//! die with their outer bean.
//!
//! Edges are recorded symmetrically: `dependents_of` is keyed by the
//! depended-upon bean, `depends_on` by the depending bean. Each map has
//! its own lock; the singleton mutex is acquired outermost when a caller
//! needs more than one.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tracing::trace;

/// Dependency and containment edges between registered beans.
#[derive(Default)]
pub(crate) struct DependencyTracker {
    /// name → beans that depend on it (insertion order preserved)
    dependents_of: Mutex<HashMap<String, Vec<String>>>,
    /// bean → names it depends on
    depends_on: Mutex<HashMap<String, Vec<String>>>,
    /// outer → beans it contains
    contained_of: Mutex<HashMap<String, Vec<String>>>,
}

impl DependencyTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records "`dependent` depends on `name`". Duplicate edges are no-ops.
    pub(crate) fn register_dependent(&self, name: &str, dependent: &str) {
        {
            let mut dependents = self.dependents_of.lock();
            let entry = dependents.entry(name.to_string()).or_default();
            if entry.iter().any(|d| d == dependent) {
                return;
            }
            entry.push(dependent.to_string());
        }
        self.depends_on
            .lock()
            .entry(dependent.to_string())
            .or_default()
            .push(name.to_string());
        trace!(bean = %name, dependent = %dependent, "Recorded dependency edge");
    }

    /// Records "`outer` contains `inner`". Duplicate edges are no-ops.
    ///
    /// The caller is expected to also record the implied dependency edge
    /// so that the outer bean dies before the inner one.
    pub(crate) fn register_contained(&self, inner: &str, outer: &str) {
        let mut contained = self.contained_of.lock();
        let entry = contained.entry(outer.to_string()).or_default();
        if entry.iter().any(|c| c == inner) {
            return;
        }
        entry.push(inner.to_string());
        trace!(outer = %outer, inner = %inner, "Recorded containment edge");
    }

    /// True if `dependent` is transitively reachable from `name` in the
    /// dependents graph. Re-entrant paths terminate via the visited set
    /// and count as unreachable.
    pub(crate) fn is_dependent(&self, name: &str, dependent: &str) -> bool {
        let dependents = self.dependents_of.lock();
        let mut visited = HashSet::new();
        is_dependent_inner(&dependents, name, dependent, &mut visited)
    }

    /// Direct dependents of `name`.
    pub(crate) fn dependents(&self, name: &str) -> Vec<String> {
        self.dependents_of
            .lock()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Names `name` depends on.
    pub(crate) fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.depends_on
            .lock()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn has_dependents(&self, name: &str) -> bool {
        self.dependents_of
            .lock()
            .get(name)
            .is_some_and(|d| !d.is_empty())
    }

    /// Removes and returns the dependents entry for `name`.
    pub(crate) fn take_dependents(&self, name: &str) -> Vec<String> {
        self.dependents_of
            .lock()
            .remove(name)
            .unwrap_or_default()
    }

    /// Removes and returns the containment entry for `name`.
    pub(crate) fn take_contained(&self, name: &str) -> Vec<String> {
        self.contained_of
            .lock()
            .remove(name)
            .unwrap_or_default()
    }

    /// Forgets a destroyed bean: removes it from every surviving
    /// dependents entry (dropping entries that become empty) and drops its
    /// own dependency record. The dependents lock is held for the whole
    /// pass.
    pub(crate) fn purge(&self, name: &str) {
        {
            let mut dependents = self.dependents_of.lock();
            dependents.retain(|_, entry| {
                entry.retain(|d| d != name);
                !entry.is_empty()
            });
        }
        self.depends_on.lock().remove(name);
        trace!(bean = %name, "Purged destroyed bean from dependency maps");
    }

    /// Drops every recorded edge.
    pub(crate) fn clear(&self) {
        self.dependents_of.lock().clear();
        self.depends_on.lock().clear();
        self.contained_of.lock().clear();
        trace!("Cleared dependency and containment maps");
    }
}

fn is_dependent_inner(
    dependents: &HashMap<String, Vec<String>>,
    name: &str,
    dependent: &str,
    visited: &mut HashSet<String>,
) -> bool {
    if !visited.insert(name.to_string()) {
        return false;
    }
    let Some(direct) = dependents.get(name) else {
        return false;
    };
    if direct.iter().any(|d| d == dependent) {
        return true;
    }
    direct
        .iter()
        .any(|d| is_dependent_inner(dependents, d, dependent, visited))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_edges_are_idempotent() {
        let tracker = DependencyTracker::new();
        tracker.register_dependent("a", "b");
        tracker.register_dependent("a", "b");

        assert_eq!(tracker.dependents("a"), vec!["b"]);
        assert_eq!(tracker.dependencies_of("b"), vec!["a"]);
    }

    #[test]
    fn transitive_reachability() {
        let tracker = DependencyTracker::new();
        tracker.register_dependent("a", "b");
        tracker.register_dependent("b", "c");

        assert!(tracker.is_dependent("a", "b"));
        assert!(tracker.is_dependent("a", "c"));
        assert!(!tracker.is_dependent("c", "a"));
    }

    #[test]
    fn reentrant_paths_terminate() {
        let tracker = DependencyTracker::new();
        tracker.register_dependent("a", "b");
        tracker.register_dependent("b", "a");

        // The visited set bounds the walk; no answer is fabricated
        assert!(tracker.is_dependent("a", "b"));
        assert!(tracker.is_dependent("b", "a"));
        assert!(!tracker.is_dependent("a", "ghost"));
    }

    #[test]
    fn purge_forgets_a_destroyed_bean() {
        let tracker = DependencyTracker::new();
        tracker.register_dependent("a", "b");
        tracker.register_dependent("c", "b");
        tracker.register_dependent("a", "d");

        tracker.purge("b");

        assert_eq!(tracker.dependents("a"), vec!["d"]);
        assert!(!tracker.has_dependents("c"));
        assert!(tracker.dependencies_of("b").is_empty());
    }

    #[test]
    fn containment_edges() {
        let tracker = DependencyTracker::new();
        tracker.register_contained("inner", "outer");
        tracker.register_contained("inner", "outer");

        assert_eq!(tracker.take_contained("outer"), vec!["inner"]);
        assert!(tracker.take_contained("outer").is_empty());
    }
}
