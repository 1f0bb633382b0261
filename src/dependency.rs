//! Dependency graph driving cascading invalidation.
//!
//! Nodes live in a flat map keyed by cache key; edges are key sets, so the
//! graph may contain cycles and may point at keys with no cached entry.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};

/// One key's position in the dependency graph.
#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub key: String,
    /// Keys this key depends on.
    pub dependencies: BTreeSet<String>,
    /// Keys that depend on this key.
    pub dependents: BTreeSet<String>,
    pub last_updated: DateTime<Utc>,
    pub update_count: u64,
}

impl DependencyNode {
    fn new(key: &str, now: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            last_updated: now,
            update_count: 0,
        }
    }

    fn is_isolated(&self) -> bool {
        self.dependencies.is_empty() && self.dependents.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, DependencyNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `key`'s dependency list.
    ///
    /// Dependencies that have no node yet get a placeholder, since a key may
    /// depend on something that is cached later.
    pub fn register(&mut self, key: &str, dependencies: &BTreeSet<String>, now: DateTime<Utc>) {
        let previous = self
            .nodes
            .get(key)
            .map(|node| node.dependencies.clone())
            .unwrap_or_default();

        for stale in previous.difference(dependencies) {
            self.unlink(key, stale);
        }

        for dep in dependencies {
            self.nodes
                .entry(dep.clone())
                .or_insert_with(|| DependencyNode::new(dep, now))
                .dependents
                .insert(key.to_string());
        }

        let node = self
            .nodes
            .entry(key.to_string())
            .or_insert_with(|| DependencyNode::new(key, now));
        node.dependencies = dependencies.clone();
        node.last_updated = now;
        node.update_count += 1;

        if node.is_isolated() {
            self.nodes.remove(key);
        }
    }

    /// Drop `key`'s outgoing edges. Incoming edges belong to the dependents
    /// and stay until those keys re-register.
    pub fn detach(&mut self, key: &str) {
        let dependencies = match self.nodes.get_mut(key) {
            Some(node) => std::mem::take(&mut node.dependencies),
            None => return,
        };
        for dep in &dependencies {
            self.unlink(key, dep);
        }
        self.prune(key);
    }

    /// Breadth-first traversal from `root` through dependents.
    ///
    /// Keys already in `visited` are skipped, and every reached key is added
    /// to it, so a shared set bounds a batch of cascades. Returns the keys
    /// reached by this call in visitation order, `root` first.
    pub fn cascade(&self, root: &str, visited: &mut HashSet<String>) -> Vec<String> {
        let mut order = Vec::new();
        if !visited.insert(root.to_string()) {
            return order;
        }

        let mut queue = VecDeque::from([root.to_string()]);
        while let Some(key) = queue.pop_front() {
            if let Some(node) = self.nodes.get(&key) {
                for dependent in &node.dependents {
                    if visited.insert(dependent.clone()) {
                        queue.push_back(dependent.clone());
                    }
                }
            }
            order.push(key);
        }
        order
    }

    pub fn node(&self, key: &str) -> Option<&DependencyNode> {
        self.nodes.get(key)
    }

    pub fn dependents_of(&self, key: &str) -> Vec<String> {
        self.nodes
            .get(key)
            .map(|node| node.dependents.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|n| n.dependencies.len()).sum()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    fn unlink(&mut self, dependent: &str, dependency: &str) {
        if let Some(node) = self.nodes.get_mut(dependency) {
            node.dependents.remove(dependent);
        }
        self.prune(dependency);
    }

    fn prune(&mut self, key: &str) {
        if self.nodes.get(key).is_some_and(DependencyNode::is_isolated) {
            self.nodes.remove(key);
        }
    }
}
