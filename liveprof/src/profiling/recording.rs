//! Mutable statistics tree filled while the profiler runs.
//!
//! Nodes live in an arena and are addressed by [`NodeId`], so an open span
//! can keep pointing at its node while other threads add siblings. The tree
//! structure survives [`RecordingStats::clear`]; only the counters are reset,
//! and nodes that recorded nothing in a window are pruned when freezing.

use std::collections::HashMap;
use std::time::Duration;

use liveprof_common::{StatNode, StatsSnapshot};

/// Index of a node in a [`RecordingStats`] arena.
pub type NodeId = usize;

/// The unnamed root.
pub const ROOT: NodeId = 0;

#[derive(Debug)]
struct RecordingNode {
    name: String,
    calls: u64,
    total_time: Duration,
    children: Vec<NodeId>,
    index: HashMap<String, NodeId>,
    /// Generation in which `seq` was assigned.
    seen_generation: u64,
    /// First-seen position within `seen_generation`.
    seq: u64,
}

impl RecordingNode {
    fn new(name: String, generation: u64, seq: u64) -> Self {
        Self {
            name,
            calls: 0,
            total_time: Duration::ZERO,
            children: Vec::new(),
            index: HashMap::new(),
            seen_generation: generation,
            seq,
        }
    }
}

#[derive(Debug)]
pub struct RecordingStats {
    nodes: Vec<RecordingNode>,
    generation: u64,
    next_seq: u64,
}

impl Default for RecordingStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingStats {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![RecordingNode::new(String::new(), 0, 0)],
            generation: 0,
            next_seq: 1,
        }
    }

    /// Incremented by every [`clear`](Self::clear).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of nodes ever created, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Child of `parent` named `name`, created on first use.
    ///
    /// Re-encountering a name returns the existing node, so siblings stay
    /// unique and keep the order in which they were first seen.
    pub fn ensure_child(&mut self, parent: NodeId, name: &str) -> NodeId {
        let generation = self.generation;
        if let Some(&id) = self.nodes[parent].index.get(name) {
            let node = &mut self.nodes[id];
            if node.seen_generation != generation {
                node.seen_generation = generation;
                node.seq = self.next_seq;
                self.next_seq += 1;
            }
            return id;
        }

        let id = self.nodes.len();
        self.nodes.push(RecordingNode::new(name.to_string(), generation, self.next_seq));
        self.next_seq += 1;
        let parent_node = &mut self.nodes[parent];
        parent_node.children.push(id);
        parent_node.index.insert(name.to_string(), id);
        id
    }

    pub fn record_entering(&mut self, node: NodeId) {
        self.nodes[node].calls += 1;
    }

    pub fn record_leaving(&mut self, node: NodeId, elapsed: Duration) {
        self.nodes[node].total_time += elapsed;
    }

    #[must_use]
    pub fn calls(&self, node: NodeId) -> u64 {
        self.nodes[node].calls
    }

    /// Reset all counters and start a new generation.
    pub fn clear(&mut self) {
        for node in &mut self.nodes {
            node.calls = 0;
            node.total_time = Duration::ZERO;
        }
        self.generation += 1;
    }

    /// Copy the recording into an immutable snapshot.
    ///
    /// `cpu_time` and `wall_time` describe the window and become the root's
    /// own and total time. `windows` is the root's call count.
    #[must_use]
    pub fn freeze(&self, windows: u64, cpu_time: Duration, wall_time: Duration) -> StatsSnapshot {
        // A child is always pushed after its parent, so walking the arena
        // backwards freezes every subtree before the node that owns it.
        let mut frozen: Vec<Option<StatNode>> = Vec::with_capacity(self.nodes.len());
        frozen.resize_with(self.nodes.len(), || None);
        for id in (ROOT + 1..self.nodes.len()).rev() {
            let node = &self.nodes[id];
            let children = self.take_children(id, &mut frozen);
            if node.calls == 0 && node.total_time.is_zero() && children.is_empty() {
                continue;
            }
            // Nodes only passed through keep total = sum of children
            frozen[id] = Some(StatNode::new(
                node.name.clone(),
                node.calls,
                node.total_time.as_secs_f64(),
                children,
            ));
        }
        let children = self.take_children(ROOT, &mut frozen);
        StatsSnapshot::new(windows, cpu_time.as_secs_f64(), wall_time.as_secs_f64(), children)
    }

    /// Frozen children of `parent` in first-seen order; pruned ones are skipped.
    fn take_children(&self, parent: NodeId, frozen: &mut [Option<StatNode>]) -> Vec<StatNode> {
        let mut ids: Vec<NodeId> = self.nodes[parent].children.clone();
        ids.sort_by_key(|&id| self.nodes[id].seq);
        ids.into_iter().filter_map(|id| frozen[id].take()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_ensure_child_merges_by_name() {
        let mut stats = RecordingStats::new();
        let a = stats.ensure_child(ROOT, "a");
        let b = stats.ensure_child(ROOT, "b");
        assert_eq!(stats.ensure_child(ROOT, "a"), a);
        assert_ne!(a, b);
        assert_eq!(stats.len(), 3);
    }

    #[test]
    fn test_freeze_keeps_first_seen_order() {
        let mut stats = RecordingStats::new();
        for name in ["zeta", "alpha", "mid"] {
            let id = stats.ensure_child(ROOT, name);
            stats.record_entering(id);
            stats.record_leaving(id, MS);
        }
        let snapshot = stats.freeze(1, MS, 10 * MS);
        let names: Vec<_> = snapshot.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_recording_accumulates_calls_and_time() {
        let mut stats = RecordingStats::new();
        let foo = stats.ensure_child(ROOT, "foo");
        stats.record_entering(foo);
        stats.record_leaving(foo, 100 * MS);
        stats.record_entering(foo);
        stats.record_leaving(foo, 200 * MS);
        let bar = stats.ensure_child(foo, "bar");
        stats.record_entering(bar);
        stats.record_leaving(bar, 4 * MS);

        let snapshot = stats.freeze(1, 300 * MS, Duration::from_secs(2));
        let foo = snapshot.child("foo").unwrap();
        assert_eq!(foo.calls, 2);
        assert!((foo.total_time - 0.3).abs() < 1e-9);
        assert!((foo.own_time - 0.296).abs() < 1e-9);
        assert!(snapshot.is_consistent());
    }

    #[test]
    fn test_void_node_totals_children() {
        let mut stats = RecordingStats::new();
        let outer = stats.ensure_child(ROOT, "outer");
        let inner = stats.ensure_child(outer, "inner");
        stats.record_entering(inner);
        stats.record_leaving(inner, 5 * MS);

        let snapshot = stats.freeze(1, 5 * MS, 10 * MS);
        let outer = snapshot.child("outer").unwrap();
        assert_eq!(outer.calls, 0);
        assert!((outer.total_time - 0.005).abs() < 1e-9);
        assert_eq!(outer.own_time, 0.0);
    }

    #[test]
    fn test_clear_prunes_idle_nodes() {
        let mut stats = RecordingStats::new();
        let a = stats.ensure_child(ROOT, "a");
        stats.record_entering(a);
        stats.clear();
        assert_eq!(stats.generation(), 1);
        assert_eq!(stats.calls(a), 0);
        assert!(stats.freeze(0, Duration::ZERO, Duration::ZERO).is_empty());

        // Structure survives so open spans still resolve
        let b = stats.ensure_child(ROOT, "b");
        stats.record_entering(b);
        assert_eq!(stats.ensure_child(ROOT, "a"), a);
        stats.record_entering(a);
        let snapshot = stats.freeze(1, Duration::ZERO, MS);
        let names: Vec<_> = snapshot.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["b", "a"]);
    }

    #[test]
    fn test_freeze_deep_chain() {
        let mut stats = RecordingStats::new();
        let mut parent = ROOT;
        for _ in 0..1_000 {
            parent = stats.ensure_child(parent, "recurse");
            stats.record_entering(parent);
            stats.record_leaving(parent, MS);
        }
        let snapshot = stats.freeze(1, MS, Duration::from_secs(5));
        let mut depth = 0;
        let mut node = snapshot.child("recurse");
        while let Some(current) = node {
            depth += 1;
            node = current.child("recurse");
        }
        assert_eq!(depth, 1_000);
    }
}
