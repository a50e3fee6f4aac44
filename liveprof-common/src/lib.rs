//! # Shared Data Structures (Target ↔ Viewer)
//!
//! Defines the statistics tree and the wire messages that both ends of a
//! profiling connection agree on. The target process freezes its recording
//! into a [`StatsSnapshot`], the server wraps it in a [`Message`], and the
//! viewer decodes the very same types.
//!
//! ## Key Types
//!
//! - [`StatsSnapshot`] - Root of a frozen statistics tree (one profiling window)
//! - [`StatNode`] - One call site with its call count, times and children
//! - [`FlatStats`] - The tree collapsed by function name
//! - [`SortKey`] - Orderings offered by the viewer
//! - [`Message`] - Payload of one frame on the wire
//!
//! ## Invariants
//!
//! For every node `total_time >= own_time >= 0` and
//! `total_time >= Σ children.total_time`. Children keep first-seen order and
//! names are unique among siblings.
//!
//! ## Encoding
//!
//! `children` lists are serialized in pre-order with a child count per
//! entry instead of as nested objects, so a decoder never has to recurse
//! as deep as the profiled call stack.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::SystemTime;

mod preorder;

// ============================================================================
// Protocol Constants
// ============================================================================

/// Bumped whenever [`Message`] changes shape.
///
/// Sent in [`Message::Hello`]; a viewer refuses to talk to a server that
/// announces a different version.
pub const PROTOCOL_VERSION: u32 = 2;

// ============================================================================
// Statistics Tree
// ============================================================================

/// A frozen statistic for a single call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatNode {
    /// Function (or span) name.
    pub name: String,
    /// Optional qualifier shown as `module:name`.
    pub module: Option<String>,
    /// Number of times this call site was entered.
    pub calls: u64,
    /// Time spent here excluding children, in seconds.
    pub own_time: f64,
    /// Time spent here including children, in seconds.
    pub total_time: f64,
    /// Callees in first-seen order.
    #[serde(with = "preorder")]
    pub children: Vec<StatNode>,
}

impl StatNode {
    /// Build a node, deriving `own_time` from `total_time` and the children.
    ///
    /// `total_time` is raised to the children's sum when it is smaller, so
    /// the result always satisfies the tree invariants.
    #[must_use]
    pub fn new(name: impl Into<String>, calls: u64, total_time: f64, children: Vec<StatNode>) -> Self {
        let sub_time = children_time(&children);
        let total_time = total_time.max(sub_time).max(0.0);
        Self {
            name: name.into(),
            module: None,
            calls,
            own_time: (total_time - sub_time).max(0.0),
            total_time,
            children,
        }
    }

    /// Leaf node with no callees.
    #[must_use]
    pub fn leaf(name: impl Into<String>, calls: u64, total_time: f64) -> Self {
        Self::new(name, calls, total_time, Vec::new())
    }

    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// `module:name` when a module is known, otherwise just the name.
    #[must_use]
    pub fn regular_name(&self) -> String {
        match &self.module {
            Some(module) => format!("{module}:{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Calls of this node plus all calls below it.
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.calls + self.children.iter().map(StatNode::total_calls).sum::<u64>()
    }

    #[must_use]
    pub fn total_time_per_call(&self) -> f64 {
        per_call(self.total_time, self.total_calls())
    }

    #[must_use]
    pub fn own_time_per_call(&self) -> f64 {
        per_call(self.own_time, self.calls)
    }

    /// Direct child by name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&StatNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Children ordered by `key` (the stored order is left untouched).
    #[must_use]
    pub fn sorted_children(&self, key: SortKey) -> Vec<&StatNode> {
        sorted(&self.children, key)
    }

    /// Whether this node and all its descendants satisfy the tree invariants.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.own_time >= 0.0
            && self.total_time >= self.own_time
            && self.total_time >= children_time(&self.children)
            && has_unique_names(&self.children)
            && self.children.iter().all(StatNode::is_consistent)
    }
}

/// Root of a frozen statistics tree.
///
/// The root has no name. Its own time is the CPU time of the window and its
/// total time is the wall-clock duration of the window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub calls: u64,
    pub cpu_time: f64,
    pub wall_time: f64,
    #[serde(with = "preorder")]
    pub children: Vec<StatNode>,
}

impl StatsSnapshot {
    /// Build a root, clamping times so the invariants hold.
    #[must_use]
    pub fn new(calls: u64, cpu_time: f64, wall_time: f64, children: Vec<StatNode>) -> Self {
        let wall_time = wall_time.max(children_time(&children)).max(0.0);
        Self {
            calls,
            cpu_time: cpu_time.clamp(0.0, wall_time),
            wall_time,
            children,
        }
    }

    #[must_use]
    pub fn own_time(&self) -> f64 {
        self.cpu_time
    }

    #[must_use]
    pub fn total_time(&self) -> f64 {
        self.wall_time
    }

    /// Fraction of the window the process spent on CPU.
    #[must_use]
    pub fn cpu_usage(&self) -> f64 {
        if self.wall_time > 0.0 {
            self.cpu_time / self.wall_time
        } else {
            0.0
        }
    }

    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.calls + self.children.iter().map(StatNode::total_calls).sum::<u64>()
    }

    #[must_use]
    pub fn child(&self, name: &str) -> Option<&StatNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Follow a path of names from the root.
    #[must_use]
    pub fn find(&self, path: &[&str]) -> Option<&StatNode> {
        let (first, rest) = path.split_first()?;
        let mut node = self.child(first)?;
        for name in rest {
            node = node.child(name)?;
        }
        Some(node)
    }

    #[must_use]
    pub fn sorted_children(&self, key: SortKey) -> Vec<&StatNode> {
        sorted(&self.children, key)
    }

    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.cpu_time >= 0.0
            && self.wall_time >= self.cpu_time
            && self.wall_time >= children_time(&self.children)
            && has_unique_names(&self.children)
            && self.children.iter().all(StatNode::is_consistent)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

fn children_time(children: &[StatNode]) -> f64 {
    children.iter().map(|c| c.total_time).sum()
}

fn has_unique_names(children: &[StatNode]) -> bool {
    children
        .iter()
        .enumerate()
        .all(|(i, a)| children[i + 1..].iter().all(|b| b.name != a.name))
}

#[allow(clippy::cast_precision_loss)]
fn per_call(time: f64, calls: u64) -> f64 {
    if calls == 0 {
        0.0
    } else {
        time / calls as f64
    }
}

// ============================================================================
// Flat View
// ============================================================================

/// Aggregated statistic for one function regardless of call path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatStat {
    pub name: String,
    pub module: Option<String>,
    pub calls: u64,
    pub own_time: f64,
    pub total_time: f64,
}

impl FlatStat {
    #[must_use]
    pub fn regular_name(&self) -> String {
        match &self.module {
            Some(module) => format!("{module}:{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// The statistics tree collapsed by `regular_name`.
///
/// Recursive functions are summed once per appearance, so their
/// `total_time` can exceed the window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatStats {
    pub cpu_time: f64,
    pub wall_time: f64,
    /// Entries in first-seen (depth-first) order.
    pub stats: Vec<FlatStat>,
}

impl From<&StatsSnapshot> for FlatStats {
    fn from(snapshot: &StatsSnapshot) -> Self {
        let mut stats: Vec<FlatStat> = Vec::new();
        flatten_into(&snapshot.children, &mut stats);
        Self {
            cpu_time: snapshot.cpu_time,
            wall_time: snapshot.wall_time,
            stats,
        }
    }
}

impl FlatStats {
    /// Entries ordered by `key`. A flat entry has no descendants, so both
    /// call-count keys order by `calls`.
    #[must_use]
    pub fn sorted(&self, key: SortKey) -> Vec<&FlatStat> {
        let mut refs: Vec<&FlatStat> = self.stats.iter().collect();
        refs.sort_by(|a, b| match key {
            SortKey::Name => a.regular_name().cmp(&b.regular_name()),
            SortKey::Calls | SortKey::TotalCalls => b.calls.cmp(&a.calls),
            SortKey::OwnTime => b.own_time.total_cmp(&a.own_time),
            SortKey::TotalTime => b.total_time.total_cmp(&a.total_time),
            SortKey::OwnTimePerCall => per_call(b.own_time, b.calls).total_cmp(&per_call(a.own_time, a.calls)),
            SortKey::TotalTimePerCall => {
                per_call(b.total_time, b.calls).total_cmp(&per_call(a.total_time, a.calls))
            }
        });
        refs
    }
}

fn flatten_into(nodes: &[StatNode], out: &mut Vec<FlatStat>) {
    for node in nodes {
        let key = node.regular_name();
        if let Some(flat) = out.iter_mut().find(|f| f.regular_name() == key) {
            flat.calls += node.calls;
            flat.own_time += node.own_time;
            flat.total_time += node.total_time;
        } else {
            out.push(FlatStat {
                name: node.name.clone(),
                module: node.module.clone(),
                calls: node.calls,
                own_time: node.own_time,
                total_time: node.total_time,
            });
        }
        flatten_into(&node.children, out);
    }
}

// ============================================================================
// Sort Keys
// ============================================================================

/// Orderings for sibling statistics.
///
/// `Name` sorts ascending, every numeric key sorts descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortKey {
    Name,
    Calls,
    TotalCalls,
    OwnTime,
    #[default]
    TotalTime,
    OwnTimePerCall,
    TotalTimePerCall,
}

impl SortKey {
    pub const ALL: [SortKey; 7] = [
        SortKey::Name,
        SortKey::Calls,
        SortKey::TotalCalls,
        SortKey::OwnTime,
        SortKey::TotalTime,
        SortKey::OwnTimePerCall,
        SortKey::TotalTimePerCall,
    ];

    #[must_use]
    pub fn compare(self, a: &StatNode, b: &StatNode) -> Ordering {
        match self {
            SortKey::Name => a.name.cmp(&b.name),
            SortKey::Calls => b.calls.cmp(&a.calls),
            SortKey::TotalCalls => b.total_calls().cmp(&a.total_calls()),
            SortKey::OwnTime => b
                .own_time
                .total_cmp(&a.own_time)
                .then_with(|| b.total_time.total_cmp(&a.total_time)),
            SortKey::TotalTime => b.total_time.total_cmp(&a.total_time),
            // Nodes that were never called fall back to their raw time.
            SortKey::OwnTimePerCall => own_per_call_key(b)
                .total_cmp(&own_per_call_key(a))
                .then_with(|| total_per_call_key(b).total_cmp(&total_per_call_key(a))),
            SortKey::TotalTimePerCall => total_per_call_key(b).total_cmp(&total_per_call_key(a)),
        }
    }

    /// Shift through [`SortKey::ALL`], wrapping at both ends.
    #[must_use]
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    pub fn shift(self, delta: isize) -> SortKey {
        let len = Self::ALL.len() as isize;
        let idx = Self::ALL.iter().position(|k| *k == self).unwrap_or(0) as isize;
        Self::ALL[(idx + delta).rem_euclid(len) as usize]
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            SortKey::Name => "name",
            SortKey::Calls => "calls",
            SortKey::TotalCalls => "total calls",
            SortKey::OwnTime => "own time",
            SortKey::TotalTime => "total time",
            SortKey::OwnTimePerCall => "own/call",
            SortKey::TotalTimePerCall => "total/call",
        }
    }
}

fn own_per_call_key(node: &StatNode) -> f64 {
    if node.calls > 0 {
        node.own_time_per_call()
    } else {
        node.own_time
    }
}

fn total_per_call_key(node: &StatNode) -> f64 {
    if node.total_calls() > 0 {
        node.total_time_per_call()
    } else {
        node.total_time
    }
}

fn sorted(nodes: &[StatNode], key: SortKey) -> Vec<&StatNode> {
    let mut refs: Vec<&StatNode> = nodes.iter().collect();
    // Stable so equal keys keep first-seen order
    refs.sort_by(|a, b| key.compare(a, b));
    refs
}

// ============================================================================
// Wire Messages
// ============================================================================

/// One frame payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Message {
    /// First message on every connection.
    Hello { version: u32, profiler: String },
    /// Statistics of one completed profiling window.
    Stats { snapshot: StatsSnapshot, captured_at: SystemTime },
}

impl Message {
    #[must_use]
    pub fn hello(profiler: impl Into<String>) -> Self {
        Message::Hello {
            version: PROTOCOL_VERSION,
            profiler: profiler.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> StatsSnapshot {
        let inner = StatNode::leaf("inner", 4, 0.25);
        let outer = StatNode::new("outer", 2, 1.0, vec![inner]);
        let other = StatNode::leaf("other", 10, 0.5).with_module("app");
        StatsSnapshot::new(1, 1.2, 2.0, vec![outer, other])
    }

    #[test]
    fn test_own_time_excludes_children() {
        let tree = sample_tree();
        let outer = tree.child("outer").unwrap();
        assert!((outer.own_time - 0.75).abs() < 1e-12);
        assert_eq!(outer.total_calls(), 6);
        assert!(tree.is_consistent());
    }

    #[test]
    fn test_new_clamps_total_to_children() {
        let node = StatNode::new("parent", 1, 0.1, vec![StatNode::leaf("child", 1, 0.3)]);
        assert!((node.total_time - 0.3).abs() < 1e-12);
        assert_eq!(node.own_time, 0.0);
        assert!(node.is_consistent());
    }

    #[test]
    fn test_root_clamps_cpu_to_wall() {
        let root = StatsSnapshot::new(1, 3.0, 2.0, Vec::new());
        assert_eq!(root.cpu_time, 2.0);
        assert!((root.cpu_usage() - 1.0).abs() < 1e-12);
        assert!(root.is_consistent());
    }

    #[test]
    fn test_duplicate_sibling_names_are_inconsistent() {
        let root = StatsSnapshot {
            calls: 1,
            cpu_time: 0.0,
            wall_time: 1.0,
            children: vec![StatNode::leaf("a", 1, 0.1), StatNode::leaf("a", 1, 0.1)],
        };
        assert!(!root.is_consistent());
    }

    #[test]
    fn test_find_follows_path() {
        let tree = sample_tree();
        assert_eq!(tree.find(&["outer", "inner"]).map(|n| n.calls), Some(4));
        assert!(tree.find(&["outer", "missing"]).is_none());
        assert!(tree.find(&[]).is_none());
    }

    #[test]
    fn test_regular_name_includes_module() {
        let tree = sample_tree();
        assert_eq!(tree.child("other").unwrap().regular_name(), "app:other");
        assert_eq!(tree.child("outer").unwrap().regular_name(), "outer");
    }

    #[test]
    fn test_sorted_children_by_key() {
        let tree = sample_tree();
        let by_time: Vec<_> = tree.sorted_children(SortKey::TotalTime).iter().map(|n| n.name.as_str()).collect();
        assert_eq!(by_time, ["outer", "other"]);
        let by_calls: Vec<_> = tree.sorted_children(SortKey::Calls).iter().map(|n| n.name.as_str()).collect();
        assert_eq!(by_calls, ["other", "outer"]);
        // Stored order is untouched
        assert_eq!(tree.children[0].name, "outer");
    }

    #[test]
    fn test_sort_key_shift_wraps() {
        assert_eq!(SortKey::Name.shift(-1), SortKey::TotalTimePerCall);
        assert_eq!(SortKey::TotalTimePerCall.shift(1), SortKey::Name);
        assert_eq!(SortKey::TotalTime.shift(0), SortKey::TotalTime);
    }

    #[test]
    fn test_flatten_merges_by_name() {
        let leaf = StatNode::leaf("work", 3, 0.3);
        let a = StatNode::new("a", 1, 0.5, vec![leaf.clone()]);
        let b = StatNode::new("b", 1, 0.4, vec![leaf]);
        let root = StatsSnapshot::new(1, 0.5, 1.0, vec![a, b]);

        let flat = FlatStats::from(&root);
        let names: Vec<_> = flat.stats.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["a", "work", "b"]);
        let work = &flat.stats[1];
        assert_eq!(work.calls, 6);
        assert!((work.total_time - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_flat_sorted_by_key() {
        let root = StatsSnapshot::new(
            1,
            0.5,
            1.0,
            vec![StatNode::leaf("slow", 1, 0.5), StatNode::leaf("busy", 50, 0.25)],
        );
        let flat = FlatStats::from(&root);
        let by_calls: Vec<_> = flat.sorted(SortKey::TotalCalls).iter().map(|s| s.name.as_str()).collect();
        assert_eq!(by_calls, ["busy", "slow"]);
        let by_name: Vec<_> = flat.sorted(SortKey::Name).iter().map(|s| s.name.as_str()).collect();
        assert_eq!(by_name, ["busy", "slow"]);
        let by_cost: Vec<_> = flat.sorted(SortKey::OwnTimePerCall).iter().map(|s| s.name.as_str()).collect();
        assert_eq!(by_cost, ["slow", "busy"]);
    }

    /// Call chain `depth` levels deep with a few siblings hanging off every
    /// level and times that do not survive a lossy float conversion.
    fn deep_wide_tree(depth: usize) -> StatsSnapshot {
        let awkward = [0.1 + 0.2, f64::MIN_POSITIVE, 1e-300, 1.0 / 3.0];
        let mut node = StatNode::leaf("bottom", 1, 1e300).with_module("deep");
        for level in (0..depth).rev() {
            let mut children = vec![node];
            for (i, time) in awkward.iter().enumerate().take(level % 4 + 1) {
                children.push(StatNode::leaf(format!("side{i}"), level as u64, *time));
            }
            node = StatNode::new(format!("f{level}"), 1, 0.1 + 0.2, children);
        }
        StatsSnapshot::new(7, 0.1 + 0.2, 1e300, vec![node, StatNode::leaf("tail", 3, f64::MIN_POSITIVE)])
    }

    #[test]
    fn test_deep_tree_survives_json() {
        let tree = deep_wide_tree(300);
        let message = Message::Stats {
            snapshot: tree.clone(),
            captured_at: SystemTime::UNIX_EPOCH,
        };
        let bytes = serde_json::to_vec(&message).unwrap();
        let decoded: Message = serde_json::from_slice(&bytes).unwrap();
        let Message::Stats { snapshot, .. } = decoded else {
            panic!("expected stats");
        };
        assert_eq!(snapshot, tree);

        let mut path = vec!["f0".to_string()];
        path.extend((1..300).map(|level| format!("f{level}")));
        path.push("bottom".to_string());
        let path: Vec<&str> = path.iter().map(String::as_str).collect();
        let bottom = snapshot.find(&path).unwrap();
        assert_eq!(bottom.total_time, 1e300);
        assert_eq!(bottom.regular_name(), "deep:bottom");
    }

    #[test]
    fn test_message_json_shape() {
        let msg = Message::hello("span");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["method"], "hello");
        assert_eq!(json["version"], PROTOCOL_VERSION);
        assert_eq!(json["profiler"], "span");
    }
}
