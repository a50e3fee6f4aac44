//! Pre-order layout for `children` lists.
//!
//! A subtree is written as one flat sequence. Every entry carries the number
//! of direct children that follow it, so reading a tree never nests deeper
//! than a single node object, however deep the call stack was.
//!
//! ```text
//!   a ─┬─ b ── c        [a:2, b:1, c:0, d:0]
//!      └─ d
//! ```

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::StatNode;

#[derive(Serialize)]
struct EntryRef<'a> {
    name: &'a str,
    module: Option<&'a str>,
    calls: u64,
    own_time: f64,
    total_time: f64,
    children: usize,
}

#[derive(Deserialize)]
struct Entry {
    name: String,
    module: Option<String>,
    calls: u64,
    own_time: f64,
    total_time: f64,
    children: usize,
}

/// Depth-first walk over a forest without recursion.
struct PreOrder<'a> {
    stack: Vec<&'a StatNode>,
}

impl<'a> PreOrder<'a> {
    fn new(nodes: &'a [StatNode]) -> Self {
        Self {
            stack: nodes.iter().rev().collect(),
        }
    }
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = &'a StatNode;

    fn next(&mut self) -> Option<&'a StatNode> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

pub(crate) fn serialize<S: Serializer>(nodes: &[StatNode], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(PreOrder::new(nodes).map(|node| EntryRef {
        name: &node.name,
        module: node.module.as_deref(),
        calls: node.calls,
        own_time: node.own_time,
        total_time: node.total_time,
        children: node.children.len(),
    }))
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<StatNode>, D::Error> {
    let entries = Vec::<Entry>::deserialize(deserializer)?;
    rebuild(entries).map_err(D::Error::custom)
}

struct Open {
    node: StatNode,
    remaining: usize,
}

fn rebuild(entries: Vec<Entry>) -> Result<Vec<StatNode>, &'static str> {
    let mut roots = Vec::new();
    let mut open: Vec<Open> = Vec::new();
    for entry in entries {
        open.push(Open {
            node: StatNode {
                name: entry.name,
                module: entry.module,
                calls: entry.calls,
                own_time: entry.own_time,
                total_time: entry.total_time,
                children: Vec::new(),
            },
            remaining: entry.children,
        });
        // Close every subtree that just received its last child
        while open.last().is_some_and(|top| top.remaining == 0) {
            let Some(done) = open.pop() else { break };
            match open.last_mut() {
                Some(parent) => {
                    parent.node.children.push(done.node);
                    parent.remaining -= 1;
                }
                None => roots.push(done.node),
            }
        }
    }
    if open.is_empty() {
        Ok(roots)
    } else {
        Err("statistics tree ends before all children were read")
    }
}
