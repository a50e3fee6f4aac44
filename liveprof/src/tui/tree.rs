//! Flattened, sortable view of a statistics tree.
//!
//! Expansion and selection are remembered by name path, so they survive
//! every new snapshot as long as the same call sites show up again.

use std::collections::HashSet;

use liveprof_common::{SortKey, StatNode, StatsSnapshot};

use super::format::ratio;

/// One visible line of the table.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeRow {
    pub path: Vec<String>,
    pub depth: usize,
    pub name: String,
    pub has_children: bool,
    pub expanded: bool,
    /// Share of the whole by the active sort key.
    pub share: f64,
    pub total_calls: u64,
    pub total_time: f64,
    pub total_per_call: f64,
    pub calls: u64,
    pub own_time: f64,
    pub own_per_call: f64,
}

#[derive(Debug, Default)]
pub struct StatsTree {
    snapshot: Option<StatsSnapshot>,
    expanded: HashSet<Vec<String>>,
    sort_key: SortKey,
    rows: Vec<TreeRow>,
    selected: usize,
}

impl StatsTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Show `snapshot`, keeping expansion and the selected call site.
    pub fn set_snapshot(&mut self, snapshot: StatsSnapshot) {
        self.snapshot = Some(snapshot);
        self.rebuild();
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<&StatsSnapshot> {
        self.snapshot.as_ref()
    }

    #[must_use]
    pub fn rows(&self) -> &[TreeRow] {
        &self.rows
    }

    #[must_use]
    pub fn selected(&self) -> usize {
        self.selected
    }

    #[must_use]
    pub fn selected_row(&self) -> Option<&TreeRow> {
        self.rows.get(self.selected)
    }

    #[must_use]
    pub fn sort_key(&self) -> SortKey {
        self.sort_key
    }

    pub fn shift_sort(&mut self, delta: isize) {
        self.sort_key = self.sort_key.shift(delta);
        self.rebuild();
    }

    pub fn select_next(&mut self) {
        if self.selected + 1 < self.rows.len() {
            self.selected += 1;
        }
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    /// Expand the selected row, or step into its first child when it is
    /// already expanded.
    pub fn expand(&mut self) {
        let Some(row) = self.selected_row() else {
            return;
        };
        if !row.has_children {
            return;
        }
        if row.expanded {
            self.select_next();
        } else {
            let path = row.path.clone();
            self.expanded.insert(path);
            self.rebuild();
        }
    }

    /// Collapse the selected row, or step out to its parent when it is
    /// already collapsed.
    pub fn collapse(&mut self) {
        let Some(row) = self.selected_row() else {
            return;
        };
        if row.expanded {
            let path = row.path.clone();
            self.expanded.remove(&path);
            self.rebuild();
        } else if row.path.len() > 1 {
            let parent = row.path[..row.path.len() - 1].to_vec();
            if let Some(index) = self.rows.iter().position(|r| r.path == parent) {
                self.selected = index;
            }
        }
    }

    pub fn toggle(&mut self) {
        match self.selected_row().map(|row| row.expanded) {
            Some(true) => self.collapse(),
            Some(false) => self.expand(),
            None => {}
        }
    }

    fn rebuild(&mut self) {
        let selected_path = self.selected_row().map(|row| row.path.clone());
        let mut rows = Vec::new();
        if let Some(snapshot) = &self.snapshot {
            let mut path = Vec::new();
            for child in snapshot.sorted_children(self.sort_key) {
                self.push_rows(snapshot, child, &mut path, &mut rows);
            }
        }
        self.rows = rows;
        self.selected = selected_path
            .and_then(|path| self.rows.iter().position(|r| r.path == path))
            .unwrap_or(self.selected)
            .min(self.rows.len().saturating_sub(1));
    }

    fn push_rows(&self, root: &StatsSnapshot, node: &StatNode, path: &mut Vec<String>, rows: &mut Vec<TreeRow>) {
        path.push(node.name.clone());
        let expanded = self.expanded.contains(path.as_slice());
        rows.push(TreeRow {
            path: path.clone(),
            depth: path.len() - 1,
            name: node.regular_name(),
            has_children: !node.children.is_empty(),
            expanded,
            share: share(self.sort_key, root, node),
            total_calls: node.total_calls(),
            total_time: node.total_time,
            total_per_call: node.total_time_per_call(),
            calls: node.calls,
            own_time: node.own_time,
            own_per_call: node.own_time_per_call(),
        });
        if expanded {
            for child in node.sorted_children(self.sort_key) {
                self.push_rows(root, child, path, rows);
            }
        }
        path.pop();
    }
}

/// The `%` column: what fraction of the whole the sorted quantity is.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn share(key: SortKey, root: &StatsSnapshot, node: &StatNode) -> f64 {
    let root_calls = root.total_calls() as f64;
    let per_call_base = ratio(root.cpu_time, root_calls);
    match key {
        SortKey::Name => 0.0,
        SortKey::Calls => ratio(node.calls as f64, root_calls),
        SortKey::TotalCalls => ratio(node.total_calls() as f64, root_calls),
        SortKey::OwnTime => ratio(node.own_time, root.cpu_time),
        SortKey::TotalTime => ratio(node.total_time, root.cpu_time),
        SortKey::OwnTimePerCall => ratio(node.own_time_per_call(), per_call_base),
        SortKey::TotalTimePerCall => ratio(node.total_time_per_call(), per_call_base),
    }
}
