//! Plain-text rendering for terminals without a TUI (or for piping).

use std::fmt::Write as _;
use std::io::Write;
use std::time::SystemTime;

use liveprof_common::{FlatStats, SortKey, StatNode, StatsSnapshot};

use super::format::{format_calls, format_percent, format_time, ratio};
use crate::client::{ClientState, StatsSink};

/// Render `snapshot` as an indented tree, children sorted by `key`.
#[must_use]
pub fn render_text(snapshot: &StatsSnapshot, title: &str, key: SortKey) -> String {
    let mut out = header(snapshot, title);
    for child in snapshot.sorted_children(key) {
        render_node(&mut out, snapshot, child, key, 0);
    }
    out
}

/// Render one line per function, merged across call paths.
///
/// The percentage is the function's own time against the window's CPU time.
#[must_use]
pub fn render_flat_text(snapshot: &StatsSnapshot, title: &str, key: SortKey) -> String {
    let mut out = header(snapshot, title);
    let flat = FlatStats::from(snapshot);
    for stat in flat.sorted(key) {
        let _ = writeln!(
            out,
            "{:>6}  {}  calls={} total={} own={}",
            format_percent(ratio(stat.own_time, flat.cpu_time), false),
            stat.regular_name(),
            format_calls(stat.calls),
            format_time(stat.total_time),
            format_time(stat.own_time),
        );
    }
    out
}

fn header(snapshot: &StatsSnapshot, title: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "== {title}  CPU {} ({}/{})",
        format_percent(snapshot.cpu_usage(), true),
        format_time(snapshot.cpu_time),
        format_time(snapshot.wall_time),
    );
    out
}

fn render_node(out: &mut String, root: &StatsSnapshot, node: &StatNode, key: SortKey, depth: usize) {
    let _ = writeln!(
        out,
        "{:>6}  {:indent$}{}  calls={} total={} own={}",
        format_percent(ratio(node.total_time, root.cpu_time), false),
        "",
        node.regular_name(),
        format_calls(node.total_calls()),
        format_time(node.total_time),
        format_time(node.own_time),
        indent = depth * 2,
    );
    for child in node.sorted_children(key) {
        render_node(out, root, child, key, depth + 1);
    }
}

/// Sink that prints every snapshot to a writer.
pub struct HeadlessSink<W> {
    out: W,
    sort_key: SortKey,
    flat: bool,
}

impl<W: Write + Send + 'static> HeadlessSink<W> {
    pub fn new(out: W, sort_key: SortKey) -> Self {
        Self {
            out,
            sort_key,
            flat: false,
        }
    }

    /// Print the per-function view instead of the call tree.
    #[must_use]
    pub fn flat(mut self, flat: bool) -> Self {
        self.flat = flat;
        self
    }
}

impl<W: Write + Send + 'static> StatsSink for HeadlessSink<W> {
    fn set_stats(&mut self, snapshot: StatsSnapshot, title: &str, _timestamp: SystemTime) {
        let text = if self.flat {
            render_flat_text(&snapshot, title, self.sort_key)
        } else {
            render_text(&snapshot, title, self.sort_key)
        };
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
    }

    fn set_state(&mut self, state: &ClientState) {
        let _ = writeln!(self.out, "-- {state}");
    }
}
