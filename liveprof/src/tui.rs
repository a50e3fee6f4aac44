//! # Terminal User Interface (TUI)
//!
//! Interactive statistics viewer using `ratatui`.
//!
//! The viewer runs on the main thread and receives [`ViewerUpdate`]s from
//! the client task through a crossbeam channel, so the network
//! side never touches the terminal.
//!
//! ## Keys
//!
//! - `↑`/`↓` (`k`/`j`) - move the selection
//! - `→`/`Enter` (`l`) - expand, or step into the first child
//! - `←` (`h`) - collapse, or step out to the parent
//! - `[` / `]` - previous / next sort key
//! - `Space` - pause or resume updates
//! - `s` - save the shown snapshot as a dump file in the working directory
//! - `q` / `Esc` - quit
//!
//! ## Sub-Modules
//!
//! - `tree` - flattened, sortable view model
//! - `format` - time and percent formatting
//! - `headless` - plain-text renderer and sink
//! - `theme` - color scheme

// TUI rendering intentionally uses long functions for clarity
#![allow(clippy::too_many_lines, clippy::items_after_statements)]

use anyhow::Result;
use crossbeam_channel::Receiver;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use liveprof_common::{SortKey, StatsSnapshot};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Terminal,
};
use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod format;
pub mod headless;
mod theme;
pub mod tree;

use crate::client::{ClientState, ViewerUpdate};
use crate::export::save_dump;
use format::{format_calls, format_clock, format_percent, format_time};
use theme::{ratio_color, time_color, ACCENT_GREEN, CAUTION_AMBER, DANGER_RED, INFO_DIM, SELECTED_BG};
use tree::StatsTree;

const STYLE_HEADING: Style = Style::new().fg(ACCENT_GREEN).add_modifier(Modifier::BOLD);
const STYLE_DIM: Style = Style::new().fg(INFO_DIM);
const STYLE_KEY: Style = Style::new().fg(CAUTION_AMBER);

const COLUMNS: [(&str, Option<SortKey>); 8] = [
    ("%", None),
    ("FUNCTION", Some(SortKey::Name)),
    ("TOTAL#", Some(SortKey::TotalCalls)),
    ("TIME", Some(SortKey::TotalTime)),
    ("/CALL", Some(SortKey::TotalTimePerCall)),
    ("OWN#", Some(SortKey::Calls)),
    ("TIME", Some(SortKey::OwnTime)),
    ("/CALL", Some(SortKey::OwnTimePerCall)),
];

/// Where the viewer's data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerMode {
    /// Streaming from a server; shows connection state.
    Live,
    /// A loaded dump; never updates.
    Offline,
}

struct ViewerApp {
    tree: StatsTree,
    table_state: TableState,
    title: String,
    captured_at: Option<SystemTime>,
    state: ClientState,
    mode: ViewerMode,
    paused: bool,
    /// Latest snapshot received while paused.
    held: Option<(StatsSnapshot, String, SystemTime)>,
    /// Result of the last save, shown in the header.
    status: Option<String>,
    should_quit: bool,
}

impl ViewerApp {
    fn new(mode: ViewerMode) -> Self {
        Self {
            tree: StatsTree::new(),
            table_state: TableState::default(),
            title: String::new(),
            captured_at: None,
            state: ClientState::Disconnected,
            mode,
            paused: false,
            held: None,
            status: None,
            should_quit: false,
        }
    }

    fn show(&mut self, snapshot: StatsSnapshot, title: String, timestamp: SystemTime) {
        if self.paused {
            self.held = Some((snapshot, title, timestamp));
            return;
        }
        self.tree.set_snapshot(snapshot);
        self.title = title;
        self.captured_at = Some(timestamp);
    }

    fn apply(&mut self, update: ViewerUpdate) {
        match update {
            ViewerUpdate::Stats {
                snapshot,
                title,
                timestamp,
            } => self.show(snapshot, title, timestamp),
            ViewerUpdate::State(state) => self.state = state,
        }
    }

    fn handle_key(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q' | 'Q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Up | KeyCode::Char('k') => self.tree.select_prev(),
            KeyCode::Down | KeyCode::Char('j') => self.tree.select_next(),
            KeyCode::Right | KeyCode::Enter | KeyCode::Char('l') => self.tree.expand(),
            KeyCode::Left | KeyCode::Char('h') => self.tree.collapse(),
            KeyCode::Char(']') => self.tree.shift_sort(1),
            KeyCode::Char('[') => self.tree.shift_sort(-1),
            KeyCode::Char('s') => self.save(),
            KeyCode::Char(' ') => {
                self.paused = !self.paused;
                if !self.paused {
                    if let Some((snapshot, title, timestamp)) = self.held.take() {
                        self.show(snapshot, title, timestamp);
                    }
                }
            }
            _ => {}
        }
    }

    fn save(&mut self) {
        let Some(snapshot) = self.tree.snapshot() else {
            return;
        };
        let secs = self
            .captured_at
            .unwrap_or_else(SystemTime::now)
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        let path = PathBuf::from(format!("liveprof-{secs}.json"));
        self.status = Some(match save_dump(&path, snapshot) {
            Ok(()) => format!("saved {}", path.display()),
            Err(err) => format!("save failed: {err}"),
        });
    }

    /// Header marker for the data's freshness.
    fn marker(&self) -> Span<'static> {
        let bold = |color| Style::new().fg(color).add_modifier(Modifier::BOLD);
        if self.paused {
            return Span::styled("[PAUSED]", bold(CAUTION_AMBER));
        }
        match (self.mode, &self.state) {
            (ViewerMode::Offline, _) => Span::styled("[DUMP]", STYLE_DIM),
            (ViewerMode::Live, ClientState::Connected(_)) => Span::styled("[LIVE]", bold(DANGER_RED)),
            (ViewerMode::Live, _) if self.tree.snapshot().is_some() => Span::styled("[STALE]", bold(CAUTION_AMBER)),
            (ViewerMode::Live, _) => Span::styled("[WAITING]", STYLE_DIM),
        }
    }

    fn header_line(&self) -> Line<'static> {
        let mut spans = vec![
            Span::styled("LIVEPROF", STYLE_HEADING),
            Span::styled(" | ", STYLE_DIM),
            self.marker(),
        ];
        if !self.title.is_empty() {
            spans.push(Span::styled(" | ", STYLE_DIM));
            spans.push(Span::styled(self.title.clone(), Style::new().fg(ACCENT_GREEN)));
        }
        if let Some(at) = self.captured_at {
            spans.push(Span::styled(" | ", STYLE_DIM));
            spans.push(Span::styled(format_clock(at), Style::new().fg(ACCENT_GREEN)));
        }
        if let Some(snapshot) = self.tree.snapshot() {
            let usage = snapshot.cpu_usage();
            spans.push(Span::styled(" | CPU ", STYLE_DIM));
            spans.push(Span::styled(format_percent(usage, true), Style::new().fg(ratio_color(usage))));
            spans.push(Span::styled(
                format!(" ({}/{})", format_time(snapshot.cpu_time), format_time(snapshot.wall_time)),
                STYLE_DIM,
            ));
        }
        if let ClientState::Connecting(server) = &self.state {
            spans.push(Span::styled(format!(" | connecting to {server}"), STYLE_DIM));
        }
        if let Some(status) = &self.status {
            spans.push(Span::styled(format!(" | {status}"), Style::new().fg(CAUTION_AMBER)));
        }
        Line::from(spans)
    }

    fn table(&self) -> Table<'static> {
        let sort_key = self.tree.sort_key();
        let header = Row::new(COLUMNS.iter().map(|(label, key)| {
            let style = if *key == Some(sort_key) {
                Style::new().fg(CAUTION_AMBER).add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
            } else {
                STYLE_HEADING
            };
            Cell::from(*label).style(style)
        }));

        let rows: Vec<Row> = self
            .tree
            .rows()
            .iter()
            .map(|row| {
                let marker = match (row.has_children, row.expanded) {
                    (false, _) => "  ",
                    (true, false) => "▸ ",
                    (true, true) => "▾ ",
                };
                let function = format!("{}{marker}{}", "  ".repeat(row.depth), row.name);
                let time_cell = |sec: f64| Cell::from(format_time(sec)).style(Style::new().fg(time_color(sec)));
                Row::new(vec![
                    Cell::from(format_percent(row.share, false)).style(Style::new().fg(ratio_color(row.share))),
                    Cell::from(function),
                    Cell::from(format_calls(row.total_calls)),
                    time_cell(row.total_time),
                    time_cell(row.total_per_call),
                    Cell::from(format_calls(row.calls)),
                    time_cell(row.own_time),
                    time_cell(row.own_per_call),
                ])
            })
            .collect();

        Table::new(
            rows,
            [
                Constraint::Length(6),
                Constraint::Min(20),
                Constraint::Length(8),
                Constraint::Length(10),
                Constraint::Length(10),
                Constraint::Length(8),
                Constraint::Length(10),
                Constraint::Length(10),
            ],
        )
        .header(header)
        .row_highlight_style(Style::new().bg(SELECTED_BG).add_modifier(Modifier::BOLD))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Sorted by {}", sort_key.label()))
                .border_style(Style::new().fg(ACCENT_GREEN)),
        )
    }
}

fn key_hints() -> Line<'static> {
    Line::from(vec![
        Span::styled("Q", STYLE_KEY),
        Span::styled(":Quit ", STYLE_DIM),
        Span::styled("←→", STYLE_KEY),
        Span::styled(":Fold ", STYLE_DIM),
        Span::styled("[ ]", STYLE_KEY),
        Span::styled(":Sort ", STYLE_DIM),
        Span::styled("Space", STYLE_KEY),
        Span::styled(":Pause ", STYLE_DIM),
        Span::styled("S", STYLE_KEY),
        Span::styled(":Save ", STYLE_DIM),
    ])
}

// =============================================================================
// ENTRY POINT
// =============================================================================

/// Run the viewer until the user quits.
///
/// `initial` is shown right away (e.g. a loaded dump); further snapshots and
/// connection state arrive on `updates`.
///
/// # Errors
/// Returns an error if terminal setup or rendering fails
pub fn run_viewer(
    updates: Receiver<ViewerUpdate>,
    initial: Option<(StatsSnapshot, String, SystemTime)>,
    mode: ViewerMode,
) -> Result<()> {
    // -------------------------------------------------------------------------
    // Terminal Setup
    // -------------------------------------------------------------------------
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = ViewerApp::new(mode);
    if let Some((snapshot, title, timestamp)) = initial {
        app.show(snapshot, title, timestamp);
    }
    const REDRAW_INTERVAL: Duration = Duration::from_millis(100);

    // -------------------------------------------------------------------------
    // Main Event Loop
    // -------------------------------------------------------------------------
    let result = (|| -> Result<()> {
        loop {
            while let Ok(update) = updates.try_recv() {
                app.apply(update);
            }

            app.table_state.select(Some(app.tree.selected()));
            let table = app.table();
            let header = Paragraph::new(app.header_line())
                .block(Block::default().borders(Borders::ALL).border_style(Style::new().fg(DANGER_RED)));
            let hints = Paragraph::new(key_hints())
                .block(Block::default().borders(Borders::ALL).border_style(Style::new().fg(ACCENT_GREEN)));

            terminal.draw(|f| {
                let layout = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)])
                    .split(f.area());
                f.render_widget(header, layout[0]);
                f.render_stateful_widget(table, layout[1], &mut app.table_state);
                f.render_widget(hints, layout[2]);
            })?;

            if event::poll(REDRAW_INTERVAL)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        app.handle_key(key.code);
                    }
                }
            }

            if app.should_quit {
                return Ok(());
            }
        }
    })();

    // Cleanup terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use liveprof_common::StatNode;

    fn snapshot(name: &str) -> StatsSnapshot {
        StatsSnapshot::new(1, 0.5, 1.0, vec![StatNode::leaf(name, 1, 0.5)])
    }

    #[test]
    fn test_pause_holds_latest_snapshot() {
        let mut app = ViewerApp::new(ViewerMode::Live);
        app.show(snapshot("first"), "srv".to_string(), SystemTime::UNIX_EPOCH);
        app.handle_key(KeyCode::Char(' '));
        app.show(snapshot("second"), "srv".to_string(), SystemTime::UNIX_EPOCH);
        app.show(snapshot("third"), "srv".to_string(), SystemTime::UNIX_EPOCH);
        assert!(app.tree.snapshot().unwrap().child("first").is_some());

        app.handle_key(KeyCode::Char(' '));
        assert!(app.tree.snapshot().unwrap().child("third").is_some());
    }

    #[test]
    fn test_marker_reflects_connection() {
        let mut app = ViewerApp::new(ViewerMode::Live);
        assert_eq!(app.marker().content, "[WAITING]");
        app.apply(ViewerUpdate::State(ClientState::Connected("srv".to_string())));
        app.show(snapshot("a"), "srv".to_string(), SystemTime::UNIX_EPOCH);
        assert_eq!(app.marker().content, "[LIVE]");
        app.apply(ViewerUpdate::State(ClientState::Disconnected));
        assert_eq!(app.marker().content, "[STALE]");
        assert!(app.tree.snapshot().is_some());
    }

    #[test]
    fn test_sort_keys_cycle_with_brackets() {
        let mut app = ViewerApp::new(ViewerMode::Offline);
        app.handle_key(KeyCode::Char(']'));
        assert_eq!(app.tree.sort_key(), SortKey::OwnTimePerCall);
        app.handle_key(KeyCode::Char('['));
        app.handle_key(KeyCode::Char('['));
        assert_eq!(app.tree.sort_key(), SortKey::OwnTime);
    }
}
