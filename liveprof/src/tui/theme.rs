//! TUI color theme

use ratatui::style::Color;

pub const ACCENT_GREEN: Color = Color::Rgb(0, 255, 0);
pub const DANGER_RED: Color = Color::Rgb(255, 0, 0);
pub const CAUTION_AMBER: Color = Color::Rgb(255, 191, 0);
pub const WARNING_YELLOW: Color = Color::Rgb(230, 230, 80);
pub const NOTICE_CYAN: Color = Color::Rgb(80, 200, 200);
pub const INFO_DIM: Color = Color::Rgb(0, 180, 0);
pub const ZERO_GRAY: Color = Color::Rgb(90, 90, 90);
pub const SELECTED_BG: Color = Color::Rgb(0, 60, 0);

/// Color for a share of the whole
/// - Above 90%: danger
/// - Above 70%: caution
/// - Above 30%: warning
/// - Above 10%: notice
/// - Zero: dimmed
#[must_use]
pub fn ratio_color(ratio: f64) -> Color {
    if ratio > 0.9 {
        DANGER_RED
    } else if ratio > 0.7 {
        CAUTION_AMBER
    } else if ratio > 0.3 {
        WARNING_YELLOW
    } else if ratio > 0.1 {
        NOTICE_CYAN
    } else if ratio <= 0.0 {
        ZERO_GRAY
    } else {
        Color::White
    }
}

/// Seconds stand out from microseconds.
#[must_use]
pub fn time_color(sec: f64) -> Color {
    if sec == 0.0 {
        ZERO_GRAY
    } else if sec >= 1.0 {
        CAUTION_AMBER
    } else {
        Color::White
    }
}
