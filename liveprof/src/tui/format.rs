//! Number formatting for the statistics table.

use std::time::{SystemTime, UNIX_EPOCH};

/// Times below one second are shown in microseconds with `.` as the
/// thousands separator (`12.345` is 12 345 µs); longer ones as `X.XXs`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_time(sec: f64) -> String {
    if sec == 0.0 {
        return "0".to_string();
    }
    if sec >= 1.0 {
        return format!("{sec:.2}s");
    }
    let micros = (sec * 1e6).round().max(0.0) as u64;
    group_thousands(micros)
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(ch);
    }
    out
}

/// `ratio` as a percentage with precision shrinking as it grows:
/// two decimals below 10 %, one below 100 %, none above.
#[must_use]
pub fn format_percent(ratio: f64, unit: bool) -> String {
    let ratio = if ratio.is_finite() { (ratio * 1e4).round() / 1e4 } else { 0.0 };
    let precision = if ratio >= 1.0 {
        0
    } else if ratio >= 0.1 {
        1
    } else {
        2
    };
    let number = format!("{:.*}", precision, ratio * 100.0);
    if unit {
        number + "%"
    } else {
        number
    }
}

/// `numer / denom`, or 0 when the denominator is zero.
#[must_use]
pub fn ratio(numer: f64, denom: f64) -> f64 {
    if denom == 0.0 {
        0.0
    } else {
        numer / denom
    }
}

/// Capture time as `HH:MM:SS` (UTC).
#[must_use]
pub fn format_clock(time: SystemTime) -> String {
    let secs = time.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs()) % 86_400;
    format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

/// Call counts; zero shows as `n/a`.
#[must_use]
pub fn format_calls(calls: u64) -> String {
    if calls == 0 {
        "n/a".to_string()
    } else {
        calls.to_string()
    }
}
