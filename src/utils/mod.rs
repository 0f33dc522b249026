//! Common utilities and helper functions

pub mod retry;

/// First `max` characters of `text`, with `...` appended when cut
///
/// Used to keep identifiers and keys short in logs.
pub fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{head}...")
}

/// `Xm Ys` rendering of a number of seconds
pub fn format_minutes_seconds(total_secs: u64) -> String {
    format!("{}m {}s", total_secs / 60, total_secs % 60)
}
