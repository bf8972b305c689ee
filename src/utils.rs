//! Shared formatting helpers.

use std::borrow::Cow;

/// Formats a duration in seconds into a human-readable string.
///
/// `3661` becomes `"1h 1m 1s"`, `61` becomes `"1m 1s"`, `30` becomes `"30s"`.
pub fn format_duration(seconds: i64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    match (hours, minutes) {
        (0, 0) => format!("{}s", secs),
        (0, _) => format!("{}m {}s", minutes, secs),
        _ => format!("{}h {}m {}s", hours, minutes, secs),
    }
}

/// Formats a byte count using binary units with one decimal place.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Truncates a string to a maximum length, appending "..." if truncated.
///
/// Cuts on a char boundary so installer output in any encoding is safe.
pub fn truncate(s: &str, max_len: usize) -> Cow<'_, str> {
    if s.len() <= max_len {
        return Cow::Borrowed(s);
    }

    let keep = if max_len <= 3 { max_len } else { max_len - 3 };
    let mut end = keep;
    while !s.is_char_boundary(end) {
        end -= 1;
    }

    if max_len <= 3 {
        Cow::Borrowed(&s[..end])
    } else {
        Cow::Owned(format!("{}...", &s[..end]))
    }
}
