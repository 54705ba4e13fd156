//! Value formatting helpers for text reports.

const BYTE_UNITS: [&str; 5] = ["bytes", "kB", "MB", "GB", "TB"];

/// Human-readable size using 1024-based units.
pub fn format_bytes(bytes: f64) -> String {
    if !bytes.is_finite() {
        return "N/A".to_string();
    }
    if bytes.abs() < 1024.0 {
        return format!("{} bytes", bytes.round() as i64);
    }
    let mut value = bytes;
    let mut unit = 0;
    while value.abs() >= 1024.0 && unit < BYTE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, BYTE_UNITS[unit])
}

/// Percentage of `part` in `total`; a zero or negative total yields `0`.
pub fn percentage(part: f64, total: f64) -> f64 {
    if total > 0.0 {
        part / total * 100.0
    } else {
        0.0
    }
}

/// Truncates to `max_chars` characters, appending `...` when shortened.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
