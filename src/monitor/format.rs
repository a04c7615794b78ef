//! Human-readable byte counts.

/// Format a byte count with 1024-based units (B, KB, MB, GB, TB), keeping at
/// most two decimals and trimming trailing zeros.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit_index = 0;

    while value >= 1024.0 && unit_index < UNITS.len() - 1 {
        value /= 1024.0;
        unit_index += 1;
    }

    let mut value_str = format!("{value:.2}");
    while value_str.ends_with('0') {
        value_str.pop();
    }
    if value_str.ends_with('.') {
        value_str.pop();
    }

    format!("{value_str} {}", UNITS[unit_index])
}
