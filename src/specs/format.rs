// SPDX-License-Identifier: GPL-3.0-only

const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];

/// Human-readable size in 1024-based units: "640 KB", "49.2 MB", "1.5 GB".
///
/// Kilobytes are shown whole, megabytes with one decimal and larger units
/// with two. Trailing zeros after the point are dropped.
pub fn format_byte_count(bytes: u64) -> String {
    match bytes {
        0 => return "Zero KB".to_string(),
        1 => return "1 byte".to_string(),
        2..=1023 => return format!("{bytes} bytes"),
        _ => {}
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let decimals = match unit {
        0 => 0,
        1 => 1,
        _ => 2,
    };
    let mut number = format!("{value:.decimals$}");
    if number.contains('.') {
        let trimmed = number.trim_end_matches('0').trim_end_matches('.').len();
        number.truncate(trimmed);
    }

    format!("{number} {}", UNITS[unit])
}
