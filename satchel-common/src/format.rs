//! Formatting helpers for sizes, durations, and progress output

/// Format a byte count using binary units
pub fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= KIB && unit < UNITS.len() - 1 {
        value /= KIB;
        unit += 1;
    }

    format!("{value:.2} {}", UNITS[unit])
}

/// Format a duration as a compact human-readable string
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();

    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m {}s", secs / 60, secs % 60),
        3600..=86399 => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
        _ => format!("{}d {}h", secs / 86400, (secs % 86400) / 3600),
    }
}

/// Format a completed/total pair as a percentage, clamped to 100%
pub fn format_percent(done: u64, total: u64) -> String {
    if total == 0 {
        return "100%".to_string();
    }
    let pct = ((done as f64 / total as f64) * 100.0).min(100.0);
    format!("{pct:.0}%")
}
