//! Human-readable size and duration parsing for plan files

use std::time::Duration;

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;
const TB: u64 = GB * 1024;

/// Parse human-readable size string (e.g., "512MB", "2GB", "1048576")
///
/// Supports suffixes: B, KB, MB, GB, TB (case-insensitive, binary units)
pub fn parse_size(size_str: &str) -> Result<u64, String> {
    let size_str = size_str.trim().to_uppercase();

    if size_str.is_empty() {
        return Err("empty size string".to_string());
    }

    let (num_str, multiplier) = if let Some(num) = size_str.strip_suffix("TB") {
        (num, TB)
    } else if let Some(num) = size_str.strip_suffix("GB") {
        (num, GB)
    } else if let Some(num) = size_str.strip_suffix("MB") {
        (num, MB)
    } else if let Some(num) = size_str.strip_suffix("KB") {
        (num, KB)
    } else if let Some(num) = size_str.strip_suffix('B') {
        (num, 1u64)
    } else {
        (size_str.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number in size: '{}'", num_str.trim()))?;

    if num < 0.0 {
        return Err(format!("size cannot be negative: {}", num));
    }

    Ok((num * multiplier as f64) as u64)
}

/// Format bytes as a human-readable size
pub fn format_size(bytes: u64) -> String {
    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Parse a duration like "500ms", "10s", "5m", "1h" (bare numbers are seconds)
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim().to_lowercase();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (num_str, unit_ms) = if let Some(num) = s.strip_suffix("ms") {
        (num, 1u64)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1_000)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60_000)
    } else if let Some(num) = s.strip_suffix('h') {
        (num, 3_600_000)
    } else if let Some(num) = s.strip_suffix('d') {
        (num, 86_400_000)
    } else {
        (s.as_str(), 1_000)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: '{}'", input.trim()))?;

    Ok(Duration::from_millis(num.saturating_mul(unit_ms)))
}

/// Format a duration compactly for log lines and summaries
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1_000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        let secs = d.as_secs();
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

/// Parse an octal mode string like "0750" or "750"
pub fn parse_mode(input: &str) -> Result<u32, String> {
    let s = input.trim();
    let digits = s.strip_prefix("0o").unwrap_or(s);
    u32::from_str_radix(digits, 8).map_err(|_| format!("invalid octal mode: '{}'", s))
}
