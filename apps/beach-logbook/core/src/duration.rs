/// Formats a duration for display: whole seconds below a minute, minutes and
/// seconds above. A missing or zero duration renders as an empty string.
pub fn format_duration(duration_ms: Option<u64>) -> String {
    let ms = match duration_ms {
        Some(ms) if ms > 0 => ms,
        _ => return String::new(),
    };

    let secs = ms / 1000;
    let minutes = secs / 60;
    if minutes == 0 {
        format!("{secs}s")
    } else {
        format!("{minutes}m {}s", secs % 60)
    }
}
