use std::time::Duration;
use humansize::{format_size, BINARY};

/// Bytes as KiB/MiB/GiB
pub fn human_bytes(bytes: u64) -> String {
    format_size(bytes, BINARY)
}

/// Signed byte delta, e.g. "-1.5 GiB" or "+200 B"
pub fn human_delta(delta: i64) -> String {
    let sign = if delta < 0 { "-" } else { "+" };
    format!("{}{}", sign, human_bytes(delta.unsigned_abs()))
}

/// Duration as "XmYs" (hours folded into minutes)
pub fn human_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}
