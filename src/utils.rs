//! # Utility Functions
//!
//! Small helpers shared by the worker and the binary: wall-clock access in
//! the resolution datapoints are bucketed at, and human-readable byte
//! formatting for log lines.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as whole seconds since the Unix epoch.
///
/// A clock set before the epoch yields 0 rather than an error; datapoints
/// only need the value as a bucketing key.
pub fn unix_time_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Format a byte count in a human-readable way
///
/// ## Format Examples
///
/// - "512 B" for 512 bytes
/// - "1.50 KB" for 1536 bytes
/// - "2.00 MB" for 2097152 bytes
pub fn format_bytes(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes < 1024.0 {
        format!("{:.0} B", bytes)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}
