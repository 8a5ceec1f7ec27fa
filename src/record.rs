// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log record and line formatting

use crate::level::Level;
use chrono::{Local, LocalResult, TimeZone};

/// A single log record crossing the producer/writer boundary.
///
/// Tag and message are owned: the producer returns immediately after
/// enqueueing and its borrowed sources may be gone before the writer runs.
/// A record is never mutated once enqueued.
#[derive(Debug)]
pub struct Record {
    pub level: Level,
    /// Wall-clock milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    pub process_id: u32,
    pub thread_id: u64,
    pub tag: String,
    pub message: String,
}

impl Record {
    /// Capture a record on the calling thread.
    pub fn capture(level: Level, process_id: u32, tag: &str, message: &str) -> Self {
        Self {
            level,
            timestamp_ms: now_millis(),
            process_id,
            thread_id: current_thread_id(),
            tag: tag.to_owned(),
            message: message.to_owned(),
        }
    }
}

/// Format a record into its on-disk line:
/// `[LEVEL] YYYY-MM-DD HH:MM:SS.mmm [pid, tid] [tag]: message\n`
///
/// The timestamp is rendered in the local time zone. Formatting the same
/// record twice yields byte-identical lines for a fixed time zone.
pub fn format_record(record: &Record) -> String {
    format!(
        "[{}] {} [{}, {}] [{}]: {}\n",
        record.level.as_str(),
        format_timestamp(record.timestamp_ms),
        record.process_id,
        record.thread_id,
        record.tag,
        record.message
    )
}

fn format_timestamp(timestamp_ms: i64) -> String {
    match Local.timestamp_millis_opt(timestamp_ms) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
            dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
        }
        // Out of chrono's range; render the raw value instead of guessing
        LocalResult::None => format!("@{}ms", timestamp_ms),
    }
}

/// Wall-clock milliseconds since the Unix epoch
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Get current OS thread ID
pub(crate) fn current_thread_id() -> u64 {
    #[cfg(target_os = "linux")]
    {
        unsafe { libc::gettid() as u64 }
    }
    #[cfg(all(unix, not(target_os = "linux")))]
    {
        unsafe { libc::pthread_self() as u64 }
    }
    #[cfg(not(unix))]
    {
        // Fall back to hashing the opaque Rust thread ID
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        hasher.finish()
    }
}
