// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging macros for convenient logging

/// Log a message with debug level
///
/// # Examples
/// ```ignore
/// log_debug!(logger, "NET", "handshake started");
/// ```
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $tag:expr, $msg:expr) => {
        $logger.debug($tag, $msg)
    };
}

/// Log a message with info level
///
/// # Examples
/// ```ignore
/// log_info!(logger, "NET", "connection established");
/// ```
#[macro_export]
macro_rules! log_info {
    ($logger:expr, $tag:expr, $msg:expr) => {
        $logger.info($tag, $msg)
    };
}

/// Log a message with warning level
///
/// # Examples
/// ```ignore
/// log_warning!(logger, "DISK", "free space below 10%");
/// ```
#[macro_export]
macro_rules! log_warning {
    ($logger:expr, $tag:expr, $msg:expr) => {
        $logger.warning($tag, $msg)
    };
}

/// Log a message with error level
///
/// # Examples
/// ```ignore
/// log_error!(logger, "DISK", "write failed");
/// ```
#[macro_export]
macro_rules! log_error {
    ($logger:expr, $tag:expr, $msg:expr) => {
        $logger.error($tag, $msg)
    };
}

#[cfg(test)]
mod tests {
    use crate::logger::AsyncLogger;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};
    use tempfile::TempDir;

    // Base names feed host-wide ownership primitives that outlive the
    // process, so the test gets a name no other run can have used
    fn unique_base(dir: &TempDir) -> std::path::PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        dir.path().join(format!(
            "macros_{}_{}_{nanos}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ))
    }

    #[test]
    fn test_each_macro_writes_its_level() {
        let dir = TempDir::new().unwrap();
        let logger = AsyncLogger::create(unique_base(&dir)).unwrap();

        log_debug!(logger, "MAC", "debug line");
        log_info!(logger, "MAC", "info line");
        log_warning!(logger, "MAC", "warning line");
        log_error!(logger, "MAC", "error line");
        logger.flush();
        let path = logger.log_path();
        drop(logger);

        let contents = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("[DEBUG] "));
        assert!(lines[0].ends_with("[MAC]: debug line"));
        assert!(lines[1].starts_with("[INFO] "));
        assert!(lines[1].ends_with("[MAC]: info line"));
        assert!(lines[2].starts_with("[WARNING] "));
        assert!(lines[2].ends_with("[MAC]: warning line"));
        assert!(lines[3].starts_with("[ERROR] "));
        assert!(lines[3].ends_with("[MAC]: error line"));
    }

    #[test]
    fn test_macros_respect_the_level_gate() {
        let dir = TempDir::new().unwrap();
        let logger = AsyncLogger::create(unique_base(&dir)).unwrap();
        logger.set_level(crate::level::Level::Error);

        log_debug!(logger, "MAC", "filtered");
        log_info!(logger, "MAC", "filtered");
        log_warning!(logger, "MAC", "filtered");
        log_error!(logger, "MAC", "kept");
        logger.flush();
        let path = logger.log_path();
        drop(logger);

        let contents = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("[ERROR] "));
    }
}
