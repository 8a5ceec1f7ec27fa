// SPDX-License-Identifier: Apache-2.0 OR MIT
// File store: per-process naming, size-based rotation, retention, and
// cross-process ownership arbitration
//
// Naming scheme:
//   <base>.log        first live process for this base name (primary)
//   <base>_<pid>.log  concurrent process (secondary)
//   <base>.<n>.log    rotated historicals, n strictly increasing

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Flush the user-space buffer and sync the descriptor every time the file
/// size crosses a multiple of this many bytes.
pub const FLUSH_INTERVAL: u64 = 1024 * 1024;

pub const DEFAULT_MAX_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_RETENTION: usize = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to open log file {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("write to {path} failed: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
    #[error("log store is closed after a failed rotation")]
    Closed,
    #[error("could not resolve working directory: {0}")]
    WorkingDir(#[source] io::Error),
}

/// Append a suffix to a path's final component.
pub(crate) fn path_with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

// ============================================================================
// Cross-process ownership
// ============================================================================

/// Host-wide arbitration of the primary file name for one base name.
///
/// At most one live holder per base name across all processes on the host.
/// The holder keeps the primitive until drop; the underlying name is left
/// registered so concurrent observers keep resolving it.
///
/// Three implementations: a kernel mutex under the Global namespace on
/// Windows, a named POSIX semaphore on unix, and a filesystem-existence
/// probe for platforms in neither family.
trait ProcessLock: Send {
    /// True when this process won primary ownership.
    fn is_primary(&self) -> bool;
}

#[cfg(windows)]
mod win_lock {
    use super::ProcessLock;
    use std::path::Path;
    use windows::core::HSTRING;
    use windows::Win32::Foundation::{CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, HANDLE};
    use windows::Win32::System::Threading::{CreateMutexW, ReleaseMutex};

    /// Kernel-mutex ownership token under the Global namespace.
    ///
    /// Winning the creation race makes this process the primary; an
    /// already-exists result means another process holds the name.
    pub(super) struct MutexLock {
        handle: Option<HANDLE>,
    }

    // SAFETY: the handle is only released and closed once, on drop
    unsafe impl Send for MutexLock {}

    impl MutexLock {
        pub(super) fn acquire(base: &Path) -> Self {
            let file_name = base
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let name = HSTRING::from(format!("Global\\FLM_{file_name}"));

            match unsafe { CreateMutexW(None, false, &name) } {
                Ok(handle) => {
                    if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
                        // Another process created this mutex first
                        unsafe {
                            let _ = CloseHandle(handle);
                        }
                        Self { handle: None }
                    } else {
                        Self {
                            handle: Some(handle),
                        }
                    }
                }
                Err(_) => Self { handle: None },
            }
        }
    }

    impl ProcessLock for MutexLock {
        fn is_primary(&self) -> bool {
            self.handle.is_some()
        }
    }

    impl Drop for MutexLock {
        fn drop(&mut self) {
            if let Some(handle) = self.handle.take() {
                unsafe {
                    let _ = ReleaseMutex(handle);
                    let _ = CloseHandle(handle);
                }
            }
        }
    }
}

#[cfg(unix)]
mod posix_lock {
    use super::ProcessLock;
    use std::ffi::CString;
    use std::hash::{Hash, Hasher};
    use std::path::Path;

    // Named POSIX semaphore keys must stay short (31 bytes on some hosts)
    const MAX_NAME_LEN: usize = 30;

    /// Named-semaphore ownership token.
    ///
    /// Created with O_CREAT | O_EXCL: winning the creation race makes this
    /// process the primary. The name is never unlinked, other processes may
    /// still be observing it.
    pub(super) struct SemaphoreLock {
        sem: *mut libc::sem_t,
        primary: bool,
    }

    // SAFETY: the semaphore handle is only closed once, on drop
    unsafe impl Send for SemaphoreLock {}

    impl SemaphoreLock {
        pub(super) fn acquire(base: &Path) -> Self {
            let file_name = base
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let name = semaphore_name(&file_name);

            let Ok(c_name) = CString::new(name) else {
                return Self {
                    sem: std::ptr::null_mut(),
                    primary: false,
                };
            };

            let sem = unsafe {
                libc::sem_open(
                    c_name.as_ptr(),
                    libc::O_CREAT | libc::O_EXCL,
                    0o644 as libc::c_uint,
                    1 as libc::c_uint,
                )
            };

            if sem == libc::SEM_FAILED {
                // EEXIST and every other failure mean someone else owns the
                // primary name
                Self {
                    sem: std::ptr::null_mut(),
                    primary: false,
                }
            } else {
                Self { sem, primary: true }
            }
        }
    }

    impl ProcessLock for SemaphoreLock {
        fn is_primary(&self) -> bool {
            self.primary
        }
    }

    impl Drop for SemaphoreLock {
        fn drop(&mut self) {
            if !self.sem.is_null() {
                // Close but do not unlink; see module comment
                unsafe {
                    libc::sem_close(self.sem);
                }
                self.sem = std::ptr::null_mut();
            }
        }
    }

    fn semaphore_name(file_name: &str) -> String {
        let name = format!("/FLM_{file_name}");
        if name.len() <= MAX_NAME_LEN {
            return name;
        }
        // Length-adjusted key: truncate and disambiguate with a hash
        let truncated: String = file_name.chars().take(15).collect();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        file_name.hash(&mut hasher);
        format!("/FLM_{truncated}_{}", hasher.finish() % 100_000)
    }

}

#[cfg(not(any(unix, windows)))]
mod probe_lock {
    use super::{path_with_suffix, ProcessLock};
    use std::path::Path;

    /// Fallback arbitration: the existence of `<base>.log` is the proxy
    /// signal for a live primary.
    pub(super) struct PathProbeLock {
        primary: bool,
    }

    impl PathProbeLock {
        pub(super) fn acquire(base: &Path) -> Self {
            Self {
                primary: !path_with_suffix(base, ".log").exists(),
            }
        }
    }

    impl ProcessLock for PathProbeLock {
        fn is_primary(&self) -> bool {
            self.primary
        }
    }
}

fn acquire_lock(base: &Path) -> Box<dyn ProcessLock> {
    #[cfg(windows)]
    {
        Box::new(win_lock::MutexLock::acquire(base))
    }
    #[cfg(unix)]
    {
        Box::new(posix_lock::SemaphoreLock::acquire(base))
    }
    #[cfg(not(any(unix, windows)))]
    {
        Box::new(probe_lock::PathProbeLock::acquire(base))
    }
}

// ============================================================================
// FileStore
// ============================================================================

/// Owns the current log file for one base name.
///
/// Mutated only under the facade's sink lock; producers never touch it
/// after construction.
pub struct FileStore {
    base_name: PathBuf,
    pid: u32,
    current_path: PathBuf,
    current_size: u64,
    max_size: u64,
    retention: usize,
    writer: Option<BufWriter<File>>,
    primary: bool,
    _lock: Box<dyn ProcessLock>,
}

impl FileStore {
    /// Resolve the base name, arbitrate ownership, and open the log file.
    pub fn open(base_name: &Path, pid: u32) -> Result<Self, StoreError> {
        let base_name = if base_name.is_absolute() {
            base_name.to_owned()
        } else {
            std::env::current_dir()
                .map_err(StoreError::WorkingDir)?
                .join(base_name)
        };

        if let Some(parent) = base_name.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                    path: parent.to_owned(),
                    source,
                })?;
            }
        }

        let lock = acquire_lock(&base_name);
        let primary = lock.is_primary();
        let current_path = file_name_for(&base_name, primary, pid);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&current_path)
            .map_err(|source| StoreError::Open {
                path: current_path.clone(),
                source,
            })?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            base_name,
            pid,
            current_path,
            current_size,
            max_size: DEFAULT_MAX_SIZE,
            retention: DEFAULT_RETENTION,
            writer: Some(BufWriter::new(file)),
            primary,
            _lock: lock,
        })
    }

    /// Append bytes to the current file.
    pub fn write(&mut self, data: &[u8]) -> Result<(), StoreError> {
        let writer = self.writer.as_mut().ok_or(StoreError::Closed)?;
        writer.write_all(data).map_err(|source| StoreError::Write {
            path: self.current_path.clone(),
            source,
        })?;

        let before = self.current_size;
        self.current_size += data.len() as u64;

        // Periodic durability: flush + sync on every 1 MiB boundary crossed
        if self.current_size / FLUSH_INTERVAL != before / FLUSH_INTERVAL {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush the user-space buffer and sync the descriptor.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        let writer = self.writer.as_mut().ok_or(StoreError::Closed)?;
        writer
            .flush()
            .and_then(|()| writer.get_ref().sync_data())
            .map_err(|source| StoreError::Write {
                path: self.current_path.clone(),
                source,
            })
    }

    pub fn needs_rotation(&self) -> bool {
        self.current_size >= self.max_size
    }

    /// Close the current file, rename it into the historical sequence,
    /// prune retention, and open a fresh file.
    ///
    /// A failed rename leaves the store closed; subsequent writes report
    /// `StoreError::Closed` until the process restarts logging.
    pub fn rotate(&mut self) -> Result<(), StoreError> {
        let mut writer = self.writer.take().ok_or(StoreError::Closed)?;
        let _ = writer.flush();
        drop(writer);

        let historical = self.historical_files();
        let next = historical.iter().map(|(seq, _)| *seq).max().unwrap_or(0) + 1;

        let rotated = path_with_suffix(&self.base_name, &format!(".{next}.log"));
        fs::rename(&self.current_path, &rotated).map_err(|source| StoreError::Rename {
            from: self.current_path.clone(),
            to: rotated.clone(),
            source,
        })?;

        self.prune_retention();

        // Reopen under the identity this store owns; a secondary must not
        // claim the primary name away from a live owner
        self.current_path = file_name_for(&self.base_name, self.primary, self.pid);
        let file = File::create(&self.current_path).map_err(|source| StoreError::Open {
            path: self.current_path.clone(),
            source,
        })?;
        self.writer = Some(BufWriter::new(file));
        self.current_size = 0;
        Ok(())
    }

    /// Historical files `<base>.<n>.log`, unsorted. Files that do not parse
    /// are ignored for both sequencing and retention.
    fn historical_files(&self) -> Vec<(u64, PathBuf)> {
        let Some(stem) = self.base_name.file_name().map(|n| n.to_string_lossy()) else {
            return Vec::new();
        };
        let Some(dir) = self.base_name.parent() else {
            return Vec::new();
        };
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };

        let mut files = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(seq) = parse_sequence(&name, &stem) {
                files.push((seq, path));
            }
        }
        files
    }

    fn prune_retention(&self) {
        let mut historical = self.historical_files();
        while historical.len() > self.retention {
            let Some(oldest) = historical
                .iter()
                .enumerate()
                .min_by_key(|(_, (seq, _))| *seq)
                .map(|(i, _)| i)
            else {
                break;
            };
            let (_, path) = historical.swap_remove(oldest);
            let _ = fs::remove_file(path);
        }
    }

    pub fn set_max_size(&mut self, max_size: u64) {
        self.max_size = max_size;
    }

    pub fn set_retention(&mut self, retention: usize) {
        self.retention = retention;
    }

    pub fn current_path(&self) -> &Path {
        &self.current_path
    }

    /// Absolute base name stem this store was opened with
    pub fn base_name(&self) -> &Path {
        &self.base_name
    }

    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        // Shutdown prioritises returning control; errors are ignored
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
    }
}

fn file_name_for(base: &Path, primary: bool, pid: u32) -> PathBuf {
    if primary {
        path_with_suffix(base, ".log")
    } else {
        path_with_suffix(base, &format!("_{pid}.log"))
    }
}

/// Parse `<stem>.<digits>.log` into its sequence number.
fn parse_sequence(file_name: &str, stem: &str) -> Option<u64> {
    let rest = file_name.strip_prefix(stem)?.strip_prefix('.')?;
    let digits = rest.strip_suffix(".log")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
