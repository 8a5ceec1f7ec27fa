// Async logger facade: construction, level gate, enqueue, flush, shutdown
//
// Producers pay for a level check, a record build, and a lock-free push;
// everything touching the disk happens on the dedicated writer thread.

use crate::archive::{create_archive, ArchiveError};
use crate::config::{Config, ConfigError};
use crate::crash::CrashHook;
use crate::filestore::{FileStore, StoreError};
use crate::level::Level;
use crate::overflow::OverflowBuffer;
use crate::queue::PrimaryQueue;
use crate::record::Record;
use crate::tagfilter::TagFilter;
use crate::writer::{self, Sink, WriterSignal};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use thiserror::Error;

pub const DEFAULT_QUEUE_SIZE: usize = 10_000;

#[derive(Debug, Error)]
pub enum CreateError {
    #[error("base name must not be empty")]
    EmptyBaseName,
    #[error("queue size must be non-zero")]
    ZeroQueueSize,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to spawn writer thread: {0}")]
    Thread(#[source] std::io::Error),
}

/// Shared state between the facade, the writer thread, and the crash hook.
pub(crate) struct LoggerCore {
    queue: PrimaryQueue,
    overflow: OverflowBuffer,
    sink: Mutex<Sink>,
    signal: WriterSignal,
    stop: AtomicBool,
    flush_hint: AtomicBool,
    min_level: AtomicU8,
    tag_filter: TagFilter,
    dropped: AtomicU64,
    pid: u32,
}

impl LoggerCore {
    pub(crate) fn signal(&self) -> &WriterSignal {
        &self.signal
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub(crate) fn take_flush_hint(&self) -> bool {
        self.flush_hint.swap(false, Ordering::AcqRel)
    }

    /// Drain both rings and push the lines through the file store.
    ///
    /// Every drain in the process goes through this sink lock, which is
    /// what upholds the rings' single-consumer contract between the writer
    /// thread, synchronous flushes, and the crash monitor.
    pub(crate) fn drain_to_disk(&self, sync: bool) {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);

        // Primary first; cross-ring age ordering is not promised
        let batch = self.queue.pop_all();
        sink.write_records(batch);
        let late = self.overflow.pop_all();
        sink.write_records(late);

        if sync {
            sink.flush();
        }
    }
}

/// Asynchronous logger with a dedicated background writer thread.
///
/// `log` returns after a lock-free enqueue; the writer formats, batches,
/// rotates, and persists. Dropping the logger stops the writer, joins it,
/// and performs a final flush.
pub struct AsyncLogger {
    core: Arc<LoggerCore>,
    writer: Option<JoinHandle<()>>,
    _crash_hook: CrashHook,
}

impl AsyncLogger {
    /// Create a logger with the default queue size.
    pub fn create(base_name: impl AsRef<Path>) -> Result<Self, CreateError> {
        Self::with_queue_size(base_name, DEFAULT_QUEUE_SIZE)
    }

    /// Create a logger with an explicit primary queue capacity; the
    /// overflow ring is sized to match.
    pub fn with_queue_size(
        base_name: impl AsRef<Path>,
        queue_size: usize,
    ) -> Result<Self, CreateError> {
        let base_name = base_name.as_ref();
        if base_name.as_os_str().is_empty() {
            return Err(CreateError::EmptyBaseName);
        }
        if queue_size == 0 {
            return Err(CreateError::ZeroQueueSize);
        }

        let pid = std::process::id();
        let store = FileStore::open(base_name, pid)?;
        Self::build(store, queue_size, Level::Debug, pid)
    }

    /// Create a logger from a full configuration.
    pub fn from_config(config: &Config) -> Result<Self, CreateError> {
        config.validate()?;

        let pid = std::process::id();
        let mut store = FileStore::open(Path::new(&config.base_name), pid)?;
        store.set_max_size(config.max_file_size);
        store.set_retention(config.retention);
        Self::build(store, config.queue_size, config.min_level, pid)
    }

    fn build(
        store: FileStore,
        queue_size: usize,
        min_level: Level,
        pid: u32,
    ) -> Result<Self, CreateError> {
        let core = Arc::new(LoggerCore {
            queue: PrimaryQueue::new(queue_size),
            overflow: OverflowBuffer::new(queue_size),
            sink: Mutex::new(Sink::new(store)),
            signal: WriterSignal::new(),
            stop: AtomicBool::new(false),
            flush_hint: AtomicBool::new(false),
            min_level: AtomicU8::new(min_level.as_u8()),
            tag_filter: TagFilter::new(),
            dropped: AtomicU64::new(0),
            pid,
        });

        let writer = {
            let core = Arc::clone(&core);
            std::thread::Builder::new()
                .name("flashlog-writer".into())
                .spawn(move || writer::run(&core))
                .map_err(CreateError::Thread)?
        };

        // The hook holds a weak back-reference: dropping the logger must
        // free the core even though the monitor thread lives on
        let crash_hook = {
            let weak = Arc::downgrade(&core);
            CrashHook::install(Box::new(move || {
                if let Some(core) = weak.upgrade() {
                    core.drain_to_disk(true);
                }
            }))
        };

        Ok(Self {
            core,
            writer: Some(writer),
            _crash_hook: crash_hook,
        })
    }

    /// Set the minimum level written out.
    pub fn set_level(&self, level: Level) {
        self.core.min_level.store(level.as_u8(), Ordering::Relaxed);
    }

    /// Current minimum level.
    pub fn level(&self) -> Level {
        Level::from_u8(self.core.min_level.load(Ordering::Relaxed)).unwrap_or(Level::Debug)
    }

    /// Enqueue a record. Never blocks and never fails visibly: under
    /// sustained overload records are dropped and counted.
    pub fn log(&self, level: Level, tag: &str, message: &str) {
        if !level.passes(self.level()) {
            return;
        }
        if !self.core.tag_filter.allows(tag, level) {
            return;
        }

        let record = Record::capture(level, self.core.pid, tag, message);
        match self.core.queue.try_push(record) {
            Ok(()) => self.core.signal.notify(),
            Err(record) => {
                if self.core.overflow.try_push(record) {
                    // The overflow ring is the last stop before loss; ask
                    // the writer for an early durability point
                    self.core.flush_hint.store(true, Ordering::Release);
                    self.core.signal.notify();
                } else {
                    self.core.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    pub fn debug(&self, tag: &str, message: &str) {
        self.log(Level::Debug, tag, message);
    }

    pub fn info(&self, tag: &str, message: &str) {
        self.log(Level::Info, tag, message);
    }

    pub fn warning(&self, tag: &str, message: &str) {
        self.log(Level::Warning, tag, message);
    }

    pub fn error(&self, tag: &str, message: &str) {
        self.log(Level::Error, tag, message);
    }

    /// Synchronously drain both rings, write everything out, and sync.
    ///
    /// Everything enqueued before this call is on disk when it returns.
    pub fn flush(&self) {
        self.core.drain_to_disk(true);
    }

    /// Enable or disable a tag outright.
    pub fn set_tag_enabled(&self, tag: &str, enabled: bool) {
        self.core.tag_filter.set_tag_enabled(tag, enabled);
    }

    /// Set a per-tag minimum level.
    pub fn set_tag_level(&self, tag: &str, level: Level) {
        self.core.tag_filter.set_tag_level(tag, level);
    }

    /// Records dropped because both rings were full.
    pub fn dropped_records(&self) -> u64 {
        self.core.dropped.load(Ordering::Relaxed)
    }

    /// Writer-side failures absorbed so far (failed writes or rotations).
    pub fn write_failures(&self) -> u64 {
        self.lock_sink().write_failures()
    }

    /// True after a failed rotation left the store unable to reopen.
    pub fn is_degraded(&self) -> bool {
        self.lock_sink().is_degraded()
    }

    /// Path of the file currently being written.
    pub fn log_path(&self) -> PathBuf {
        self.lock_sink().store().current_path().to_owned()
    }

    /// Bundle this logger's `.log` files into `<base>_<pid>_<timestamp>.zip`.
    ///
    /// Flushes first so the archive reflects everything enqueued so far.
    pub fn archive(&self, timestamp: &str) -> Result<PathBuf, ArchiveError> {
        self.flush();
        let base_name = self.lock_sink().store().base_name().to_owned();
        create_archive(&base_name, self.core.pid, timestamp)
    }

    fn lock_sink(&self) -> std::sync::MutexGuard<'_, Sink> {
        self.core.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AsyncLogger {
    fn drop(&mut self) {
        self.core.stop.store(true, Ordering::Release);
        self.core.signal.notify();
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
        // Catch records enqueued after the writer observed the stop flag;
        // shutdown errors are ignored so control returns to the caller
        self.core.drain_to_disk(true);
    }
}
