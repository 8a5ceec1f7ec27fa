// Background writer: wait -> drain -> format -> write -> rotate

use crate::filestore::{FileStore, StoreError};
use crate::record::{format_record, Record};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Poll fallback interval for the case where a producer signal is missed
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Counting wakeup signal for the writer thread.
///
/// Producers release one unit per successful enqueue; the writer blocks on
/// it with a timeout so a lost signal only delays a drain by one poll tick.
pub(crate) struct WriterSignal {
    count: Mutex<u64>,
    condvar: Condvar,
}

impl WriterSignal {
    pub(crate) fn new() -> Self {
        Self {
            count: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn notify(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_add(1);
        self.condvar.notify_one();
    }

    /// Wait for a signal or the poll timeout; returns true when signaled.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut count, _) = self
            .condvar
            .wait_timeout_while(count, timeout, |pending| *pending == 0)
            .unwrap_or_else(PoisonError::into_inner);
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }
}

/// The writer-side end of the pipeline: formats records and pushes the
/// bytes through the file store, rotating on demand.
///
/// Only ever touched under the facade's sink lock.
pub(crate) struct Sink {
    store: FileStore,
    /// Set after a failed rotation left the store closed
    degraded: bool,
    write_failures: u64,
}

impl Sink {
    pub(crate) fn new(store: FileStore) -> Self {
        Self {
            store,
            degraded: false,
            write_failures: 0,
        }
    }

    /// Write a batch of records.
    ///
    /// A single failed write must never take the writer down; the failure
    /// is counted and the loop moves on so subsequent records still land.
    pub(crate) fn write_records(&mut self, records: Vec<Record>) {
        for record in records {
            let line = format_record(&record);
            if let Err(error) = self.store.write(line.as_bytes()) {
                self.note_failure(error);
                continue;
            }
            if self.store.needs_rotation() {
                if let Err(error) = self.store.rotate() {
                    self.note_failure(error);
                }
            }
        }
    }

    pub(crate) fn flush(&mut self) {
        if let Err(error) = self.store.flush() {
            self.note_failure(error);
        }
    }

    fn note_failure(&mut self, error: StoreError) {
        self.write_failures = self.write_failures.saturating_add(1);
        if matches!(error, StoreError::Closed | StoreError::Rename { .. }) {
            self.degraded = true;
        }
    }

    pub(crate) fn write_failures(&self) -> u64 {
        self.write_failures
    }

    pub(crate) fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub(crate) fn store(&self) -> &FileStore {
        &self.store
    }
}

/// Writer thread body. Loops until the stop flag is raised, then performs
/// one final drain so records enqueued during shutdown still land.
pub(crate) fn run(core: &crate::logger::LoggerCore) {
    loop {
        core.signal().wait(POLL_INTERVAL);

        if core.stop_requested() {
            core.drain_to_disk(true);
            break;
        }

        // An overflow enqueue requests an early durability point
        let sync = core.take_flush_hint();
        core.drain_to_disk(sync);
    }
}
