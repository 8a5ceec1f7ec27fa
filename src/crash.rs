// Crash hook: fatal-signal interception and emergency flush handoff
//
// The signal handler itself only touches process-wide atomics; the actual
// flush (formatting, file I/O, allocation) is none of it async-signal-safe
// and runs on a dedicated monitor thread instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// How often the monitor thread checks the flush-request flag
const MONITOR_INTERVAL: Duration = Duration::from_millis(10);

/// Upper bound on how long the signal handler waits for the monitor to
/// finish the flush before re-raising
const HANDLER_WAIT_MS: u64 = 2000;

static INSTALLED: AtomicBool = AtomicBool::new(false);
static MONITOR_STARTED: AtomicBool = AtomicBool::new(false);
static FLUSH_REQUESTED: AtomicBool = AtomicBool::new(false);
static FLUSH_DONE: AtomicBool = AtomicBool::new(false);
static FLUSH_CALLBACK: Mutex<Option<Box<dyn Fn() + Send>>> = Mutex::new(None);

/// Process-wide crash hook.
///
/// Registers handlers for SIGSEGV and SIGABRT that request an emergency
/// flush and then let the default disposition terminate the process. Only
/// one hook per process can own the registration; constructing another
/// returns a non-owning handle and changes nothing.
pub struct CrashHook {
    owner: bool,
}

impl CrashHook {
    /// Install the hook with the flush callback to run on a fatal signal.
    ///
    /// The callback runs on the monitor thread, outside signal context, so
    /// it may allocate, lock, and perform file I/O.
    pub fn install(callback: Box<dyn Fn() + Send>) -> Self {
        if INSTALLED.swap(true, Ordering::AcqRel) {
            return Self { owner: false };
        }

        *lock_callback() = Some(callback);

        if !MONITOR_STARTED.swap(true, Ordering::AcqRel) {
            // The monitor outlives every hook; after a flush it just goes
            // back to sleep
            thread::Builder::new()
                .name("flashlog-crash-monitor".into())
                .spawn(monitor_loop)
                .ok();
        }

        register_handlers();
        Self { owner: true }
    }

    /// Ask the monitor thread to run the flush callback now.
    ///
    /// This is the non-signal entry to the same path the handler takes.
    pub fn request_flush() {
        FLUSH_DONE.store(false, Ordering::Release);
        FLUSH_REQUESTED.store(true, Ordering::Release);
    }
}

impl Drop for CrashHook {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        *lock_callback() = None;
        restore_default_handlers();
        INSTALLED.store(false, Ordering::Release);
    }
}

fn lock_callback() -> std::sync::MutexGuard<'static, Option<Box<dyn Fn() + Send>>> {
    FLUSH_CALLBACK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn monitor_loop() {
    loop {
        thread::sleep(MONITOR_INTERVAL);
        if FLUSH_REQUESTED.swap(false, Ordering::AcqRel) {
            if let Some(callback) = lock_callback().as_ref() {
                callback();
            }
            FLUSH_DONE.store(true, Ordering::Release);
        }
    }
}

#[cfg(unix)]
fn register_handlers() {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let action = SigAction::new(
        SigHandler::Handler(fatal_signal_handler),
        // Restore the default disposition before the handler returns so
        // the re-raise terminates the process
        SaFlags::SA_RESETHAND,
        SigSet::empty(),
    );
    unsafe {
        let _ = sigaction(Signal::SIGSEGV, &action);
        let _ = sigaction(Signal::SIGABRT, &action);
    }
}

#[cfg(unix)]
fn restore_default_handlers() {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    unsafe {
        let _ = sigaction(Signal::SIGSEGV, &action);
        let _ = sigaction(Signal::SIGABRT, &action);
    }
}

// Async-signal-safe: atomics, nanosleep, and raise only. No allocation,
// no locks, no formatting.
#[cfg(unix)]
extern "C" fn fatal_signal_handler(signum: libc::c_int) {
    FLUSH_DONE.store(false, Ordering::Release);
    FLUSH_REQUESTED.store(true, Ordering::Release);

    let mut waited_ms = 0u64;
    while !FLUSH_DONE.load(Ordering::Acquire) && waited_ms < HANDLER_WAIT_MS {
        let interval = libc::timespec {
            tv_sec: 0,
            tv_nsec: 10_000_000,
        };
        unsafe {
            libc::nanosleep(&interval, std::ptr::null_mut());
        }
        waited_ms += 10;
    }

    // SA_RESETHAND already restored the default disposition
    unsafe {
        libc::raise(signum);
    }
}

#[cfg(not(unix))]
fn register_handlers() {}

#[cfg(not(unix))]
fn restore_default_handlers() {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    // One test driving the whole lifecycle: the statics are process-wide,
    // so splitting these into separate tests would make them racy.
    #[test]
    fn test_install_once_flush_and_reinstall() {
        let flushes = Arc::new(AtomicUsize::new(0));

        // Other tests in this binary spin up loggers that install the hook
        // for their lifetime; retry until this hook owns the registration
        let hook = loop {
            let flushes = Arc::clone(&flushes);
            let hook = CrashHook::install(Box::new(move || {
                flushes.fetch_add(1, Ordering::SeqCst);
            }));
            if hook.owner {
                break hook;
            }
            drop(hook);
            thread::sleep(Duration::from_millis(10));
        };

        // Second construction is a no-op handle
        let second = CrashHook::install(Box::new(|| {}));
        assert!(!second.owner);
        drop(second);

        CrashHook::request_flush();
        for _ in 0..100 {
            if flushes.load(Ordering::SeqCst) > 0 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
        assert!(FLUSH_DONE.load(Ordering::Acquire));

        // Dropping the owner unregisters the callback and frees the slot
        drop(hook);
        let mut rearmed = false;
        for _ in 0..200 {
            let again = CrashHook::install(Box::new(|| {}));
            let owned = again.owner;
            drop(again);
            if owned {
                rearmed = true;
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(rearmed);
    }
}
