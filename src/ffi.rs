// C ABI surface: opaque handles for non-native callers
//
// The handle is an owning raw pointer to a heap-allocated AsyncLogger;
// every function null-checks before forwarding to it. Status codes are
// stable integers.

use crate::level::Level;
use crate::logger::AsyncLogger;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Status codes returned across the boundary
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashlogStatus {
    Success = 0,
    InvalidArgument = -1,
    NullPointer = -2,
    AlreadyInitialized = -3,
    NotInitialized = -4,
    FileIo = -5,
    Memory = -6,
    Thread = -7,
}

/// Create a logger for the given null-terminated base name.
///
/// Returns an owning handle, or null on any failure. The handle must be
/// released with `flashlog_destroy`.
///
/// # Safety
/// `base_name` must be null or a valid null-terminated string.
#[no_mangle]
pub extern "C" fn flashlog_create(base_name: *const c_char) -> *mut AsyncLogger {
    if base_name.is_null() {
        return std::ptr::null_mut();
    }
    let Ok(base_name) = unsafe { CStr::from_ptr(base_name) }.to_str() else {
        return std::ptr::null_mut();
    };

    // A panic must not unwind across the boundary
    match catch_unwind(|| AsyncLogger::create(base_name)) {
        Ok(Ok(logger)) => Box::into_raw(Box::new(logger)),
        _ => std::ptr::null_mut(),
    }
}

/// Log a message. `level` must be in `[0, 3]`.
///
/// # Safety
/// `logger` must be null or a handle from `flashlog_create` that has not
/// been destroyed; `tag` and `message` must be null or valid
/// null-terminated strings.
#[no_mangle]
pub extern "C" fn flashlog_log(
    logger: *mut AsyncLogger,
    level: c_int,
    tag: *const c_char,
    message: *const c_char,
) -> FlashlogStatus {
    if logger.is_null() || tag.is_null() || message.is_null() {
        return FlashlogStatus::NullPointer;
    }
    let Some(level) = u8::try_from(level).ok().and_then(Level::from_u8) else {
        return FlashlogStatus::InvalidArgument;
    };
    let (Ok(tag), Ok(message)) = (
        unsafe { CStr::from_ptr(tag) }.to_str(),
        unsafe { CStr::from_ptr(message) }.to_str(),
    ) else {
        return FlashlogStatus::InvalidArgument;
    };

    let logger = unsafe { &*logger };
    match catch_unwind(AssertUnwindSafe(|| logger.log(level, tag, message))) {
        Ok(()) => FlashlogStatus::Success,
        Err(_) => FlashlogStatus::Memory,
    }
}

/// Set the minimum log level. `level` must be in `[0, 3]`.
///
/// # Safety
/// `logger` must be null or a live handle from `flashlog_create`.
#[no_mangle]
pub extern "C" fn flashlog_set_level(logger: *mut AsyncLogger, level: c_int) -> FlashlogStatus {
    if logger.is_null() {
        return FlashlogStatus::NullPointer;
    }
    let Some(level) = u8::try_from(level).ok().and_then(Level::from_u8) else {
        return FlashlogStatus::InvalidArgument;
    };

    unsafe { &*logger }.set_level(level);
    FlashlogStatus::Success
}

/// Get the minimum log level, or a negative status code.
///
/// # Safety
/// `logger` must be null or a live handle from `flashlog_create`.
#[no_mangle]
pub extern "C" fn flashlog_get_level(logger: *const AsyncLogger) -> c_int {
    if logger.is_null() {
        return FlashlogStatus::NullPointer as c_int;
    }
    unsafe { &*logger }.level().as_u8() as c_int
}

/// Synchronously flush everything enqueued so far.
///
/// # Safety
/// `logger` must be null or a live handle from `flashlog_create`.
#[no_mangle]
pub extern "C" fn flashlog_flush(logger: *mut AsyncLogger) -> FlashlogStatus {
    if logger.is_null() {
        return FlashlogStatus::NullPointer;
    }
    unsafe { &*logger }.flush();
    FlashlogStatus::Success
}

/// Records dropped because both rings were full; 0 for a null handle.
///
/// # Safety
/// `logger` must be null or a live handle from `flashlog_create`.
#[no_mangle]
pub extern "C" fn flashlog_dropped_records(logger: *const AsyncLogger) -> u64 {
    if logger.is_null() {
        return 0;
    }
    unsafe { &*logger }.dropped_records()
}

/// Archive this logger's files into `<base>_<pid>_<yyyymmddHHMMSS>.zip`.
///
/// # Safety
/// `logger` must be null or a live handle from `flashlog_create`.
#[no_mangle]
pub extern "C" fn flashlog_archive(logger: *mut AsyncLogger) -> FlashlogStatus {
    if logger.is_null() {
        return FlashlogStatus::NullPointer;
    }
    let timestamp = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
    match unsafe { &*logger }.archive(&timestamp) {
        Ok(_) => FlashlogStatus::Success,
        Err(_) => FlashlogStatus::FileIo,
    }
}

/// Destroy the logger, joining the writer after a final flush.
///
/// # Safety
/// `logger` must be null or a handle from `flashlog_create`; the handle is
/// invalid after this call.
#[no_mangle]
pub extern "C" fn flashlog_destroy(logger: *mut AsyncLogger) -> FlashlogStatus {
    if logger.is_null() {
        return FlashlogStatus::NullPointer;
    }
    let logger = unsafe { Box::from_raw(logger) };
    match catch_unwind(AssertUnwindSafe(move || drop(logger))) {
        Ok(()) => FlashlogStatus::Success,
        Err(_) => FlashlogStatus::Thread,
    }
}
