//! C-compatible Foreign Function Interface (FFI) for rangefetch
//!
//! Handle-based bindings that let C callers run a session from their own
//! `select`/`poll` loop.
//!
//! # Handles
//!
//! `rangefetch_create` returns a non-zero handle, or 0 on failure. Every other
//! call takes that handle; unknown or destroyed handles are rejected with -1,
//! so destroying twice is harmless.
//!
//! # Error Handling
//!
//! Functions returning `int` use -1 for failure. Nothing panics across the
//! boundary.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use once_cell::sync::Lazy;

use crate::core::config::FetchConfig;
use crate::core::source::Source;

type Handle = u64;

/// Live sources keyed by handle
static REGISTRY: Lazy<Mutex<HashMap<Handle, Arc<Mutex<Source>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn lookup(handle: Handle) -> Option<Arc<Mutex<Source>>> {
    let registry = REGISTRY.lock().unwrap_or_else(|p| p.into_inner());
    registry.get(&handle).cloned()
}

fn with_source<R>(handle: Handle, f: impl FnOnce(&mut Source) -> R) -> Option<R> {
    let source = lookup(handle)?;
    let mut guard = source.lock().unwrap_or_else(|p| p.into_inner());
    Some(f(&mut guard))
}

/// Start fetching `url`
///
/// # Parameters
/// - `url`: null-terminated URL string
///
/// # Returns
/// A handle for the other calls, or 0 on failure
#[no_mangle]
pub extern "C" fn rangefetch_create(url: *const c_char) -> u64 {
    if url.is_null() {
        return 0;
    }
    let url = match unsafe { CStr::from_ptr(url) }.to_str() {
        Ok(s) => s,
        Err(_) => return 0,
    };

    match Source::open(url, FetchConfig::default()) {
        Ok(source) => {
            let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
            REGISTRY
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .insert(handle, Arc::new(Mutex::new(source)));
            handle
        }
        Err(e) => {
            log::error!("rangefetch_create({}) failed: {}", url, e);
            0
        }
    }
}

/// Cancel all transfers and free every buffer. Unknown handles are ignored.
#[no_mangle]
pub extern "C" fn rangefetch_destroy(handle: u64) {
    let removed = REGISTRY
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .remove(&handle);
    if let Some(source) = removed {
        source.lock().unwrap_or_else(|p| p.into_inner()).destroy();
    }
}

/// Advance all transfers without blocking
///
/// # Returns
/// Number of requests still active (0 once finished), or -1 on failure
#[no_mangle]
pub extern "C" fn rangefetch_perform(handle: u64) -> c_int {
    match with_source(handle, |source| source.step()) {
        Some(Ok(active)) => active.min(c_int::MAX as usize) as c_int,
        Some(Err(e)) => {
            log::error!("rangefetch_perform({}) failed: {}", handle, e);
            -1
        }
        None => -1,
    }
}

/// Add the session's descriptors to the caller's `fd_set`s
///
/// `max_fd` is raised to the highest descriptor added and left alone when
/// there is none; any of the sets may be NULL.
///
/// # Returns
/// 0 on success, -1 on failure
///
/// # Safety
/// Non-null pointers must point to valid, initialised `fd_set`s and `int`.
#[cfg(unix)]
#[no_mangle]
pub unsafe extern "C" fn rangefetch_fdset(
    handle: u64,
    read_fds: *mut libc::fd_set,
    write_fds: *mut libc::fd_set,
    exc_fds: *mut libc::fd_set,
    max_fd: *mut c_int,
) -> c_int {
    let readiness = match with_source(handle, |source| source.readiness()) {
        Some(readiness) => readiness,
        None => return -1,
    };

    let sets = [
        (read_fds, &readiness.read),
        (write_fds, &readiness.write),
        (exc_fds, &readiness.except),
    ];
    for (set, fds) in sets {
        if set.is_null() {
            continue;
        }
        for &fd in fds {
            if fd < 0 || fd >= libc::FD_SETSIZE as c_int {
                return -1;
            }
            libc::FD_SET(fd, set);
        }
    }

    if !max_fd.is_null() && readiness.max_fd > *max_fd {
        *max_fd = readiness.max_fd;
    }
    0
}

/// Copy up to `len` fetched bytes into `buf`
///
/// # Returns
/// Bytes copied (0 means nothing is ready yet), or -1 on failure
///
/// # Safety
/// `buf` must be valid for writes of `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn rangefetch_read(handle: u64, buf: *mut u8, len: usize) -> isize {
    if buf.is_null() {
        return -1;
    }
    let out = std::slice::from_raw_parts_mut(buf, len);
    match with_source(handle, |source| source.read(out)) {
        Some(Ok(n)) => n as isize,
        _ => -1,
    }
}

/// Whether every byte has been fetched and read
///
/// # Returns
/// 1 when drained, 0 when not, -1 for an unknown handle
#[no_mangle]
pub extern "C" fn rangefetch_finished(handle: u64) -> c_int {
    match with_source(handle, |source| source.is_drained()) {
        Some(true) => 1,
        Some(false) => 0,
        None => -1,
    }
}

/// Get library version string
///
/// # Returns
/// Static string with version information (does not need to be freed)
#[no_mangle]
pub extern "C" fn rangefetch_version() -> *const c_char {
    static VERSION_STRING: OnceLock<CString> = OnceLock::new();

    VERSION_STRING
        .get_or_init(|| {
            CString::new(format!("rangefetch {}", env!("RANGEFETCH_VERSION")))
                .unwrap_or_default()
        })
        .as_ptr()
}
