// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # keyroute C FFI Bindings
//!
//! C-compatible bindings for keyroute sessions, key expressions and
//! query/reply correlation.
//!
//! ```c
//! KrSession* session = NULL;
//! if (kr_session_open(NULL, &session) != KR_OK) { return 1; }
//! kr_put(session, "demo/a", (const uint8_t*)"hello", 5, NULL);
//! kr_session_close(session);
//! kr_session_free(session);
//! ```
//!
//! # Safety
//!
//! All public functions are `unsafe` and require the caller to uphold the
//! invariants documented in each function's safety comment.

mod keyexpr_ffi;
mod logging;
mod pubsub;
mod query_ffi;

pub use keyexpr_ffi::*;
pub use logging::*;
pub use pubsub::*;
pub use query_ffi::*;

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::ptr;

use keyroute::{Config, Encoding, Error, PutOptions, Session};

// =============================================================================
// Error codes
// =============================================================================

/// Status codes returned by every fallible `kr_*` function.
///
/// - **0-9**: Generic
/// - **10-19**: Key expressions, selectors and declarations
/// - **20-29**: Configuration and I/O
/// - **30-39**: Session state
/// - **40-49**: Payloads
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KrError {
    /// Operation completed successfully
    KrOk = 0,
    /// Invalid argument provided (null pointer, bad UTF-8)
    KrInvalidArgument = 1,
    /// Requested value is absent
    KrNotFound = 2,
    /// Generic operation failure
    KrOperationFailed = 3,
    /// Output buffer cannot hold the result and its terminator
    KrBufferTooSmall = 4,

    // === Key expressions and declarations (10-19) ===
    /// Malformed key expression
    KrInvalidKeyExpr = 10,
    /// Malformed selector
    KrInvalidSelector = 11,
    /// Declaration used outside the session that owns it, or undeclared twice
    KrDeclarationConflict = 12,

    // === Configuration and I/O (20-29) ===
    /// Invalid configuration document or value
    KrConfigError = 20,
    /// Configuration file does not exist
    KrConfigFileNotFound = 21,
    /// Underlying I/O failure
    KrIoError = 22,

    // === Session state (30-39) ===
    /// Session or declaration already closed
    KrSessionClosed = 30,
    /// Invalid state for the requested operation
    KrInvalidState = 31,

    // === Payloads (40-49) ===
    /// Typed payload could not be decoded
    KrSerializationError = 40,
}

impl From<&Error> for KrError {
    fn from(err: &Error) -> Self {
        match err {
            Error::InvalidKeyExpr(_) => KrError::KrInvalidKeyExpr,
            Error::InvalidSelector(_) => KrError::KrInvalidSelector,
            Error::SessionClosed => KrError::KrSessionClosed,
            Error::DeclarationConflict(_) => KrError::KrDeclarationConflict,
            Error::InvalidState(_) => KrError::KrInvalidState,
            Error::Serialization(_) => KrError::KrSerializationError,
            Error::Config(_) => KrError::KrConfigError,
            Error::ConfigFileNotFound(_) => KrError::KrConfigFileNotFound,
            Error::IoError(_) => KrError::KrIoError,
        }
    }
}

/// Log at debug level and convert, for the `Err` arm of FFI entry points.
pub(crate) fn report(context: &str, err: &Error) -> KrError {
    log::debug!("[keyroute-c] {}: {}", context, err);
    KrError::from(err)
}

// =============================================================================
// Opaque handles
// =============================================================================

/// Opaque handle to a configuration document.
#[repr(C)]
pub struct KrConfig {
    _private: [u8; 0],
}

/// Opaque handle to an open session.
#[repr(C)]
pub struct KrSession {
    _private: [u8; 0],
}

pub(crate) unsafe fn session_ref<'a>(session: *const KrSession) -> Option<&'a Session> {
    if session.is_null() {
        None
    } else {
        Some(&*session.cast::<Session>())
    }
}

unsafe fn config_ref<'a>(config: *const KrConfig) -> Option<&'a Config> {
    if config.is_null() {
        None
    } else {
        Some(&*config.cast::<Config>())
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// User context pointer carried into callbacks.
#[derive(Clone, Copy)]
pub(crate) struct UserData(*mut c_void);

// SAFETY: keyroute invokes callbacks from publishing, replying and timer
// threads. The C caller guarantees the context is usable from any thread
// (documented on every function taking `user_data`).
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    pub(crate) fn new(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    pub(crate) fn get(self) -> *mut c_void {
        self.0
    }
}

/// Borrow a NUL-terminated UTF-8 string, `None` for NULL or invalid UTF-8.
pub(crate) unsafe fn cstr<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Borrow `len` bytes; NULL is accepted only when `len` is 0.
pub(crate) unsafe fn bytes<'a>(ptr: *const u8, len: usize) -> Option<&'a [u8]> {
    if len == 0 {
        Some(&[])
    } else if ptr.is_null() {
        None
    } else {
        Some(std::slice::from_raw_parts(ptr, len))
    }
}

/// Owned C copy of `s`; interior NULs truncate the string.
pub(crate) fn to_cstring(s: &str) -> CString {
    let end = s.find('\0').unwrap_or(s.len());
    CString::new(&s[..end]).unwrap_or_default()
}

/// Copy `s` plus a terminating NUL into `buf`.
pub(crate) unsafe fn write_cstr(s: &str, buf: *mut c_char, buf_len: usize) -> KrError {
    if buf.is_null() {
        return KrError::KrInvalidArgument;
    }
    if s.len() >= buf_len {
        return KrError::KrBufferTooSmall;
    }
    ptr::copy_nonoverlapping(s.as_ptr(), buf.cast::<u8>(), s.len());
    *buf.add(s.len()) = 0;
    KrError::KrOk
}

/// Copy `s` into a `malloc()` buffer the C side may `free()`.
pub(crate) unsafe fn malloc_cstr(s: &str) -> *mut c_char {
    let s = to_cstring(s);
    let bytes = s.as_bytes_with_nul();
    let buf = libc::malloc(bytes.len()).cast::<u8>();
    if buf.is_null() {
        log::error!("[keyroute-c] malloc of {} bytes failed", bytes.len());
        return ptr::null_mut();
    }
    ptr::copy_nonoverlapping(bytes.as_ptr(), buf, bytes.len());
    buf.cast::<c_char>()
}

// =============================================================================
// Configuration
// =============================================================================

/// Create a configuration holding the defaults.
///
/// # Safety
/// The returned handle must be released with `kr_config_free`.
#[no_mangle]
pub unsafe extern "C" fn kr_config_default() -> *mut KrConfig {
    Box::into_raw(Box::new(Config::default())).cast::<KrConfig>()
}

/// Parse a JSON configuration document.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - `out` must be a valid pointer; on success it receives a handle to free
///   with `kr_config_free`.
#[no_mangle]
pub unsafe extern "C" fn kr_config_from_json(
    json: *const c_char,
    out: *mut *mut KrConfig,
) -> KrError {
    if out.is_null() {
        return KrError::KrInvalidArgument;
    }
    let Some(json) = cstr(json) else {
        return KrError::KrInvalidArgument;
    };
    match Config::from_json(json) {
        Ok(config) => {
            *out = Box::into_raw(Box::new(config)).cast::<KrConfig>();
            KrError::KrOk
        }
        Err(e) => report("kr_config_from_json", &e),
    }
}

/// Load a configuration file; the format follows the extension
/// (`.json`, `.yaml`, `.yml`).
///
/// # Safety
/// - `path` must be a valid null-terminated C string.
/// - `out` must be a valid pointer.
///
/// # Returns
/// `KR_CONFIG_FILE_NOT_FOUND` when the file is missing.
#[no_mangle]
pub unsafe extern "C" fn kr_config_from_file(
    path: *const c_char,
    out: *mut *mut KrConfig,
) -> KrError {
    if out.is_null() {
        return KrError::KrInvalidArgument;
    }
    let Some(path) = cstr(path) else {
        return KrError::KrInvalidArgument;
    };
    match Config::from_file(path) {
        Ok(config) => {
            *out = Box::into_raw(Box::new(config)).cast::<KrConfig>();
            KrError::KrOk
        }
        Err(e) => report("kr_config_from_file", &e),
    }
}

/// Replace the value at `path` (slash separated) with the JSON text `value`.
///
/// The configuration is left untouched when the result does not validate.
///
/// # Safety
/// - `config` must be a valid handle.
/// - `path` and `value` must be valid null-terminated C strings.
///
/// # Example (C)
/// ```c
/// kr_config_insert_json(cfg, "timestamping/enabled", "true");
/// ```
#[no_mangle]
pub unsafe extern "C" fn kr_config_insert_json(
    config: *mut KrConfig,
    path: *const c_char,
    value: *const c_char,
) -> KrError {
    if config.is_null() {
        return KrError::KrInvalidArgument;
    }
    let (Some(path), Some(value)) = (cstr(path), cstr(value)) else {
        return KrError::KrInvalidArgument;
    };
    let config = &mut *config.cast::<Config>();
    match config.insert_json(path, value) {
        Ok(()) => KrError::KrOk,
        Err(e) => report("kr_config_insert_json", &e),
    }
}

/// Copy the JSON text of the value at `path` into `buf`.
///
/// # Safety
/// - `config` must be a valid handle.
/// - `path` must be a valid null-terminated C string.
/// - `buf` must point to at least `buf_len` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn kr_config_get_json(
    config: *const KrConfig,
    path: *const c_char,
    buf: *mut c_char,
    buf_len: usize,
) -> KrError {
    let (Some(config), Some(path)) = (config_ref(config), cstr(path)) else {
        return KrError::KrInvalidArgument;
    };
    match config.get_json(path) {
        Ok(json) => write_cstr(&json, buf, buf_len),
        Err(e) => report("kr_config_get_json", &e),
    }
}

/// Render the whole configuration as pretty-printed JSON.
///
/// # Safety
/// `config` must be a valid handle.
///
/// # Returns
/// A `malloc()`-allocated string to release with `kr_string_free` (or
/// `free()`), or NULL on failure.
#[no_mangle]
pub unsafe extern "C" fn kr_config_to_string(config: *const KrConfig) -> *mut c_char {
    match config_ref(config) {
        Some(config) => malloc_cstr(&config.to_string()),
        None => ptr::null_mut(),
    }
}

/// Release a string returned by a `kr_*` function.
///
/// # Safety
/// `s` must come from keyroute (or be NULL) and be released only once.
#[no_mangle]
pub unsafe extern "C" fn kr_string_free(s: *mut c_char) {
    if !s.is_null() {
        libc::free(s.cast::<c_void>());
    }
}

/// Release a configuration.
///
/// # Safety
/// - `config` must come from a `kr_config_*` constructor, or be NULL (no-op).
/// - Must not be called more than once with the same pointer.
#[no_mangle]
pub unsafe extern "C" fn kr_config_free(config: *mut KrConfig) {
    if !config.is_null() {
        let _ = Box::from_raw(config.cast::<Config>());
    }
}

// =============================================================================
// Session lifecycle
// =============================================================================

/// Open a session.
///
/// # Safety
/// - `config` must be a valid handle or NULL (defaults). It is copied, so the
///   caller still owns it.
/// - `out` must be a valid pointer; on success it receives a handle to
///   release with `kr_session_free`.
#[no_mangle]
pub unsafe extern "C" fn kr_session_open(
    config: *const KrConfig,
    out: *mut *mut KrSession,
) -> KrError {
    if out.is_null() {
        return KrError::KrInvalidArgument;
    }
    let config = config_ref(config).cloned().unwrap_or_default();
    match Session::open(config) {
        Ok(session) => {
            log::debug!("[keyroute-c] opened session {}", session.zid());
            *out = Box::into_raw(Box::new(session)).cast::<KrSession>();
            KrError::KrOk
        }
        Err(e) => report("kr_session_open", &e),
    }
}

/// Close a session: every declaration is torn down and pending queries end.
///
/// Closing twice is a no-op. The handle stays valid until `kr_session_free`.
///
/// # Safety
/// `session` must be a valid handle.
#[no_mangle]
pub unsafe extern "C" fn kr_session_close(session: *mut KrSession) -> KrError {
    let Some(session) = session_ref(session) else {
        return KrError::KrInvalidArgument;
    };
    match session.close() {
        Ok(()) => KrError::KrOk,
        Err(e) => report("kr_session_close", &e),
    }
}

/// Release a session handle, closing the session if still open.
///
/// # Safety
/// - `session` must come from `kr_session_open`, or be NULL (no-op).
/// - Must not be called more than once with the same pointer.
#[no_mangle]
pub unsafe extern "C" fn kr_session_free(session: *mut KrSession) {
    if !session.is_null() {
        let session = Box::from_raw(session.cast::<Session>());
        let _ = session.close();
    }
}

/// Whether the session has been closed.
///
/// # Safety
/// `session` must be a valid handle or NULL (reported as closed).
#[no_mangle]
pub unsafe extern "C" fn kr_session_is_closed(session: *const KrSession) -> bool {
    session_ref(session).map_or(true, Session::is_closed)
}

/// Copy the session id as 32 lowercase hex characters plus NUL.
///
/// # Safety
/// - `session` must be a valid handle.
/// - `buf` must point to at least `buf_len` writable bytes (33 suffice).
#[no_mangle]
pub unsafe extern "C" fn kr_session_zid(
    session: *const KrSession,
    buf: *mut c_char,
    buf_len: usize,
) -> KrError {
    let Some(session) = session_ref(session) else {
        return KrError::KrInvalidArgument;
    };
    write_cstr(&session.zid().to_string(), buf, buf_len)
}

/// Number of other sessions on this session's fabric.
///
/// # Safety
/// `session` must be a valid handle or NULL (returns 0).
#[no_mangle]
pub unsafe extern "C" fn kr_session_peer_count(session: *const KrSession) -> usize {
    session_ref(session).map_or(0, |s| s.info().peers().len())
}

// =============================================================================
// Put / delete
// =============================================================================

/// Publish `payload` on `key_expr`.
///
/// # Safety
/// - `session` must be a valid handle.
/// - `key_expr` must be a valid null-terminated C string.
/// - `payload` must point to `payload_len` bytes (or be NULL when 0).
/// - `encoding` must be a valid null-terminated C string or NULL (default).
///
/// # Example (C)
/// ```c
/// kr_put(session, "sensor/temp", (const uint8_t*)"21.5", 4, "text/plain");
/// ```
#[no_mangle]
pub unsafe extern "C" fn kr_put(
    session: *const KrSession,
    key_expr: *const c_char,
    payload: *const u8,
    payload_len: usize,
    encoding: *const c_char,
) -> KrError {
    let (Some(session), Some(key), Some(payload)) = (
        session_ref(session),
        cstr(key_expr),
        bytes(payload, payload_len),
    ) else {
        return KrError::KrInvalidArgument;
    };
    let mut options = PutOptions::default();
    if !encoding.is_null() {
        let Some(encoding) = cstr(encoding) else {
            return KrError::KrInvalidArgument;
        };
        options = options.encoding(Encoding::from(encoding));
    }
    match session.put_with(key, payload, options) {
        Ok(()) => KrError::KrOk,
        Err(e) => report("kr_put", &e),
    }
}

/// Publish a deletion on `key_expr`.
///
/// # Safety
/// - `session` must be a valid handle.
/// - `key_expr` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn kr_delete(session: *const KrSession, key_expr: *const c_char) -> KrError {
    let (Some(session), Some(key)) = (session_ref(session), cstr(key_expr)) else {
        return KrError::KrInvalidArgument;
    };
    match session.delete(key) {
        Ok(()) => KrError::KrOk,
        Err(e) => report("kr_delete", &e),
    }
}
