// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscriber and liveliness token bindings.
//!
//! # Usage from C
//!
//! ```c
//! void on_sample(const KrSample* s, void* ctx) {
//!     printf("%s: %.*s\n", s->key_expr, (int)s->payload_len, s->payload);
//! }
//!
//! KrSubscriber* sub = NULL;
//! kr_declare_subscriber(session, "demo/**", on_sample, NULL, NULL, &sub);
//! // ...
//! kr_undeclare_subscriber(sub);
//! ```

use std::ffi::CString;
use std::os::raw::{c_char, c_void};
use std::ptr;

use keyroute::{
    CallbackDrop, LivelinessSubscriberOptions, LivelinessToken, Sample, SampleKind, Subscriber,
};

use crate::{cstr, report, session_ref, to_cstring, KrError, KrSession, UserData};

// =============================================================================
// Opaque handles
// =============================================================================

/// Opaque handle to a subscriber.
#[repr(C)]
pub struct KrSubscriber {
    _private: [u8; 0],
}

/// Opaque handle to a liveliness token.
#[repr(C)]
pub struct KrLivelinessToken {
    _private: [u8; 0],
}

// =============================================================================
// Sample view
// =============================================================================

/// Kind of a sample.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KrSampleKind {
    KrSamplePut = 0,
    KrSampleDelete = 1,
}

/// Borrowed view of a sample, valid only for the duration of the callback.
#[repr(C)]
pub struct KrSample {
    /// Canonical key expression (NUL-terminated).
    pub key_expr: *const c_char,
    pub payload: *const u8,
    pub payload_len: usize,
    /// Encoding in its textual form (NUL-terminated).
    pub encoding: *const c_char,
    pub kind: KrSampleKind,
    /// Whether `timestamp` holds a value.
    pub has_timestamp: bool,
    /// Nanoseconds since the UNIX epoch of the sample's timestamp.
    pub timestamp: u64,
    /// Attachment bytes, NULL when absent.
    pub attachment: *const u8,
    pub attachment_len: usize,
}

/// Sample callback. The view and its pointers are only valid during the call.
pub type KrSampleCallback =
    Option<unsafe extern "C" fn(sample: *const KrSample, user_data: *mut c_void)>;

/// Called once when a stream ends (undeclare, session close, query end).
pub type KrDropCallback = Option<unsafe extern "C" fn(user_data: *mut c_void)>;

/// Owns the C strings a `KrSample` points into.
pub(crate) struct SampleStrings {
    key_expr: CString,
    encoding: CString,
}

impl SampleStrings {
    pub(crate) fn new(sample: &Sample) -> Self {
        Self {
            key_expr: to_cstring(sample.key_expr().as_str()),
            encoding: to_cstring(&sample.encoding().to_string()),
        }
    }

    pub(crate) fn view(&self, sample: &Sample) -> KrSample {
        let (attachment, attachment_len) = sample
            .attachment()
            .map_or((ptr::null(), 0), |a| (a.as_slice().as_ptr(), a.len()));
        KrSample {
            key_expr: self.key_expr.as_ptr(),
            payload: sample.payload().as_slice().as_ptr(),
            payload_len: sample.payload().len(),
            encoding: self.encoding.as_ptr(),
            kind: match sample.kind() {
                SampleKind::Put => KrSampleKind::KrSamplePut,
                SampleKind::Delete => KrSampleKind::KrSampleDelete,
            },
            has_timestamp: sample.timestamp().is_some(),
            timestamp: sample.timestamp().map_or(0, |ts| ts.time()),
            attachment,
            attachment_len,
        }
    }
}

/// Pair a C callback and its end-of-stream hook into a keyroute handler.
pub(crate) fn sample_handler(
    callback: unsafe extern "C" fn(*const KrSample, *mut c_void),
    on_drop: KrDropCallback,
    user: UserData,
) -> CallbackDrop<impl Fn(Sample) + Send + Sync + 'static, impl FnOnce() + Send + 'static> {
    CallbackDrop {
        callback: move |sample: Sample| {
            let strings = SampleStrings::new(&sample);
            let view = strings.view(&sample);
            unsafe { callback(&view, user.get()) };
        },
        drop: move || {
            if let Some(on_drop) = on_drop {
                unsafe { on_drop(user.get()) };
            }
        },
    }
}

// =============================================================================
// Subscribers
// =============================================================================

/// Declare a subscriber delivering matching samples to `callback`.
///
/// # Safety
/// - `session` must be a valid handle.
/// - `key_expr` must be a valid null-terminated C string.
/// - `callback` and `on_drop` may run on any thread; `user_data` must be
///   usable from any thread until `on_drop` has run.
/// - `out` must be a valid pointer; on success it receives a handle to
///   release with `kr_undeclare_subscriber`.
#[no_mangle]
pub unsafe extern "C" fn kr_declare_subscriber(
    session: *const KrSession,
    key_expr: *const c_char,
    callback: KrSampleCallback,
    on_drop: KrDropCallback,
    user_data: *mut c_void,
    out: *mut *mut KrSubscriber,
) -> KrError {
    let (Some(session), Some(key), Some(callback)) =
        (session_ref(session), cstr(key_expr), callback)
    else {
        return KrError::KrInvalidArgument;
    };
    if out.is_null() {
        return KrError::KrInvalidArgument;
    }
    let handler = sample_handler(callback, on_drop, UserData::new(user_data));
    match session.declare_subscriber(key, handler) {
        Ok(subscriber) => {
            *out = Box::into_raw(Box::new(subscriber)).cast::<KrSubscriber>();
            KrError::KrOk
        }
        Err(e) => report("kr_declare_subscriber", &e),
    }
}

/// Undeclare a subscriber and release its handle.
///
/// `on_drop` has run when this returns; no callback runs afterwards.
///
/// # Safety
/// - `subscriber` must come from `kr_declare_subscriber`, or be NULL.
/// - Must not be called more than once with the same pointer.
///
/// # Returns
/// `KR_SESSION_CLOSED` if the owning session was already closed (the handle
/// is released either way).
#[no_mangle]
pub unsafe extern "C" fn kr_undeclare_subscriber(subscriber: *mut KrSubscriber) -> KrError {
    if subscriber.is_null() {
        return KrError::KrInvalidArgument;
    }
    let subscriber = Box::from_raw(subscriber.cast::<Subscriber<()>>());
    match subscriber.undeclare() {
        Ok(()) => KrError::KrOk,
        Err(e) => report("kr_undeclare_subscriber", &e),
    }
}

// =============================================================================
// Liveliness
// =============================================================================

/// Announce a liveliness token on `key_expr`.
///
/// # Safety
/// - `session` must be a valid handle.
/// - `key_expr` must be a valid null-terminated C string.
/// - `out` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn kr_liveliness_declare_token(
    session: *const KrSession,
    key_expr: *const c_char,
    out: *mut *mut KrLivelinessToken,
) -> KrError {
    let (Some(session), Some(key)) = (session_ref(session), cstr(key_expr)) else {
        return KrError::KrInvalidArgument;
    };
    if out.is_null() {
        return KrError::KrInvalidArgument;
    }
    match session.liveliness().declare_token(key) {
        Ok(token) => {
            *out = Box::into_raw(Box::new(token)).cast::<KrLivelinessToken>();
            KrError::KrOk
        }
        Err(e) => report("kr_liveliness_declare_token", &e),
    }
}

/// Withdraw a liveliness token and release its handle.
///
/// # Safety
/// - `token` must come from `kr_liveliness_declare_token`, or be NULL.
/// - Must not be called more than once with the same pointer.
#[no_mangle]
pub unsafe extern "C" fn kr_liveliness_undeclare_token(token: *mut KrLivelinessToken) -> KrError {
    if token.is_null() {
        return KrError::KrInvalidArgument;
    }
    let token = Box::from_raw(token.cast::<LivelinessToken>());
    match token.undeclare() {
        Ok(()) => KrError::KrOk,
        Err(e) => report("kr_liveliness_undeclare_token", &e),
    }
}

/// Subscribe to liveliness changes: `KR_SAMPLE_PUT` when a token appears,
/// `KR_SAMPLE_DELETE` when it goes away.
///
/// # Safety
/// Same as `kr_declare_subscriber`. Release with `kr_undeclare_subscriber`.
#[no_mangle]
pub unsafe extern "C" fn kr_liveliness_declare_subscriber(
    session: *const KrSession,
    key_expr: *const c_char,
    history: bool,
    callback: KrSampleCallback,
    on_drop: KrDropCallback,
    user_data: *mut c_void,
    out: *mut *mut KrSubscriber,
) -> KrError {
    let (Some(session), Some(key), Some(callback)) =
        (session_ref(session), cstr(key_expr), callback)
    else {
        return KrError::KrInvalidArgument;
    };
    if out.is_null() {
        return KrError::KrInvalidArgument;
    }
    let handler = sample_handler(callback, on_drop, UserData::new(user_data));
    let options = LivelinessSubscriberOptions { history };
    match session
        .liveliness()
        .declare_subscriber_with(key, handler, options)
    {
        Ok(subscriber) => {
            *out = Box::into_raw(Box::new(subscriber)).cast::<KrSubscriber>();
            KrError::KrOk
        }
        Err(e) => report("kr_liveliness_declare_subscriber", &e),
    }
}
