// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Query/reply C FFI bindings.
//!
//! # Usage from C
//!
//! ```c
//! // --- Queryable side ---
//! void on_query(const KrQuery* q, void* ctx) {
//!     kr_query_reply(q, "demo/q", (const uint8_t*)"pong", 4, NULL);
//! }
//! KrQueryable* qbl = NULL;
//! kr_declare_queryable(session, "demo/q", false, on_query, NULL, NULL, &qbl);
//!
//! // --- Querying side ---
//! void on_reply(const KrReply* r, void* ctx) {
//!     if (r->ok) { printf("%.*s\n", (int)r->sample.payload_len, r->sample.payload); }
//! }
//! void on_done(void* ctx) { puts("done"); }
//! kr_get(session, "demo/q", 1000, KR_QUERY_TARGET_BEST_MATCHING,
//!        KR_CONSOLIDATION_AUTO, NULL, 0, on_reply, on_done, NULL);
//! ```
//!
//! `on_done` runs exactly once, after the last reply, when every replier has
//! finished or the timeout expired.

use std::os::raw::{c_char, c_void};
use std::ptr;
use std::time::Duration;

use keyroute::{
    CallbackDrop, ConsolidationMode, Encoding, GetOptions, Query, QueryTarget, Queryable,
    QueryableOptions, Reply, ReplyOptions,
};

use crate::pubsub::{KrDropCallback, KrSample, KrSampleKind, SampleStrings};
use crate::{
    bytes, cstr, report, session_ref, to_cstring, write_cstr, KrError, KrSession, UserData,
};

// =============================================================================
// Opaque handles
// =============================================================================

/// Opaque handle to a received query.
///
/// The pointer passed to a queryable callback is borrowed for the call;
/// `kr_query_clone` yields an owned handle for replying later.
#[repr(C)]
pub struct KrQuery {
    _private: [u8; 0],
}

/// Opaque handle to a queryable.
#[repr(C)]
pub struct KrQueryable {
    _private: [u8; 0],
}

unsafe fn query_ref<'a>(query: *const KrQuery) -> Option<&'a Query> {
    if query.is_null() {
        None
    } else {
        Some(&*query.cast::<Query>())
    }
}

// =============================================================================
// Enums and views
// =============================================================================

/// Which queryables a query is routed to.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KrQueryTarget {
    KrQueryTargetBestMatching = 0,
    KrQueryTargetAll = 1,
    KrQueryTargetAllComplete = 2,
}

impl From<KrQueryTarget> for QueryTarget {
    fn from(target: KrQueryTarget) -> Self {
        match target {
            KrQueryTarget::KrQueryTargetBestMatching => QueryTarget::BestMatching,
            KrQueryTarget::KrQueryTargetAll => QueryTarget::All,
            KrQueryTarget::KrQueryTargetAllComplete => QueryTarget::AllComplete,
        }
    }
}

/// How replies for the same key expression are merged.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KrConsolidationMode {
    KrConsolidationAuto = 0,
    KrConsolidationNone = 1,
    KrConsolidationMonotonic = 2,
    KrConsolidationLatest = 3,
}

impl From<KrConsolidationMode> for ConsolidationMode {
    fn from(mode: KrConsolidationMode) -> Self {
        match mode {
            KrConsolidationMode::KrConsolidationAuto => ConsolidationMode::Auto,
            KrConsolidationMode::KrConsolidationNone => ConsolidationMode::None,
            KrConsolidationMode::KrConsolidationMonotonic => ConsolidationMode::Monotonic,
            KrConsolidationMode::KrConsolidationLatest => ConsolidationMode::Latest,
        }
    }
}

/// Borrowed view of a reply, valid only for the duration of the callback.
#[repr(C)]
pub struct KrReply {
    /// `true`: `sample` is set. `false`: the `error_*` fields are set.
    pub ok: bool,
    pub sample: KrSample,
    pub error_payload: *const u8,
    pub error_payload_len: usize,
    pub error_encoding: *const c_char,
    /// Hex id of the replying session (NUL-terminated).
    pub replier_id: *const c_char,
}

/// Reply callback. The view and its pointers are only valid during the call.
pub type KrReplyCallback =
    Option<unsafe extern "C" fn(reply: *const KrReply, user_data: *mut c_void)>;

/// Queryable callback. `query` is borrowed for the call.
pub type KrQueryCallback =
    Option<unsafe extern "C" fn(query: *const KrQuery, user_data: *mut c_void)>;

fn empty_sample() -> KrSample {
    KrSample {
        key_expr: ptr::null(),
        payload: ptr::null(),
        payload_len: 0,
        encoding: ptr::null(),
        kind: KrSampleKind::KrSamplePut,
        has_timestamp: false,
        timestamp: 0,
        attachment: ptr::null(),
        attachment_len: 0,
    }
}

fn deliver_reply(
    reply: &Reply,
    callback: unsafe extern "C" fn(*const KrReply, *mut c_void),
    user: UserData,
) {
    let replier_id = to_cstring(&reply.replier_id().to_string());
    match reply.result() {
        Ok(sample) => {
            let strings = SampleStrings::new(sample);
            let view = KrReply {
                ok: true,
                sample: strings.view(sample),
                error_payload: ptr::null(),
                error_payload_len: 0,
                error_encoding: ptr::null(),
                replier_id: replier_id.as_ptr(),
            };
            unsafe { callback(&view, user.get()) };
        }
        Err(err) => {
            let encoding = to_cstring(&err.encoding().to_string());
            let view = KrReply {
                ok: false,
                sample: empty_sample(),
                error_payload: err.payload().as_slice().as_ptr(),
                error_payload_len: err.payload().len(),
                error_encoding: encoding.as_ptr(),
                replier_id: replier_id.as_ptr(),
            };
            unsafe { callback(&view, user.get()) };
        }
    }
}

// =============================================================================
// Querying side
// =============================================================================

/// Issue a query. Returns as soon as the query is routed; replies and the
/// final `on_done` arrive through the callbacks.
///
/// # Arguments
/// - `selector`: key expression with optional `?parameters`.
/// - `timeout_ms`: 0 uses the session's `queries_default_timeout`.
/// - `payload`: optional query payload (NULL when `payload_len` is 0).
///
/// # Safety
/// - `session` must be a valid handle.
/// - `selector` must be a valid null-terminated C string.
/// - `on_reply` and `on_done` may run on any thread, including the caller's
///   before this returns; `user_data` must be usable from any thread until
///   `on_done` has run.
///
/// # Returns
/// When the arguments or the selector are rejected, no callback runs
/// (`on_done` included).
#[no_mangle]
pub unsafe extern "C" fn kr_get(
    session: *const KrSession,
    selector: *const c_char,
    timeout_ms: u64,
    target: KrQueryTarget,
    consolidation: KrConsolidationMode,
    payload: *const u8,
    payload_len: usize,
    on_reply: KrReplyCallback,
    on_done: KrDropCallback,
    user_data: *mut c_void,
) -> KrError {
    let (Some(session), Some(selector), Some(on_reply), Some(payload)) = (
        session_ref(session),
        cstr(selector),
        on_reply,
        bytes(payload, payload_len),
    ) else {
        return KrError::KrInvalidArgument;
    };

    let mut options = GetOptions::default()
        .target(target.into())
        .consolidation(consolidation.into());
    if timeout_ms > 0 {
        options = options.timeout(Duration::from_millis(timeout_ms));
    }
    if !payload.is_empty() {
        options = options.payload(payload);
    }

    let user = UserData::new(user_data);
    let handler = CallbackDrop {
        callback: move |reply: Reply| deliver_reply(&reply, on_reply, user),
        drop: move || {
            if let Some(on_done) = on_done {
                unsafe { on_done(user.get()) };
            }
        },
    };
    match session.get_with(selector, handler, options) {
        Ok(()) => KrError::KrOk,
        Err(e) => report("kr_get", &e),
    }
}

// =============================================================================
// Queryable side
// =============================================================================

/// Declare a queryable answering queries that intersect `key_expr`.
///
/// # Safety
/// - `session` must be a valid handle.
/// - `key_expr` must be a valid null-terminated C string.
/// - `callback` and `on_drop` may run on any thread; `user_data` must be
///   usable from any thread until `on_drop` has run.
/// - `out` must be a valid pointer; release with `kr_undeclare_queryable`.
#[no_mangle]
pub unsafe extern "C" fn kr_declare_queryable(
    session: *const KrSession,
    key_expr: *const c_char,
    complete: bool,
    callback: KrQueryCallback,
    on_drop: KrDropCallback,
    user_data: *mut c_void,
    out: *mut *mut KrQueryable,
) -> KrError {
    let (Some(session), Some(key), Some(callback)) =
        (session_ref(session), cstr(key_expr), callback)
    else {
        return KrError::KrInvalidArgument;
    };
    if out.is_null() {
        return KrError::KrInvalidArgument;
    }

    let user = UserData::new(user_data);
    let handler = CallbackDrop {
        callback: move |query: Query| {
            let borrowed = ptr::addr_of!(query).cast::<KrQuery>();
            unsafe { callback(borrowed, user.get()) };
        },
        drop: move || {
            if let Some(on_drop) = on_drop {
                unsafe { on_drop(user.get()) };
            }
        },
    };
    let options = QueryableOptions::default().complete(complete);
    match session.declare_queryable_with(key, handler, options) {
        Ok(queryable) => {
            *out = Box::into_raw(Box::new(queryable)).cast::<KrQueryable>();
            KrError::KrOk
        }
        Err(e) => report("kr_declare_queryable", &e),
    }
}

/// Undeclare a queryable and release its handle.
///
/// # Safety
/// - `queryable` must come from `kr_declare_queryable`, or be NULL.
/// - Must not be called more than once with the same pointer.
#[no_mangle]
pub unsafe extern "C" fn kr_undeclare_queryable(queryable: *mut KrQueryable) -> KrError {
    if queryable.is_null() {
        return KrError::KrInvalidArgument;
    }
    let queryable = Box::from_raw(queryable.cast::<Queryable<()>>());
    match queryable.undeclare() {
        Ok(()) => KrError::KrOk,
        Err(e) => report("kr_undeclare_queryable", &e),
    }
}

/// Take an owned handle on a query, to reply after the callback returns.
///
/// The querier keeps waiting for this replier until the handle is freed.
///
/// # Safety
/// `query` must be a valid (borrowed or owned) query handle.
#[no_mangle]
pub unsafe extern "C" fn kr_query_clone(query: *const KrQuery) -> *mut KrQuery {
    match query_ref(query) {
        Some(query) => Box::into_raw(Box::new(query.clone())).cast::<KrQuery>(),
        None => ptr::null_mut(),
    }
}

/// Release an owned query handle.
///
/// # Safety
/// - `query` must come from `kr_query_clone`, or be NULL (no-op). Never
///   pass the borrowed pointer given to a queryable callback.
/// - Must not be called more than once with the same pointer.
#[no_mangle]
pub unsafe extern "C" fn kr_query_free(query: *mut KrQuery) {
    if !query.is_null() {
        let _ = Box::from_raw(query.cast::<Query>());
    }
}

/// Copy the query's key expression into `buf`.
///
/// # Safety
/// - `query` must be a valid query handle.
/// - `buf` must point to at least `buf_len` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn kr_query_key_expr(
    query: *const KrQuery,
    buf: *mut c_char,
    buf_len: usize,
) -> KrError {
    let Some(query) = query_ref(query) else {
        return KrError::KrInvalidArgument;
    };
    write_cstr(query.key_expr().as_str(), buf, buf_len)
}

/// Copy the query's parameters (`k=v&k2=v2`, empty when none) into `buf`.
///
/// # Safety
/// Same as `kr_query_key_expr`.
#[no_mangle]
pub unsafe extern "C" fn kr_query_parameters(
    query: *const KrQuery,
    buf: *mut c_char,
    buf_len: usize,
) -> KrError {
    let Some(query) = query_ref(query) else {
        return KrError::KrInvalidArgument;
    };
    let params = query.parameters().map(ToString::to_string).unwrap_or_default();
    write_cstr(&params, buf, buf_len)
}

/// Borrow the query payload.
///
/// # Safety
/// - `query` must be a valid query handle.
/// - `out_payload` and `out_len` must be valid pointers. The payload lives
///   as long as the query handle.
///
/// # Returns
/// `KR_NOT_FOUND` when the query carries no payload.
#[no_mangle]
pub unsafe extern "C" fn kr_query_payload(
    query: *const KrQuery,
    out_payload: *mut *const u8,
    out_len: *mut usize,
) -> KrError {
    let Some(query) = query_ref(query) else {
        return KrError::KrInvalidArgument;
    };
    if out_payload.is_null() || out_len.is_null() {
        return KrError::KrInvalidArgument;
    }
    match query.payload() {
        Some(payload) => {
            *out_payload = payload.as_slice().as_ptr();
            *out_len = payload.len();
            KrError::KrOk
        }
        None => KrError::KrNotFound,
    }
}

/// Send a success reply.
///
/// # Safety
/// - `query` must be a valid query handle.
/// - `key_expr` must be a valid null-terminated C string.
/// - `payload` must point to `payload_len` bytes (or be NULL when 0).
/// - `encoding` must be a valid null-terminated C string or NULL.
#[no_mangle]
pub unsafe extern "C" fn kr_query_reply(
    query: *const KrQuery,
    key_expr: *const c_char,
    payload: *const u8,
    payload_len: usize,
    encoding: *const c_char,
) -> KrError {
    let (Some(query), Some(key), Some(payload)) =
        (query_ref(query), cstr(key_expr), bytes(payload, payload_len))
    else {
        return KrError::KrInvalidArgument;
    };
    let mut options = ReplyOptions::default();
    if !encoding.is_null() {
        let Some(encoding) = cstr(encoding) else {
            return KrError::KrInvalidArgument;
        };
        options = options.encoding(Encoding::from(encoding));
    }
    match query.reply_with(key, payload, options) {
        Ok(()) => KrError::KrOk,
        Err(e) => report("kr_query_reply", &e),
    }
}

/// Send an error reply.
///
/// # Safety
/// - `query` must be a valid query handle.
/// - `payload` must point to `payload_len` bytes (or be NULL when 0).
#[no_mangle]
pub unsafe extern "C" fn kr_query_reply_err(
    query: *const KrQuery,
    payload: *const u8,
    payload_len: usize,
) -> KrError {
    let (Some(query), Some(payload)) = (query_ref(query), bytes(payload, payload_len)) else {
        return KrError::KrInvalidArgument;
    };
    match query.reply_err(payload) {
        Ok(()) => KrError::KrOk,
        Err(e) => report("kr_query_reply_err", &e),
    }
}

/// Send a deletion reply for `key_expr`.
///
/// # Safety
/// - `query` must be a valid query handle.
/// - `key_expr` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn kr_query_reply_del(
    query: *const KrQuery,
    key_expr: *const c_char,
) -> KrError {
    let (Some(query), Some(key)) = (query_ref(query), cstr(key_expr)) else {
        return KrError::KrInvalidArgument;
    };
    match query.reply_del(key) {
        Ok(()) => KrError::KrOk,
        Err(e) => report("kr_query_reply_del", &e),
    }
}
