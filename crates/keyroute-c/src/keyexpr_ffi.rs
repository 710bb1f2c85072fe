// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Key expression helpers.
//!
//! Pure functions over NUL-terminated strings; no session required.
//!
//! ```c
//! char canon[128];
//! kr_keyexpr_canonize("a/**/**/b", canon, sizeof canon);   // "a/**/b"
//!
//! bool hit = false;
//! kr_keyexpr_intersects("demo/**", "demo/a/b", &hit);      // true
//! ```

use std::os::raw::c_char;

use keyroute::keyexpr::canon;
use keyroute::{KeyExpr, Relation};

use crate::{cstr, report, write_cstr, KrError};

/// Relation between two key expressions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KrRelation {
    KrRelationDisjoint = 0,
    KrRelationIntersects = 1,
    KrRelationIncludes = 2,
    KrRelationEquals = 3,
    KrRelationIsIncluded = 4,
}

impl From<Relation> for KrRelation {
    fn from(relation: Relation) -> Self {
        match relation {
            Relation::Disjoint => KrRelation::KrRelationDisjoint,
            Relation::Intersects => KrRelation::KrRelationIntersects,
            Relation::Includes => KrRelation::KrRelationIncludes,
            Relation::IsIncluded => KrRelation::KrRelationIsIncluded,
            Relation::Equals => KrRelation::KrRelationEquals,
        }
    }
}

unsafe fn parse(expr: *const c_char) -> Result<KeyExpr, KrError> {
    let Some(expr) = cstr(expr) else {
        return Err(KrError::KrInvalidArgument);
    };
    KeyExpr::try_from(expr).map_err(|e| report("keyexpr", &e))
}

unsafe fn parse_pair(a: *const c_char, b: *const c_char) -> Result<(KeyExpr, KeyExpr), KrError> {
    Ok((parse(a)?, parse(b)?))
}

/// Canonicalize `raw` into `buf`.
///
/// # Safety
/// - `raw` must be a valid null-terminated C string.
/// - `buf` must point to at least `buf_len` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn kr_keyexpr_canonize(
    raw: *const c_char,
    buf: *mut c_char,
    buf_len: usize,
) -> KrError {
    let Some(raw) = cstr(raw) else {
        return KrError::KrInvalidArgument;
    };
    match canon::canonize(raw) {
        Ok(canonical) => write_cstr(&canonical, buf, buf_len),
        Err(e) => report("kr_keyexpr_canonize", &e),
    }
}

/// Whether `expr` is a valid expression already in canonical form.
///
/// # Safety
/// `expr` must be a valid null-terminated C string or NULL (returns false).
#[no_mangle]
pub unsafe extern "C" fn kr_keyexpr_is_canonical(expr: *const c_char) -> bool {
    cstr(expr).is_some_and(canon::is_canonical)
}

/// Whether some concrete key matches both `a` and `b`.
///
/// # Safety
/// - `a` and `b` must be valid null-terminated canonical key expressions.
/// - `out` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn kr_keyexpr_intersects(
    a: *const c_char,
    b: *const c_char,
    out: *mut bool,
) -> KrError {
    if out.is_null() {
        return KrError::KrInvalidArgument;
    }
    match parse_pair(a, b) {
        Ok((a, b)) => {
            *out = a.intersects(&b);
            KrError::KrOk
        }
        Err(code) => code,
    }
}

/// Whether every concrete key matched by `b` is matched by `a`.
///
/// # Safety
/// Same as `kr_keyexpr_intersects`.
#[no_mangle]
pub unsafe extern "C" fn kr_keyexpr_includes(
    a: *const c_char,
    b: *const c_char,
    out: *mut bool,
) -> KrError {
    if out.is_null() {
        return KrError::KrInvalidArgument;
    }
    match parse_pair(a, b) {
        Ok((a, b)) => {
            *out = a.includes(&b);
            KrError::KrOk
        }
        Err(code) => code,
    }
}

/// Relation of `a` to `b`.
///
/// # Safety
/// Same as `kr_keyexpr_intersects`.
#[no_mangle]
pub unsafe extern "C" fn kr_keyexpr_relation(
    a: *const c_char,
    b: *const c_char,
    out: *mut KrRelation,
) -> KrError {
    if out.is_null() {
        return KrError::KrInvalidArgument;
    }
    match parse_pair(a, b) {
        Ok((a, b)) => {
            *out = a.relation_to(&b).into();
            KrError::KrOk
        }
        Err(code) => code,
    }
}

/// Append `suffix` as new chunks of `prefix` and canonicalize into `buf`.
///
/// # Safety
/// - `prefix` and `suffix` must be valid null-terminated C strings.
/// - `buf` must point to at least `buf_len` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn kr_keyexpr_join(
    prefix: *const c_char,
    suffix: *const c_char,
    buf: *mut c_char,
    buf_len: usize,
) -> KrError {
    let prefix = match parse(prefix) {
        Ok(k) => k,
        Err(code) => return code,
    };
    let Some(suffix) = cstr(suffix) else {
        return KrError::KrInvalidArgument;
    };
    match prefix.join(suffix) {
        Ok(joined) => write_cstr(joined.as_str(), buf, buf_len),
        Err(e) => report("kr_keyexpr_join", &e),
    }
}

/// Append `suffix` verbatim to `prefix` into `buf`.
///
/// # Safety
/// Same as `kr_keyexpr_join`.
#[no_mangle]
pub unsafe extern "C" fn kr_keyexpr_concat(
    prefix: *const c_char,
    suffix: *const c_char,
    buf: *mut c_char,
    buf_len: usize,
) -> KrError {
    let prefix = match parse(prefix) {
        Ok(k) => k,
        Err(code) => return code,
    };
    let Some(suffix) = cstr(suffix) else {
        return KrError::KrInvalidArgument;
    };
    match prefix.concat(suffix) {
        Ok(joined) => write_cstr(joined.as_str(), buf, buf_len),
        Err(e) => report("kr_keyexpr_concat", &e),
    }
}
