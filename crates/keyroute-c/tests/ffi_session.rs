// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Drive the C API the way a C program would: raw handles, extern "C"
// callbacks and a context pointer.

use keyroute_c::*;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

static FABRIC_SEQ: AtomicUsize = AtomicUsize::new(0);

#[derive(Default)]
struct Seen {
    items: Mutex<Vec<String>>,
    done: AtomicUsize,
}

impl Seen {
    fn as_ctx(&self) -> *mut c_void {
        (self as *const Seen).cast_mut().cast::<c_void>()
    }

    fn items(&self) -> Vec<String> {
        self.items.lock().expect("lock").clone()
    }
}

unsafe fn seen<'a>(ctx: *mut c_void) -> &'a Seen {
    &*ctx.cast::<Seen>()
}

unsafe fn text(ptr: *const u8, len: usize) -> String {
    String::from_utf8_lossy(std::slice::from_raw_parts(ptr, len)).into_owned()
}

unsafe extern "C" fn on_sample(sample: *const KrSample, ctx: *mut c_void) {
    let sample = &*sample;
    let key = CStr::from_ptr(sample.key_expr).to_string_lossy();
    let entry = match sample.kind {
        KrSampleKind::KrSamplePut => {
            format!("{}={}", key, text(sample.payload, sample.payload_len))
        }
        KrSampleKind::KrSampleDelete => format!("{} deleted", key),
    };
    seen(ctx).items.lock().expect("lock").push(entry);
}

unsafe extern "C" fn on_done(ctx: *mut c_void) {
    seen(ctx).done.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn answer_pong(query: *const KrQuery, _ctx: *mut c_void) {
    let mut key = [0 as c_char; 64];
    assert_eq!(kr_query_key_expr(query, key.as_mut_ptr(), key.len()), KrError::KrOk);
    let rc = kr_query_reply(query, key.as_ptr(), b"pong".as_ptr(), 4, ptr::null());
    assert_eq!(rc, KrError::KrOk);
}

unsafe extern "C" fn answer_sum(query: *const KrQuery, _ctx: *mut c_void) {
    let mut params = [0 as c_char; 64];
    assert_eq!(
        kr_query_parameters(query, params.as_mut_ptr(), params.len()),
        KrError::KrOk
    );
    let params = CStr::from_ptr(params.as_ptr()).to_string_lossy().into_owned();
    let sum: i64 = params
        .split(['&', ';'])
        .filter_map(|kv| kv.split_once('=').and_then(|(_, v)| v.parse::<i64>().ok()))
        .sum();
    let body = sum.to_string();
    let key = CString::new("calc/sum").expect("cstring");
    kr_query_reply(query, key.as_ptr(), body.as_ptr(), body.len(), ptr::null());
}

unsafe extern "C" fn answer_err(query: *const KrQuery, _ctx: *mut c_void) {
    kr_query_reply_err(query, b"nope".as_ptr(), 4);
}

unsafe extern "C" fn on_reply(reply: *const KrReply, ctx: *mut c_void) {
    let reply = &*reply;
    let entry = if reply.ok {
        text(reply.sample.payload, reply.sample.payload_len)
    } else {
        format!("ERR:{}", text(reply.error_payload, reply.error_payload_len))
    };
    seen(ctx).items.lock().expect("lock").push(entry);
}

fn open_pair() -> (*mut KrSession, *mut KrSession) {
    let fabric = format!("\"ffi-{}\"", FABRIC_SEQ.fetch_add(1, Ordering::Relaxed));
    let fabric = CString::new(fabric).expect("cstring");
    let path = CString::new("fabric").expect("cstring");
    unsafe {
        let config = kr_config_default();
        assert_eq!(
            kr_config_insert_json(config, path.as_ptr(), fabric.as_ptr()),
            KrError::KrOk
        );
        let mut a = ptr::null_mut();
        let mut b = ptr::null_mut();
        assert_eq!(kr_session_open(config, &mut a), KrError::KrOk);
        assert_eq!(kr_session_open(config, &mut b), KrError::KrOk);
        kr_config_free(config);
        (a, b)
    }
}

fn free_pair((a, b): (*mut KrSession, *mut KrSession)) {
    unsafe {
        kr_session_free(a);
        kr_session_free(b);
    }
}

#[test]
fn subscriber_receives_puts_and_deletes() {
    let (a, b) = open_pair();
    let seen = Seen::default();
    let key = CString::new("demo/**").expect("cstring");
    let put_key = CString::new("demo/a/b").expect("cstring");

    unsafe {
        assert_eq!(kr_session_peer_count(a), 1);

        let mut sub = ptr::null_mut();
        let rc = kr_declare_subscriber(
            a,
            key.as_ptr(),
            Some(on_sample),
            Some(on_done),
            seen.as_ctx(),
            &mut sub,
        );
        assert_eq!(rc, KrError::KrOk);

        assert_eq!(
            kr_put(b, put_key.as_ptr(), b"hello".as_ptr(), 5, ptr::null()),
            KrError::KrOk
        );
        assert_eq!(kr_delete(b, put_key.as_ptr()), KrError::KrOk);

        assert_eq!(kr_undeclare_subscriber(sub), KrError::KrOk);
    }

    assert_eq!(seen.items(), vec!["demo/a/b=hello", "demo/a/b deleted"]);
    assert_eq!(seen.done.load(Ordering::SeqCst), 1);
    free_pair((a, b));
}

#[test]
fn get_collects_replies_then_finishes() {
    let (a, b) = open_pair();
    let seen = Seen::default();
    let key = CString::new("demo/q").expect("cstring");

    unsafe {
        let mut queryable = ptr::null_mut();
        let rc = kr_declare_queryable(
            b,
            key.as_ptr(),
            false,
            Some(answer_pong),
            None,
            ptr::null_mut(),
            &mut queryable,
        );
        assert_eq!(rc, KrError::KrOk);

        let rc = kr_get(
            a,
            key.as_ptr(),
            1000,
            KrQueryTarget::KrQueryTargetBestMatching,
            KrConsolidationMode::KrConsolidationAuto,
            ptr::null(),
            0,
            Some(on_reply),
            Some(on_done),
            seen.as_ctx(),
        );
        assert_eq!(rc, KrError::KrOk);

        // The only replier answered synchronously, so the query is over.
        assert_eq!(seen.done.load(Ordering::SeqCst), 1);
        assert_eq!(seen.items(), vec!["pong"]);
        assert_eq!(kr_undeclare_queryable(queryable), KrError::KrOk);
    }
    free_pair((a, b));
}

#[test]
fn parameters_and_error_replies_cross_the_boundary() {
    let (a, b) = open_pair();
    let seen = Seen::default();
    let sum_key = CString::new("calc/sum").expect("cstring");
    let err_key = CString::new("calc/err").expect("cstring");
    let selector = CString::new("calc/sum?a=2;b=40").expect("cstring");

    unsafe {
        let mut sum = ptr::null_mut();
        let mut err = ptr::null_mut();
        for (key, complete, callback, out) in [
            (&sum_key, true, answer_sum as unsafe extern "C" fn(_, _), &mut sum),
            (&err_key, false, answer_err, &mut err),
        ] {
            let rc = kr_declare_queryable(
                b,
                key.as_ptr(),
                complete,
                Some(callback),
                None,
                ptr::null_mut(),
                out,
            );
            assert_eq!(rc, KrError::KrOk);
        }

        for selector in [selector.as_ptr(), err_key.as_ptr()] {
            let rc = kr_get(
                a,
                selector,
                0,
                KrQueryTarget::KrQueryTargetAll,
                KrConsolidationMode::KrConsolidationNone,
                ptr::null(),
                0,
                Some(on_reply),
                Some(on_done),
                seen.as_ctx(),
            );
            assert_eq!(rc, KrError::KrOk);
        }

        kr_undeclare_queryable(sum);
        kr_undeclare_queryable(err);
    }

    assert_eq!(seen.items(), vec!["42", "ERR:nope"]);
    assert_eq!(seen.done.load(Ordering::SeqCst), 2);
    free_pair((a, b));
}

#[test]
fn closed_session_reports_status_codes() {
    let (a, b) = open_pair();
    let key = CString::new("x/y").expect("cstring");
    let bad = CString::new("x//y").expect("cstring");

    unsafe {
        assert_eq!(
            kr_put(a, bad.as_ptr(), ptr::null(), 0, ptr::null()),
            KrError::KrInvalidKeyExpr
        );
        assert_eq!(
            kr_put(a, ptr::null(), ptr::null(), 0, ptr::null()),
            KrError::KrInvalidArgument
        );

        assert_eq!(kr_session_close(a), KrError::KrOk);
        assert_eq!(kr_session_close(a), KrError::KrOk);
        assert!(kr_session_is_closed(a));
        assert_eq!(
            kr_put(a, key.as_ptr(), ptr::null(), 0, ptr::null()),
            KrError::KrSessionClosed
        );

        let mut zid = [0 as c_char; 8];
        assert_eq!(
            kr_session_zid(b, zid.as_mut_ptr(), zid.len()),
            KrError::KrBufferTooSmall
        );
        let mut zid = [0 as c_char; 33];
        assert_eq!(kr_session_zid(b, zid.as_mut_ptr(), zid.len()), KrError::KrOk);
        assert_eq!(CStr::from_ptr(zid.as_ptr()).to_bytes().len(), 32);
    }
    free_pair((a, b));
}

#[test]
fn liveliness_tokens_are_observed() {
    let (a, b) = open_pair();
    let seen = Seen::default();
    let token_key = CString::new("group/member").expect("cstring");
    let watch = CString::new("group/*").expect("cstring");

    unsafe {
        let mut token = ptr::null_mut();
        assert_eq!(
            kr_liveliness_declare_token(b, token_key.as_ptr(), &mut token),
            KrError::KrOk
        );

        let mut sub = ptr::null_mut();
        let rc = kr_liveliness_declare_subscriber(
            a,
            watch.as_ptr(),
            true,
            Some(on_sample),
            None,
            seen.as_ctx(),
            &mut sub,
        );
        assert_eq!(rc, KrError::KrOk);
        assert_eq!(kr_liveliness_undeclare_token(token), KrError::KrOk);
        kr_undeclare_subscriber(sub);
    }

    assert_eq!(seen.items(), vec!["group/member=", "group/member deleted"]);
    free_pair((a, b));
}

#[test]
fn keyexpr_helpers() {
    let c = |s: &str| CString::new(s).expect("cstring");
    let mut buf = [0 as c_char; 64];
    unsafe {
        assert_eq!(
            kr_keyexpr_canonize(c("a/**/**/b").as_ptr(), buf.as_mut_ptr(), buf.len()),
            KrError::KrOk
        );
        assert_eq!(CStr::from_ptr(buf.as_ptr()).to_str(), Ok("a/**/b"));
        assert!(kr_keyexpr_is_canonical(c("a/*/**").as_ptr()));
        assert!(!kr_keyexpr_is_canonical(c("a/**/*").as_ptr()));

        let mut hit = false;
        assert_eq!(
            kr_keyexpr_intersects(c("a/*/c").as_ptr(), c("a/b/c").as_ptr(), &mut hit),
            KrError::KrOk
        );
        assert!(hit);
        assert_eq!(
            kr_keyexpr_includes(c("a/*").as_ptr(), c("a/**").as_ptr(), &mut hit),
            KrError::KrOk
        );
        assert!(!hit);

        let mut relation = KrRelation::KrRelationDisjoint;
        kr_keyexpr_relation(c("a/**").as_ptr(), c("a/b").as_ptr(), &mut relation);
        assert_eq!(relation, KrRelation::KrRelationIncludes);

        assert_eq!(
            kr_keyexpr_join(c("a/**").as_ptr(), c("*").as_ptr(), buf.as_mut_ptr(), buf.len()),
            KrError::KrOk
        );
        assert_eq!(CStr::from_ptr(buf.as_ptr()).to_str(), Ok("a/*/**"));
        assert_eq!(
            kr_keyexpr_intersects(c("a//b").as_ptr(), c("a").as_ptr(), &mut hit),
            KrError::KrInvalidKeyExpr
        );
    }
}

#[test]
fn config_round_trip_through_c() {
    let json = CString::new(r#"{"timestamping": {"enabled": true}}"#).expect("cstring");
    let path = CString::new("timestamping/enabled").expect("cstring");
    let missing = CString::new("/no/such/keyroute.json").expect("cstring");
    let mut buf = [0 as c_char; 16];
    unsafe {
        let mut config = ptr::null_mut();
        assert_eq!(kr_config_from_json(json.as_ptr(), &mut config), KrError::KrOk);
        assert_eq!(
            kr_config_get_json(config, path.as_ptr(), buf.as_mut_ptr(), buf.len()),
            KrError::KrOk
        );
        assert_eq!(CStr::from_ptr(buf.as_ptr()).to_str(), Ok("true"));
        kr_config_free(config);

        let mut config = ptr::null_mut();
        assert_eq!(
            kr_config_from_file(missing.as_ptr(), &mut config),
            KrError::KrConfigFileNotFound
        );
        assert!(config.is_null());
    }
}
