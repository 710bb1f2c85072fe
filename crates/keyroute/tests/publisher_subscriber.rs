// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test readability over pedantic

//! Publish/subscribe across sessions sharing a fabric.

use keyroute::handlers::OverflowPolicy;
use keyroute::{
    z_serialize, CallbackDrop, Config, Encoding, Error, FifoChannel, FifoReceiver, PutOptions, Sample,
    SampleKind, Session,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

static FABRIC_SEQ: AtomicUsize = AtomicUsize::new(0);

fn open_on(name: &str) -> Session {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut config = Config::default();
    config
        .insert_json("fabric", &format!("\"{}\"", name))
        .expect("fabric name");
    keyroute::open(config).expect("open")
}

fn fresh_fabric(tag: &str) -> String {
    format!("pubsub-{}-{}", tag, FABRIC_SEQ.fetch_add(1, Ordering::Relaxed))
}

#[test]
fn wildcard_subscription_receives_put() {
    let name = fresh_fabric("wildcard");
    let subscriber_side = open_on(&name);
    let publisher_side = open_on(&name);

    let sub = subscriber_side
        .declare_subscriber("demo/**", FifoChannel::default())
        .expect("subscriber");
    publisher_side.put("demo/a/b", "hello").expect("put");
    publisher_side.put("other/a", "ignored").expect("put");

    let sample = sub.try_recv().expect("one sample");
    assert_eq!(sample.key_expr().as_str(), "demo/a/b");
    assert_eq!(sample.kind(), SampleKind::Put);
    assert_eq!(sample.payload().try_to_string().expect("utf8"), "hello");
    assert!(sub.try_recv().is_none());
}

#[test]
fn put_options_travel_with_the_sample() {
    let name = fresh_fabric("options");
    let session = open_on(&name);
    let sub = session
        .declare_subscriber("opt/*", FifoChannel::default())
        .expect("subscriber");

    let ts = session.new_timestamp();
    session
        .put_with(
            "opt/x",
            r#"{"v": 1}"#,
            PutOptions::default()
                .encoding(Encoding::APPLICATION_JSON)
                .timestamp(ts)
                .attachment("meta"),
        )
        .expect("put");
    session.delete("opt/x").expect("delete");

    let put = sub.try_recv().expect("put sample");
    assert_eq!(put.encoding(), &Encoding::APPLICATION_JSON);
    assert_eq!(put.timestamp(), Some(&ts));
    assert_eq!(
        put.attachment().expect("attachment").try_to_string().expect("utf8"),
        "meta"
    );
    let delete = sub.try_recv().expect("delete sample");
    assert_eq!(delete.kind(), SampleKind::Delete);
    assert!(delete.payload().is_empty());
}

#[test]
fn typed_payload_crosses_sessions() {
    let name = fresh_fabric("typed");
    let subscriber_side = open_on(&name);
    let publisher_side = open_on(&name);
    let sub = subscriber_side
        .declare_subscriber("typed/**", FifoChannel::default())
        .expect("subscriber");

    let readings: HashMap<String, Vec<i32>> = HashMap::from([
        ("north".to_string(), vec![1, 2, 3]),
        ("south".to_string(), vec![-4]),
    ]);
    publisher_side
        .put("typed/readings", z_serialize(&readings))
        .expect("put");

    let sample = sub.try_recv().expect("one sample");
    let decoded: HashMap<String, Vec<i32>> = sample.payload().deserialize().expect("decode");
    assert_eq!(decoded, readings);
    assert!(sample.payload().deserialize::<Vec<String>>().is_err());
}

#[test]
fn closed_session_rejects_and_goes_silent() {
    let name = fresh_fabric("closed");
    let publisher = open_on(&name);
    let subscriber_side = open_on(&name);

    let hits = Arc::new(AtomicUsize::new(0));
    let ends = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    let e = Arc::clone(&ends);
    let _sub = subscriber_side
        .declare_subscriber(
            "quiet/**",
            CallbackDrop {
                callback: move |_: Sample| {
                    h.fetch_add(1, Ordering::SeqCst);
                },
                drop: move || {
                    e.fetch_add(1, Ordering::SeqCst);
                },
            },
        )
        .expect("subscriber");

    publisher.put("quiet/1", "x").expect("put");
    subscriber_side.close().expect("close");
    assert_eq!(ends.load(Ordering::SeqCst), 1);

    publisher.put("quiet/2", "x").expect("put");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    assert!(matches!(
        subscriber_side.put("quiet/3", "x"),
        Err(Error::SessionClosed)
    ));
    assert!(matches!(
        subscriber_side.declare_subscriber("quiet/**", FifoChannel::default()),
        Err(Error::SessionClosed)
    ));
    assert!(matches!(
        subscriber_side.get("quiet/**", FifoChannel::default()),
        Err(Error::SessionClosed)
    ));
}

#[test]
fn callbacks_may_declare_and_publish() {
    let name = fresh_fabric("reentrant");
    let session = open_on(&name);
    let echo = session
        .declare_subscriber("echo/out", FifoChannel::default())
        .expect("subscriber");

    let inner = session.clone();
    let _relay = session
        .declare_subscriber("echo/in", move |sample: Sample| {
            let text = sample.payload().try_to_string().expect("utf8");
            inner
                .put("echo/out", format!("re: {}", text))
                .expect("nested put");
        })
        .expect("relay");

    session.put("echo/in", "ping").expect("put");
    assert_eq!(
        echo.try_recv()
            .expect("relayed")
            .payload()
            .try_to_string()
            .expect("utf8"),
        "re: ping"
    );
    // The relay holds a session clone; closing breaks the cycle.
    session.close().expect("close");
}

#[test]
fn drop_newest_policy_keeps_the_oldest() {
    let name = fresh_fabric("overflow");
    let session = open_on(&name);
    let sub = session
        .declare_subscriber(
            "burst/k",
            FifoChannel::new(2).with_policy(OverflowPolicy::DropNewest),
        )
        .expect("subscriber");
    for i in 0..5 {
        session.put("burst/k", i.to_string()).expect("put");
    }
    let values: Vec<String> = sub
        .drain()
        .iter()
        .map(|s| s.payload().try_to_string().expect("utf8"))
        .collect();
    assert_eq!(values, vec!["0", "1"]);
}

#[test]
fn concurrent_publishers_each_keep_their_order() {
    let name = fresh_fabric("fifo");
    let receiver = open_on(&name);
    let sub = receiver
        .declare_subscriber("seq/*", FifoChannel::new(1024))
        .expect("subscriber");

    let handles: Vec<_> = (0..4)
        .map(|p| {
            let session = open_on(&name);
            thread::spawn(move || {
                let key = format!("seq/{}", p);
                for i in 0..100u32 {
                    session.put(key.as_str(), i.to_string()).expect("put");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("publisher thread");
    }

    let mut last = [None::<u32>; 4];
    for sample in sub.drain() {
        let p: usize = sample.key_expr().as_str()[4..].parse().expect("publisher index");
        let i: u32 = sample
            .payload()
            .try_to_string()
            .expect("utf8")
            .parse()
            .expect("sequence");
        if let Some(prev) = last[p] {
            assert!(i > prev, "publisher {} reordered: {} after {}", p, i, prev);
        }
        last[p] = Some(i);
    }
    assert!(last.iter().all(|l| *l == Some(99)));
}

/// Run `f` on its own thread; `None` if it has not returned within `limit`.
fn within<T: Send + 'static>(limit: Duration, f: impl FnOnce() -> T + Send + 'static) -> Option<T> {
    let (tx, rx) = crossbeam::channel::bounded(1);
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(limit).ok()
}

/// Fill a one-slot queue and leave a publisher blocked on the next put.
fn blocked_publisher(
    session: &Session,
    key: &'static str,
    queue: &FifoReceiver<Sample>,
) -> thread::JoinHandle<()> {
    let publisher = session.clone();
    let handle = thread::spawn(move || {
        for i in 0..3 {
            let _ = publisher.put(key, format!("{}", i));
        }
    });
    let deadline = Instant::now() + Duration::from_secs(3);
    while queue.is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(queue.len(), 1);
    thread::sleep(Duration::from_millis(20));
    handle
}

#[test]
fn undeclare_returns_while_a_put_waits_on_a_full_queue() {
    let name = fresh_fabric("full-undeclare");
    let subscriber_side = open_on(&name);
    let publisher_side = open_on(&name);
    let sub = subscriber_side
        .declare_subscriber("full/k", FifoChannel::new(1))
        .expect("subscriber");

    let producer = blocked_publisher(&publisher_side, "full/k", sub.handler());

    let undeclared = within(Duration::from_secs(3), move || sub.undeclare());
    assert!(matches!(undeclared, Some(Ok(()))));
    assert!(within(Duration::from_secs(3), move || producer.join().is_ok()).unwrap_or(false));
}

#[test]
fn close_unblocks_a_full_queue_whose_receiver_is_kept() {
    let name = fresh_fabric("full-close");
    let subscriber_side = open_on(&name);
    let publisher_side = open_on(&name);
    let sub = subscriber_side
        .declare_subscriber("full/k", FifoChannel::new(1))
        .expect("subscriber");
    let receiver = sub.handler().clone();

    let producer = blocked_publisher(&publisher_side, "full/k", &receiver);

    let closing = subscriber_side.clone();
    let closed = within(Duration::from_secs(3), move || closing.close());
    assert!(matches!(closed, Some(Ok(()))));
    assert!(within(Duration::from_secs(3), move || producer.join().is_ok()).unwrap_or(false));

    // The queued sample is still there, then the stream ends.
    let first = receiver.recv_timeout(Duration::from_secs(1)).expect("queued sample");
    assert_eq!(first.payload().try_to_string().expect("utf8"), "0");
    assert!(receiver.recv_timeout(Duration::from_secs(1)).is_none());
    drop(sub);
}
