// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lifecycle of one outstanding query.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

use super::timer::Disarm;
use super::{ConsolidationMode, Reply};
use crate::handlers::{Callback, Interrupt};
use crate::keyexpr::KeyExpr;
use crate::timestamp::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Dispatched, no reply yet.
    Pending,
    /// At least one reply received.
    Collecting,
    /// End of stream delivered (or about to be).
    Terminal,
}

/// Consolidation after `Auto` has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Consolidation {
    None,
    Monotonic,
    Latest,
}

impl Consolidation {
    pub(crate) fn resolve(mode: ConsolidationMode, time_range: bool) -> Self {
        match mode {
            ConsolidationMode::Auto if time_range => Consolidation::None,
            ConsolidationMode::Auto | ConsolidationMode::Latest => Consolidation::Latest,
            ConsolidationMode::None => Consolidation::None,
            ConsolidationMode::Monotonic => Consolidation::Monotonic,
        }
    }
}

/// Why a query reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Termination {
    /// Every replier is done.
    Completed,
    /// Deadline expired.
    Deadline,
    /// Issuing session closed.
    SessionClosed,
}

/// Does `new` replace `old`? Equal timestamps keep the earlier arrival; a
/// missing timestamp on either side lets the later arrival win.
fn supersedes(new: Option<&Timestamp>, old: Option<&Timestamp>) -> bool {
    match (new, old) {
        (Some(n), Some(o)) => n > o,
        _ => true,
    }
}

struct Inner {
    phase: Phase,
    callback: Option<Callback<Reply>>,
    /// Outstanding replier handles, plus one held by the dispatcher.
    repliers: usize,
    /// Latest: index into `held` per key, in first-arrival order.
    latest: HashMap<KeyExpr, usize>,
    held: Vec<Reply>,
    /// Monotonic: timestamp of the last forwarded reply per key.
    forwarded: HashMap<KeyExpr, Option<Timestamp>>,
    /// Removes the armed deadline once the query ends early.
    disarm: Option<Disarm>,
}

/// Shared state of one query.
pub(crate) struct QueryState {
    id: u64,
    consolidation: Consolidation,
    deadline: Instant,
    interrupt: Option<Interrupt>,
    inner: Mutex<Inner>,
}

impl QueryState {
    pub(crate) fn new(
        id: u64,
        consolidation: Consolidation,
        deadline: Instant,
        callback: Callback<Reply>,
    ) -> Self {
        Self {
            id,
            consolidation,
            deadline,
            interrupt: callback.interrupter(),
            inner: Mutex::new(Inner {
                phase: Phase::Pending,
                callback: Some(callback),
                // The dispatcher's own handle.
                repliers: 1,
                latest: HashMap::new(),
                held: Vec::new(),
                forwarded: HashMap::new(),
                disarm: None,
            }),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.deadline
    }

    pub(crate) fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    /// Accept one reply. Replies after the terminal state are dropped.
    pub(crate) fn on_reply(&self, reply: Reply) {
        let mut inner = self.inner.lock();
        if inner.phase == Phase::Terminal {
            log::trace!("[Query] #{} reply after terminal state, dropped", self.id);
            return;
        }
        inner.phase = Phase::Collecting;

        let sample = match reply.result() {
            Ok(sample) => sample,
            // Errors are never consolidated.
            Err(_) => {
                if let Some(cb) = inner.callback.as_ref() {
                    cb.call(reply);
                }
                return;
            }
        };

        match self.consolidation {
            Consolidation::None => {
                if let Some(cb) = inner.callback.as_ref() {
                    cb.call(reply);
                }
            }
            Consolidation::Monotonic => {
                let key = sample.key_expr().clone();
                let ts = sample.timestamp().copied();
                let newer = match inner.forwarded.get(&key) {
                    Some(last) => supersedes(ts.as_ref(), last.as_ref()),
                    None => true,
                };
                if newer {
                    inner.forwarded.insert(key, ts);
                    if let Some(cb) = inner.callback.as_ref() {
                        cb.call(reply);
                    }
                } else {
                    log::trace!("[Query] #{} stale reply for '{}' dropped", self.id, key);
                }
            }
            Consolidation::Latest => {
                let key = sample.key_expr().clone();
                match inner.latest.get(&key).copied() {
                    Some(idx) => {
                        let replace = {
                            let held_ts = inner.held[idx].result().ok().and_then(|s| s.timestamp());
                            supersedes(sample.timestamp(), held_ts)
                        };
                        if replace {
                            inner.held[idx] = reply;
                        }
                    }
                    None => {
                        let idx = inner.held.len();
                        inner.held.push(reply);
                        inner.latest.insert(key, idx);
                    }
                }
            }
        }
    }

    /// Register one more replier handle.
    ///
    /// Returns `false` if the query already terminated.
    pub(crate) fn replier_started(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.phase == Phase::Terminal {
            return false;
        }
        inner.repliers += 1;
        true
    }

    /// Release one replier handle; the last one completes the query.
    pub(crate) fn replier_done(&self) {
        let last = {
            let mut inner = self.inner.lock();
            if inner.phase == Phase::Terminal {
                return;
            }
            inner.repliers = inner.repliers.saturating_sub(1);
            inner.repliers == 0
        };
        if last {
            self.finalize(Termination::Completed);
        }
    }

    /// Attach the timer entry to drop when the query ends before its deadline.
    pub(crate) fn arm(&self, disarm: Disarm) {
        let mut inner = self.inner.lock();
        if inner.phase == Phase::Terminal {
            drop(inner);
            disarm.cancel();
        } else {
            inner.disarm = Some(disarm);
        }
    }

    /// Move to the terminal state: flush held replies, then end the stream.
    ///
    /// Returns `false` if the query was already terminal.
    pub(crate) fn finalize(&self, reason: Termination) -> bool {
        // Deadline and close are hard cutoffs: a reply stuck on a full
        // queue is dropped rather than waited for.
        if reason != Termination::Completed {
            if let Some(interrupt) = &self.interrupt {
                interrupt();
            }
        }
        let (callback, disarm) = {
            let mut inner = self.inner.lock();
            if inner.phase == Phase::Terminal {
                return false;
            }
            inner.phase = Phase::Terminal;

            let held = std::mem::take(&mut inner.held);
            inner.latest.clear();
            inner.forwarded.clear();
            if let Some(cb) = inner.callback.as_ref() {
                for reply in held {
                    cb.call(reply);
                }
            }
            (inner.callback.take(), inner.disarm.take())
        };

        if let Some(disarm) = disarm {
            disarm.cancel();
        }
        log::debug!("[Query] #{} terminated ({:?})", self.id, reason);
        // Dropping the callback outside the lock delivers end of stream.
        drop(callback);
        true
    }
}

impl std::fmt::Debug for QueryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryState")
            .field("id", &self.id)
            .field("consolidation", &self.consolidation)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::CallbackDrop;
    use crate::handlers::IntoHandler;
    use crate::query::ReplyError;
    use crate::sample::{Encoding, Sample};
    use crate::timestamp::SessionId;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum Event {
        Ok(String, String),
        Err(String),
        End,
    }

    fn recorder() -> (Callback<Reply>, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let on_reply = Arc::clone(&events);
        let on_end = Arc::clone(&events);
        let (cb, ()) = CallbackDrop {
            callback: move |reply: Reply| {
                let ev = match reply.into_result() {
                    Ok(s) => Event::Ok(
                        s.key_expr().to_string(),
                        s.payload().try_to_string().unwrap_or_default(),
                    ),
                    Err(e) => Event::Err(e.payload().try_to_string().unwrap_or_default()),
                };
                on_reply.lock().push(ev);
            },
            drop: move || on_end.lock().push(Event::End),
        }
        .into_handler();
        (cb, events)
    }

    fn reply(key: &str, value: &str, ts: Option<u64>) -> Reply {
        let id = SessionId::from_bytes([7; 16]);
        let sample = Sample::new(KeyExpr::try_from(key).unwrap(), value)
            .with_timestamp(ts.map(|t| Timestamp::new(t, id)));
        Reply::new(id, Ok(sample))
    }

    fn state(mode: Consolidation, cb: Callback<Reply>) -> QueryState {
        QueryState::new(1, mode, Instant::now() + Duration::from_secs(10), cb)
    }

    fn ok(k: &str, v: &str) -> Event {
        Event::Ok(k.to_string(), v.to_string())
    }

    #[test]
    fn auto_resolves_by_time_range() {
        assert_eq!(
            Consolidation::resolve(ConsolidationMode::Auto, false),
            Consolidation::Latest
        );
        assert_eq!(
            Consolidation::resolve(ConsolidationMode::Auto, true),
            Consolidation::None
        );
        assert_eq!(
            Consolidation::resolve(ConsolidationMode::Monotonic, true),
            Consolidation::Monotonic
        );
    }

    #[test]
    fn none_forwards_everything() {
        let (cb, events) = recorder();
        let q = state(Consolidation::None, cb);
        q.on_reply(reply("a", "1", Some(2)));
        q.on_reply(reply("a", "2", Some(1)));
        assert_eq!(q.phase(), Phase::Collecting);
        q.finalize(Termination::Completed);
        assert_eq!(*events.lock(), vec![ok("a", "1"), ok("a", "2"), Event::End]);
    }

    #[test]
    fn latest_keeps_newest_and_flushes_before_end() {
        let (cb, events) = recorder();
        let q = state(Consolidation::Latest, cb);
        q.on_reply(reply("k", "old", Some(1)));
        q.on_reply(reply("j", "only", Some(5)));
        q.on_reply(reply("k", "new", Some(2)));
        q.on_reply(reply("k", "stale", Some(2)));
        assert!(events.lock().is_empty());

        q.finalize(Termination::Deadline);
        assert_eq!(
            *events.lock(),
            vec![ok("k", "new"), ok("j", "only"), Event::End]
        );
    }

    #[test]
    fn latest_without_timestamp_prefers_later_arrival() {
        let (cb, events) = recorder();
        let q = state(Consolidation::Latest, cb);
        q.on_reply(reply("k", "first", Some(9)));
        q.on_reply(reply("k", "second", None));
        q.finalize(Termination::Completed);
        assert_eq!(*events.lock(), vec![ok("k", "second"), Event::End]);
    }

    #[test]
    fn monotonic_drops_older() {
        let (cb, events) = recorder();
        let q = state(Consolidation::Monotonic, cb);
        q.on_reply(reply("k", "a", Some(2)));
        q.on_reply(reply("k", "b", Some(1)));
        q.on_reply(reply("k", "c", Some(2)));
        q.on_reply(reply("k", "d", Some(3)));
        q.finalize(Termination::Completed);
        assert_eq!(
            *events.lock(),
            vec![ok("k", "a"), ok("k", "d"), Event::End]
        );
    }

    #[test]
    fn errors_bypass_consolidation() {
        let (cb, events) = recorder();
        let q = state(Consolidation::Latest, cb);
        q.on_reply(reply("k", "v", Some(1)));
        q.on_reply(Reply::new(
            SessionId::from_bytes([1; 16]),
            Err(ReplyError::new("bad", Encoding::TEXT_PLAIN)),
        ));
        assert_eq!(*events.lock(), vec![Event::Err("bad".to_string())]);
        q.finalize(Termination::Completed);
        assert_eq!(events.lock().last(), Some(&Event::End));
    }

    #[test]
    fn terminal_is_exactly_once_and_last() {
        let (cb, events) = recorder();
        let q = state(Consolidation::None, cb);
        assert!(q.finalize(Termination::Deadline));
        assert!(!q.finalize(Termination::Completed));
        q.on_reply(reply("k", "late", None));
        assert_eq!(*events.lock(), vec![Event::End]);
    }

    #[test]
    fn last_replier_completes() {
        let (cb, events) = recorder();
        let q = state(Consolidation::None, cb);
        assert!(q.replier_started());
        assert!(q.replier_started());
        q.replier_done(); // dispatcher
        q.replier_done();
        assert_eq!(q.phase(), Phase::Pending);
        q.replier_done();
        assert_eq!(q.phase(), Phase::Terminal);
        assert!(!q.replier_started());
        assert_eq!(*events.lock(), vec![Event::End]);
    }
}
