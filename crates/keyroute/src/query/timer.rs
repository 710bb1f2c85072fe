// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Query deadline timer.
//!
//! One background thread per session sleeps on a parking_lot `Condvar` until
//! the earliest deadline in a min-heap, then finalizes every expired query.
//! The thread is spawned on the first scheduled query. A query that ends
//! before its deadline removes its own entry through the [`Disarm`] it was
//! armed with, so the heap only holds live queries.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use super::state::{QueryState, Termination};
use crate::error::{Error, Result};

struct Entry {
    deadline: Instant,
    seq: u64,
    state: Arc<QueryState>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

#[derive(Default)]
struct Heap {
    entries: BinaryHeap<Reverse<Entry>>,
    seq: u64,
    shutdown: bool,
}

struct Shared {
    heap: Mutex<Heap>,
    wake: Condvar,
}

/// Removes one armed deadline from its timer.
pub(crate) struct Disarm {
    shared: Weak<Shared>,
    seq: u64,
}

impl Disarm {
    pub(crate) fn cancel(self) {
        if let Some(shared) = self.shared.upgrade() {
            let mut heap = shared.heap.lock();
            heap.entries.retain(|Reverse(e)| e.seq != self.seq);
        }
    }
}

/// Deadline scheduler for the queries of one session.
pub(crate) struct DeadlineTimer {
    name: String,
    shared: Arc<Shared>,
    thread: Mutex<Option<(JoinHandle<()>, ThreadId)>>,
}

impl DeadlineTimer {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                heap: Mutex::new(Heap::default()),
                wake: Condvar::new(),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Arm the deadline of `state`.
    pub(crate) fn schedule(&self, state: Arc<QueryState>) -> Result<()> {
        if self.shared.heap.lock().shutdown {
            return Err(Error::SessionClosed);
        }
        self.ensure_thread()?;

        let mut heap = self.shared.heap.lock();
        if heap.shutdown {
            return Err(Error::SessionClosed);
        }
        heap.seq += 1;
        let seq = heap.seq;
        let earliest = heap
            .entries
            .peek()
            .map(|Reverse(e)| e.deadline)
            .map_or(true, |d| state.deadline() < d);
        heap.entries.push(Reverse(Entry {
            deadline: state.deadline(),
            seq,
            state: Arc::clone(&state),
        }));
        drop(heap);

        state.arm(Disarm {
            shared: Arc::downgrade(&self.shared),
            seq,
        });
        if earliest {
            self.shared.wake.notify_one();
        }
        Ok(())
    }

    /// Number of armed deadlines of queries that have not ended yet.
    pub(crate) fn pending(&self) -> usize {
        self.shared.heap.lock().entries.len()
    }

    fn ensure_thread(&self) -> Result<()> {
        let mut slot = self.thread.lock();
        if slot.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run(shared))?;
        let id = handle.thread().id();
        *slot = Some((handle, id));
        Ok(())
    }

    /// Stop the thread and finalize every query still armed.
    ///
    /// Idempotent. Safe to call from the timer thread itself (the thread is
    /// then detached instead of joined).
    pub(crate) fn shutdown(&self, reason: Termination) {
        let drained: Vec<Arc<QueryState>> = {
            let mut heap = self.shared.heap.lock();
            heap.shutdown = true;
            heap.entries.drain().map(|Reverse(e)| e.state).collect()
        };
        self.shared.wake.notify_all();

        if let Some((handle, id)) = self.thread.lock().take() {
            if id == thread::current().id() {
                log::debug!("[DeadlineTimer] shutdown from timer thread, detaching");
            } else if handle.join().is_err() {
                log::warn!("[DeadlineTimer] timer thread panicked");
            }
        }

        for state in drained {
            state.finalize(reason);
        }
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.shutdown(Termination::SessionClosed);
    }
}

fn run(shared: Arc<Shared>) {
    let mut heap = shared.heap.lock();
    loop {
        if heap.shutdown {
            break;
        }
        let next = heap.entries.peek().map(|Reverse(e)| e.deadline);
        match next {
            None => shared.wake.wait(&mut heap),
            Some(deadline) if deadline <= Instant::now() => {
                let expired = pop_expired(&mut heap, Instant::now());
                MutexGuard::unlocked(&mut heap, || {
                    for state in expired {
                        state.finalize(Termination::Deadline);
                    }
                });
            }
            Some(deadline) => {
                // Spurious wake-ups and new earlier deadlines just loop.
                let _ = shared.wake.wait_until(&mut heap, deadline);
            }
        }
    }
    log::trace!("[DeadlineTimer] thread exiting");
}

fn pop_expired(heap: &mut Heap, now: Instant) -> Vec<Arc<QueryState>> {
    let mut expired = Vec::new();
    while let Some(Reverse(entry)) = heap.entries.peek() {
        if entry.deadline > now {
            break;
        }
        if let Some(Reverse(entry)) = heap.entries.pop() {
            expired.push(entry.state);
        }
    }
    expired
}
