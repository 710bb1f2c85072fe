// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded FIFO sink backed by a crossbeam channel.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

use super::{Callback, IntoHandler};

/// Default queue depth.
pub const DEFAULT_CAPACITY: usize = 256;

/// What the delivering thread does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Wait for the consumer to make room. A wait still pending when the
    /// stream is detached gives up and discards the item.
    #[default]
    Block,
    /// Discard the incoming item.
    DropNewest,
}

/// Bounded queue sink configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoChannel {
    capacity: usize,
    policy: OverflowPolicy,
}

impl FifoChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            policy: OverflowPolicy::Block,
        }
    }

    pub fn with_policy(mut self, policy: OverflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}

impl Default for FifoChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<T: Send + 'static> IntoHandler<T> for FifoChannel {
    type Handler = FifoReceiver<T>;

    fn into_handler(self) -> (Callback<T>, FifoReceiver<T>) {
        let (tx, rx): (Sender<T>, Receiver<T>) = channel::bounded(self.capacity);
        let callback = match self.policy {
            OverflowPolicy::Block => {
                // Dropping `stop_tx` disconnects `stop_rx`, which wakes the select.
                let (stop_tx, stop_rx) = channel::bounded::<()>(0);
                let stop_tx = Mutex::new(Some(stop_tx));
                Callback::with_interrupt(
                    move |item| match tx.try_send(item) {
                        Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                        Err(TrySendError::Full(item)) => channel::select! {
                            send(tx, item) -> _ => {}
                            recv(stop_rx) -> _ => {
                                log::trace!("[FifoChannel] detached while full, dropping item");
                            }
                        },
                    },
                    move || {
                        stop_tx.lock().take();
                    },
                )
            }
            OverflowPolicy::DropNewest => Callback::new(move |item| {
                if let Err(TrySendError::Full(_)) = tx.try_send(item) {
                    log::trace!("[FifoChannel] queue full, dropping newest item");
                }
            }),
        };
        (callback, FifoReceiver { rx })
    }
}

/// Consumer end of a [`FifoChannel`].
///
/// Every receive method returns `None` once the stream has ended (the sender
/// side was dropped) and all queued items were consumed.
#[derive(Debug)]
pub struct FifoReceiver<T> {
    rx: Receiver<T>,
}

impl<T> Clone for FifoReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T> FifoReceiver<T> {
    /// Block until an item arrives or the stream ends.
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Block for at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Block until `deadline`.
    pub fn recv_deadline(&self, deadline: Instant) -> Option<T> {
        self.rx.recv_deadline(deadline).ok()
    }

    /// Blocking iterator until end of stream.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.rx.iter()
    }

    /// Drain whatever is queued now without blocking.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<'a, T> IntoIterator for &'a FifoReceiver<T> {
    type Item = T;
    type IntoIter = channel::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rx.iter()
    }
}
