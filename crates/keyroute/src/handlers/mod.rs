// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Delivery sinks for samples, queries and replies.
//!
//! Every sink is reduced to one [`Callback<T>`]: a shared `Fn(T)` that is
//! invoked on the delivering thread. The end of a stream is signalled by
//! dropping the last clone of that callback, so whatever the callback owns
//! (a channel sender, a user handler, an explicit drop hook) observes the
//! end of the stream exactly once and after every item.
//!
//! A callback may also carry an interrupt hook. Detaching a subscription or
//! cutting a query short fires it before waiting for an in-flight delivery,
//! so a sink blocked on a full queue gives up instead of waiting for a
//! consumer that may never come.
//!
//! Three adapters build callbacks through [`IntoHandler`]:
//!
//! | Adapter | Handler returned to the caller |
//! |---------|--------------------------------|
//! | closure `Fn(T)` / [`CallbackDrop`] | `()` |
//! | [`FifoChannel`] | [`FifoReceiver<T>`] |
//! | [`HandlerSink`] around a [`Handler<T>`] | `Handler::Receiver` |

mod custom;
mod fifo;

pub use custom::{Handler, HandlerSink};
pub use fifo::{FifoChannel, FifoReceiver, OverflowPolicy};

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Unblocks a delivery stuck in a sink. Idempotent.
pub(crate) type Interrupt = Arc<dyn Fn() + Send + Sync>;

struct CallbackInner<T> {
    call: Box<dyn Fn(T) + Send + Sync>,
    on_drop: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    interrupt: Option<Interrupt>,
}

impl<T> Drop for CallbackInner<T> {
    fn drop(&mut self) {
        if let Some(hook) = self.on_drop.get_mut().take() {
            hook();
        }
    }
}

/// Shared delivery function. Dropping the last clone ends the stream.
pub struct Callback<T> {
    inner: Arc<CallbackInner<T>>,
}

impl<T> Callback<T> {
    fn build(
        call: Box<dyn Fn(T) + Send + Sync>,
        on_drop: Option<Box<dyn FnOnce() + Send>>,
        interrupt: Option<Interrupt>,
    ) -> Self {
        Self {
            inner: Arc::new(CallbackInner {
                call,
                on_drop: Mutex::new(on_drop),
                interrupt,
            }),
        }
    }

    pub fn new<F>(f: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::build(Box::new(f), None, None)
    }

    /// Callback that runs `on_drop` once, after its last clone is gone.
    pub fn with_drop<F, D>(f: F, on_drop: D) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
        D: FnOnce() + Send + 'static,
    {
        Self::build(Box::new(f), Some(Box::new(on_drop)), None)
    }

    /// Callback whose blocking deliveries can be cut short by `interrupt`.
    pub(crate) fn with_interrupt<F, I>(f: F, interrupt: I) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
        I: Fn() + Send + Sync + 'static,
    {
        Self::build(Box::new(f), None, Some(Arc::new(interrupt)))
    }

    /// The interrupt hook, if this sink can block.
    pub(crate) fn interrupter(&self) -> Option<Interrupt> {
        self.inner.interrupt.clone()
    }

    /// Deliver one item.
    #[inline]
    pub fn call(&self, item: T) {
        (self.inner.call)(item)
    }
}

impl<T> Clone for Callback<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("clones", &Arc::strong_count(&self.inner))
            .finish()
    }
}

/// Conversion of a user-facing sink into a callback plus what the caller keeps.
pub trait IntoHandler<T> {
    /// Value handed back to the caller (receiver, user state, or `()`).
    type Handler;

    fn into_handler(self) -> (Callback<T>, Self::Handler);
}

impl<T, F> IntoHandler<T> for F
where
    F: Fn(T) + Send + Sync + 'static,
{
    type Handler = ();

    fn into_handler(self) -> (Callback<T>, ()) {
        (Callback::new(self), ())
    }
}

impl<T> IntoHandler<T> for Callback<T> {
    type Handler = ();

    fn into_handler(self) -> (Callback<T>, ()) {
        (self, ())
    }
}

/// Closure plus an end-of-stream hook.
///
/// ```rust
/// use keyroute::handlers::{CallbackDrop, IntoHandler};
///
/// let (cb, ()) = CallbackDrop {
///     callback: |n: u32| println!("got {}", n),
///     drop: || println!("done"),
/// }
/// .into_handler();
/// cb.call(1);
/// drop(cb); // prints "done"
/// ```
pub struct CallbackDrop<F, D> {
    pub callback: F,
    pub drop: D,
}

impl<T, F, D> IntoHandler<T> for CallbackDrop<F, D>
where
    F: Fn(T) + Send + Sync + 'static,
    D: FnOnce() + Send + 'static,
{
    type Handler = ();

    fn into_handler(self) -> (Callback<T>, ()) {
        (Callback::with_drop(self.callback, self.drop), ())
    }
}
