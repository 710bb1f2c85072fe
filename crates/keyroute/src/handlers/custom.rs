// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! User-defined handlers.

use parking_lot::Mutex;
use std::marker::PhantomData;

use super::{Callback, IntoHandler};

/// Stateful sink implemented by the application.
///
/// `handle` is called once per item, serialized, on the delivering thread.
/// `on_close` is called once, after the last item, when the stream ends.
///
/// # Examples
/// ```no_run
/// use keyroute::handlers::Handler;
/// use std::sync::{Arc, Mutex};
///
/// struct Collect(Arc<Mutex<Vec<String>>>);
///
/// impl Handler<String> for Collect {
///     type Receiver = Arc<Mutex<Vec<String>>>;
///
///     fn handle(&mut self, item: String) {
///         self.0.lock().unwrap().push(item);
///     }
///
///     fn receiver(&mut self) -> Self::Receiver {
///         Arc::clone(&self.0)
///     }
/// }
/// ```
pub trait Handler<T>: Send + 'static {
    /// What the declaring call returns to the application.
    type Receiver;

    fn handle(&mut self, item: T);

    fn receiver(&mut self) -> Self::Receiver;

    fn on_close(&mut self) {}
}

/// Adapter turning a [`Handler`] into a delivery sink.
pub struct HandlerSink<H>(pub H);

struct HandlerState<T, H: Handler<T>> {
    handler: Mutex<H>,
    _item: PhantomData<fn(T)>,
}

impl<T, H: Handler<T>> Drop for HandlerState<T, H> {
    fn drop(&mut self) {
        self.handler.get_mut().on_close();
    }
}

impl<T: 'static, H: Handler<T>> IntoHandler<T> for HandlerSink<H> {
    type Handler = H::Receiver;

    fn into_handler(self) -> (Callback<T>, H::Receiver) {
        let mut handler = self.0;
        let receiver = handler.receiver();
        let state = HandlerState {
            handler: Mutex::new(handler),
            _item: PhantomData,
        };
        let callback = Callback::new(move |item: T| state.handler.lock().handle(item));
        (callback, receiver)
    }
}
