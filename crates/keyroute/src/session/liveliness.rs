// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Liveliness tokens: presence announcements tied to a session.
//!
//! A token is alive from `declare_token` until it is undeclared, dropped, or
//! its session closes. Liveliness subscribers see a `Put` sample when a
//! matching token appears and a `Delete` sample when it goes away.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::fabric::{next_entry_id, DeliverySlot, SubscriberEntry, TokenEntry};
use super::options::{LivelinessSubscriberOptions, Locality};
use super::pubsub::Subscriber;
use super::{DeclarationHandle, Resource, Session};
use crate::error::{Error, Result};
use crate::handlers::IntoHandler;
use crate::keyexpr::KeyExpr;
use crate::query::state::{Consolidation, QueryState};
use crate::query::Reply;
use crate::sample::Sample;

/// Liveliness operations of one session, from `Session::liveliness`.
pub struct Liveliness<'a> {
    session: &'a Session,
}

impl<'a> Liveliness<'a> {
    pub(crate) fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Announce `key_expr` as alive until the token is dropped.
    pub fn declare_token<K>(&self, key_expr: K) -> Result<LivelinessToken>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
    {
        let key_expr: KeyExpr = key_expr.try_into().map_err(Into::into)?;
        let inner = self.session.inner();
        inner.ensure_open()?;
        key_expr.check_usable(inner.zid())?;

        let id = next_entry_id();
        inner.register(id, Resource::LivelinessToken, || {})?;
        // Announced outside the session lock: subscribers run user code.
        inner.fabric().add_token(
            id,
            TokenEntry {
                key_expr: key_expr.undeclared(),
                session: inner.zid(),
            },
        );
        if inner.is_closed() {
            // Lost a race with close(), which found nothing to withdraw yet.
            inner.fabric().remove_token(id);
        }

        Ok(LivelinessToken {
            key_expr,
            handle: DeclarationHandle::new(id, inner),
        })
    }

    pub fn declare_subscriber<K, H>(&self, key_expr: K, handler: H) -> Result<Subscriber<H::Handler>>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
        H: IntoHandler<Sample>,
    {
        self.declare_subscriber_with(key_expr, handler, LivelinessSubscriberOptions::default())
    }

    /// Watch tokens intersecting `key_expr`. With `history`, tokens already
    /// alive are delivered as `Put` samples before this returns.
    pub fn declare_subscriber_with<K, H>(
        &self,
        key_expr: K,
        handler: H,
        options: LivelinessSubscriberOptions,
    ) -> Result<Subscriber<H::Handler>>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
        H: IntoHandler<Sample>,
    {
        let key_expr: KeyExpr = key_expr.try_into().map_err(Into::into)?;
        let inner = self.session.inner();
        inner.ensure_open()?;
        key_expr.check_usable(inner.zid())?;

        let (callback, handler) = handler.into_handler();
        let id = next_entry_id();
        let entry = Arc::new(SubscriberEntry {
            slot: DeliverySlot::new(id, callback),
            key_expr: key_expr.undeclared(),
            session: inner.zid(),
            origin: Locality::Any,
        });

        let fabric = Arc::clone(inner.fabric());
        let installed = Arc::clone(&entry);
        let mut replay = Vec::new();
        inner.register(id, Resource::LivelinessSubscriber(Arc::clone(&entry)), || {
            replay = fabric.add_liveliness_subscriber(installed, options.history);
        })?;

        if !replay.is_empty() {
            log::debug!(
                "[Liveliness] subscriber #{} replays {} alive token(s)",
                id,
                replay.len()
            );
        }
        for token in replay {
            entry.slot.deliver(Sample::new(token.key_expr, Vec::new()));
        }

        Ok(Subscriber::new(
            key_expr,
            handler,
            DeclarationHandle::new(id, inner),
        ))
    }

    /// One reply per alive token intersecting `key_expr`, then end of stream.
    pub fn get<K, H>(&self, key_expr: K, handler: H) -> Result<H::Handler>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
        H: IntoHandler<Reply>,
    {
        let timeout = self.session.inner().default_timeout();
        self.get_with(key_expr, handler, timeout)
    }

    pub fn get_with<K, H>(&self, key_expr: K, handler: H, timeout: Duration) -> Result<H::Handler>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
        H: IntoHandler<Reply>,
    {
        let key_expr: KeyExpr = key_expr.try_into().map_err(Into::into)?;
        let inner = self.session.inner();
        inner.ensure_open()?;
        key_expr.check_usable(inner.zid())?;

        let (callback, handler) = handler.into_handler();
        let state = Arc::new(QueryState::new(
            inner.next_query_id(),
            Consolidation::None,
            Instant::now() + timeout,
            callback,
        ));
        inner.timer().schedule(Arc::clone(&state))?;

        let alive = inner.fabric().alive_tokens(&key_expr);
        log::debug!(
            "[Liveliness] get '{}' -> {} alive token(s)",
            key_expr,
            alive.len()
        );
        for token in alive {
            state.on_reply(Reply::new(
                token.session,
                Ok(Sample::new(token.key_expr, Vec::new())),
            ));
        }
        state.replier_done();
        Ok(handler)
    }
}

/// An alive liveliness token. Dropping it withdraws it.
pub struct LivelinessToken {
    key_expr: KeyExpr,
    handle: DeclarationHandle,
}

impl LivelinessToken {
    pub fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    pub fn undeclare(mut self) -> Result<()> {
        self.handle.undeclare()
    }
}

impl fmt::Debug for LivelinessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LivelinessToken")
            .field("key_expr", &self.key_expr)
            .field("id", &self.handle.id())
            .finish()
    }
}
