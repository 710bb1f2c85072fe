// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Queryables and the incoming queries they answer.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::state::QueryState;
use super::{Reply, ReplyError, ReplyOptions};
use crate::error::{Error, Result};
use crate::keyexpr::KeyExpr;
use crate::sample::{Encoding, QoS, Sample, SampleKind, ZBytes};
use crate::selector::{Parameters, Selector};
use crate::session::options::Locality;
use crate::session::DeclarationHandle;
use crate::timestamp::{Clock, SessionId};

/// Options for `Session::declare_queryable_with`.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryableOptions {
    /// This queryable answers for every key its key expression covers.
    pub complete: bool,
    pub allowed_origin: Locality,
}

impl QueryableOptions {
    pub fn complete(mut self, complete: bool) -> Self {
        self.complete = complete;
        self
    }

    pub fn allowed_origin(mut self, locality: Locality) -> Self {
        self.allowed_origin = locality;
        self
    }
}

/// Identity of the session answering queries.
#[derive(Debug)]
pub(crate) struct Replier {
    pub(crate) zid: SessionId,
    pub(crate) closed: Arc<AtomicBool>,
    /// Set when the replying session stamps its replies.
    pub(crate) clock: Option<Arc<Clock>>,
}

struct QueryInner {
    selector: Selector,
    payload: Option<ZBytes>,
    encoding: Option<Encoding>,
    attachment: Option<ZBytes>,
    qos: QoS,
    state: Arc<QueryState>,
    replier: Arc<Replier>,
}

impl Drop for QueryInner {
    fn drop(&mut self) {
        self.state.replier_done();
    }
}

/// A query received by a queryable.
///
/// Replies may be sent any number of times, from any thread. The query
/// counts as answered by this queryable once every clone is dropped.
#[derive(Clone)]
pub struct Query {
    inner: Arc<QueryInner>,
}

/// What the issuing side sends along with a query.
#[derive(Debug, Clone, Default)]
pub(crate) struct QueryContent {
    pub(crate) payload: Option<ZBytes>,
    pub(crate) encoding: Option<Encoding>,
    pub(crate) attachment: Option<ZBytes>,
    pub(crate) qos: QoS,
}

impl Query {
    /// Hand a query to one replier. `None` if the query already terminated.
    pub(crate) fn dispatch(
        selector: Selector,
        content: QueryContent,
        state: &Arc<QueryState>,
        replier: Arc<Replier>,
    ) -> Option<Query> {
        if !state.replier_started() {
            return None;
        }
        Some(Query {
            inner: Arc::new(QueryInner {
                selector,
                payload: content.payload,
                encoding: content.encoding,
                attachment: content.attachment,
                qos: content.qos,
                state: Arc::clone(state),
                replier,
            }),
        })
    }

    pub fn selector(&self) -> &Selector {
        &self.inner.selector
    }

    pub fn key_expr(&self) -> &KeyExpr {
        self.inner.selector.key_expr()
    }

    pub fn parameters(&self) -> Option<&Parameters> {
        self.inner.selector.parameters()
    }

    pub fn payload(&self) -> Option<&ZBytes> {
        self.inner.payload.as_ref()
    }

    pub fn encoding(&self) -> Option<&Encoding> {
        self.inner.encoding.as_ref()
    }

    pub fn attachment(&self) -> Option<&ZBytes> {
        self.inner.attachment.as_ref()
    }

    pub fn qos(&self) -> QoS {
        self.inner.qos
    }

    /// Reply with a value on `key_expr`.
    pub fn reply<K, P>(&self, key_expr: K, payload: P) -> Result<()>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
        P: Into<ZBytes>,
    {
        self.reply_with(key_expr, payload, ReplyOptions::default())
    }

    pub fn reply_with<K, P>(&self, key_expr: K, payload: P, options: ReplyOptions) -> Result<()>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
        P: Into<ZBytes>,
    {
        let key_expr = key_expr.try_into().map_err(Into::into)?;
        self.send_sample(key_expr, payload.into(), SampleKind::Put, options)
    }

    /// Reply with a deletion of `key_expr`.
    pub fn reply_del<K>(&self, key_expr: K) -> Result<()>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
    {
        self.reply_del_with(key_expr, ReplyOptions::default())
    }

    pub fn reply_del_with<K>(&self, key_expr: K, options: ReplyOptions) -> Result<()>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
    {
        let key_expr = key_expr.try_into().map_err(Into::into)?;
        self.send_sample(key_expr, ZBytes::new(), SampleKind::Delete, options)
    }

    /// Reply with an error.
    pub fn reply_err<P: Into<ZBytes>>(&self, payload: P) -> Result<()> {
        self.reply_err_with(payload, Encoding::default())
    }

    pub fn reply_err_with<P: Into<ZBytes>>(&self, payload: P, encoding: Encoding) -> Result<()> {
        self.check_open()?;
        let reply = Reply::new(
            self.inner.replier.zid,
            Err(ReplyError::new(payload, encoding)),
        );
        self.inner.state.on_reply(reply);
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.replier.closed.load(Ordering::Acquire) {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    fn send_sample(
        &self,
        key_expr: KeyExpr,
        payload: ZBytes,
        kind: SampleKind,
        options: ReplyOptions,
    ) -> Result<()> {
        self.check_open()?;
        key_expr.check_usable(self.inner.replier.zid)?;

        let query_key = self.inner.selector.key_expr();
        if !self.inner.selector.accepts_any_key() && !query_key.intersects(&key_expr) {
            return Err(Error::InvalidKeyExpr(format!(
                "reply key '{}' does not intersect query key '{}'",
                key_expr, query_key
            )));
        }

        let timestamp = options
            .timestamp
            .or_else(|| self.inner.replier.clock.as_ref().map(|c| c.now()));
        let sample = Sample::new(key_expr, payload)
            .with_kind(kind)
            .with_encoding(options.encoding)
            .with_timestamp(timestamp)
            .with_qos(options.qos)
            .with_attachment(options.attachment);

        self.inner
            .state
            .on_reply(Reply::new(self.inner.replier.zid, Ok(sample)));
        Ok(())
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("selector", &self.inner.selector.to_string())
            .field("query", &self.inner.state.id())
            .finish()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query{{{}}}", self.inner.selector)
    }
}

/// A declared queryable. Dropping it undeclares it.
pub struct Queryable<H> {
    key_expr: KeyExpr,
    complete: bool,
    handler: H,
    handle: DeclarationHandle,
}

impl<H> Queryable<H> {
    pub(crate) fn new(key_expr: KeyExpr, complete: bool, handler: H, handle: DeclarationHandle) -> Self {
        Self {
            key_expr,
            complete,
            handler,
            handle,
        }
    }

    pub fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Detach synchronously: once this returns the callback no longer runs.
    pub fn undeclare(self) -> Result<()> {
        let Self {
            handler,
            mut handle,
            ..
        } = self;
        drop(handler);
        handle.undeclare()
    }
}

impl<H> Deref for Queryable<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.handler
    }
}

impl<H> fmt::Debug for Queryable<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queryable")
            .field("key_expr", &self.key_expr)
            .field("complete", &self.complete)
            .field("id", &self.handle.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{CallbackDrop, IntoHandler};
    use crate::query::state::{Consolidation, Phase};
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    fn setup() -> (Arc<QueryState>, Arc<Mutex<Vec<Reply>>>, Arc<Replier>) {
        let replies = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&replies);
        let (cb, ()) = CallbackDrop {
            callback: move |r: Reply| sink.lock().push(r),
            drop: || {},
        }
        .into_handler();
        let state = Arc::new(QueryState::new(
            1,
            Consolidation::None,
            Instant::now() + Duration::from_secs(5),
            cb,
        ));
        let replier = Arc::new(Replier {
            zid: SessionId::from_bytes([3; 16]),
            closed: Arc::new(AtomicBool::new(false)),
            clock: None,
        });
        (state, replies, replier)
    }

    #[test]
    fn replies_reach_the_state() {
        let (state, replies, replier) = setup();
        let query = Query::dispatch(
            Selector::try_from("demo/q").unwrap(),
            QueryContent::default(),
            &state,
            replier,
        )
        .unwrap();

        query.reply("demo/q", "pong").unwrap();
        query.reply_err("nope").unwrap();
        assert_eq!(replies.lock().len(), 2);
        assert_eq!(
            replies.lock()[0].result().unwrap().payload().try_to_string().unwrap(),
            "pong"
        );
    }

    #[test]
    fn reply_key_must_intersect_unless_anyke() {
        let (state, _replies, replier) = setup();
        let strict = Query::dispatch(
            Selector::try_from("demo/q").unwrap(),
            QueryContent::default(),
            &state,
            Arc::clone(&replier),
        )
        .unwrap();
        assert!(matches!(
            strict.reply("other/key", "x"),
            Err(Error::InvalidKeyExpr(_))
        ));

        let lenient = Query::dispatch(
            Selector::try_from("demo/q?_anyke").unwrap(),
            QueryContent::default(),
            &state,
            replier,
        )
        .unwrap();
        assert!(lenient.reply("other/key", "x").is_ok());
    }

    #[test]
    fn closed_replier_cannot_reply() {
        let (state, _replies, replier) = setup();
        let query = Query::dispatch(
            Selector::try_from("demo/q").unwrap(),
            QueryContent::default(),
            &state,
            Arc::clone(&replier),
        )
        .unwrap();
        replier.closed.store(true, Ordering::Release);
        assert!(matches!(query.reply("demo/q", "x"), Err(Error::SessionClosed)));
        assert!(matches!(query.reply_err("x"), Err(Error::SessionClosed)));
    }

    #[test]
    fn dropping_every_clone_completes() {
        let (state, _replies, replier) = setup();
        let query = Query::dispatch(
            Selector::try_from("demo/q").unwrap(),
            QueryContent::default(),
            &state,
            replier,
        )
        .unwrap();
        let copy = query.clone();
        state.replier_done(); // dispatcher handle
        drop(query);
        assert_eq!(state.phase(), Phase::Pending);
        drop(copy);
        assert_eq!(state.phase(), Phase::Terminal);
    }
}
