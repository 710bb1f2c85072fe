// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sessions: the entry point of every operation.
//!
//! # Architecture
//!
//! ```text
//! Session (Clone, Arc<SessionInner>)
//! +-- zid: SessionId
//! +-- fabric: Arc<Fabric>           shared with every session on the same fabric name
//! +-- state: RwLock<SessionState>
//! |     +-- keyexprs:  expr_id -> Declaration
//! |     +-- resources: DeclarationId -> Resource (subscriber, queryable, token, ...)
//! +-- timer: DeadlineTimer          deadlines of queries issued by this session
//! +-- replier: Arc<Replier>         identity stamped on replies sent from here
//! ```
//!
//! Declared objects (`Subscriber`, `Queryable`, `Publisher`, ...) only hold a
//! `Weak` back-reference, so dropping the last `Session` clone closes the
//! session even while they are alive. `close()` tears every declaration down,
//! retires declared key expressions, and ends every pending query.

pub(crate) mod fabric;
mod liveliness;
pub mod options;
mod pubsub;

pub use fabric::DEFAULT_FABRIC;
pub use liveliness::{Liveliness, LivelinessToken};
pub use options::{
    DeleteOptions, LivelinessSubscriberOptions, Locality, PublisherOptions, PublisherPutOptions,
    PutOptions, SubscriberOptions,
};
pub use pubsub::{Publisher, Subscriber};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use self::fabric::{next_entry_id, DeliverySlot, Fabric, QueryableEntry, SubscriberEntry};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::handlers::{Callback, IntoHandler};
use crate::keyexpr::{Declaration, KeyExpr};
use crate::query::queryable::{QueryContent, Replier};
use crate::query::state::{Consolidation, QueryState, Termination};
use crate::query::timer::DeadlineTimer;
use crate::query::{
    ConsolidationMode, GetOptions, Query, Querier, QuerierOptions, QueryTarget, Queryable,
    QueryableOptions, Reply,
};
use crate::sample::{Encoding, QoS, Sample, SampleKind, ZBytes};
use crate::selector::Selector;
use crate::timestamp::{Clock, SessionId, Timestamp};

/// What a declaration id refers to.
pub(crate) enum Resource {
    Subscriber(Arc<SubscriberEntry>),
    Queryable(Arc<QueryableEntry>),
    LivelinessToken,
    LivelinessSubscriber(Arc<SubscriberEntry>),
    Publisher,
    Querier,
}

impl Resource {
    fn kind(&self) -> &'static str {
        match self {
            Resource::Subscriber(_) => "subscriber",
            Resource::Queryable(_) => "queryable",
            Resource::LivelinessToken => "liveliness token",
            Resource::LivelinessSubscriber(_) => "liveliness subscriber",
            Resource::Publisher => "publisher",
            Resource::Querier => "querier",
        }
    }

    /// Remove from the fabric and stop deliveries.
    fn teardown(self, fabric: &Fabric, id: u64) {
        match self {
            Resource::Subscriber(entry) => {
                fabric.remove_subscriber(id);
                entry.slot.detach();
            }
            Resource::Queryable(entry) => {
                fabric.remove_queryable(id);
                entry.slot.detach();
            }
            Resource::LivelinessToken => fabric.remove_token(id),
            Resource::LivelinessSubscriber(entry) => {
                fabric.remove_liveliness_subscriber(id);
                entry.slot.detach();
            }
            Resource::Publisher | Resource::Querier => {}
        }
    }
}

struct SessionState {
    closed: bool,
    next_expr_id: u16,
    keyexprs: HashMap<u16, Arc<Declaration>>,
    resources: HashMap<u64, Resource>,
}

/// Everything one `put`/`delete` carries besides key and payload.
pub(crate) struct Publication {
    pub(crate) kind: SampleKind,
    pub(crate) encoding: Encoding,
    pub(crate) qos: QoS,
    pub(crate) timestamp: Option<Timestamp>,
    pub(crate) attachment: Option<ZBytes>,
    pub(crate) destination: Locality,
}

/// Everything one query carries besides its selector.
pub(crate) struct QueryRequest {
    pub(crate) target: QueryTarget,
    pub(crate) consolidation: ConsolidationMode,
    pub(crate) timeout: Option<Duration>,
    pub(crate) content: QueryContent,
    pub(crate) destination: Locality,
}

impl From<GetOptions> for QueryRequest {
    fn from(options: GetOptions) -> Self {
        Self {
            target: options.target,
            consolidation: options.consolidation,
            timeout: options.timeout,
            content: QueryContent {
                payload: options.payload,
                encoding: options.encoding,
                attachment: options.attachment,
                qos: options.qos,
            },
            destination: Locality::Any,
        }
    }
}

pub(crate) struct SessionInner {
    zid: SessionId,
    config: Config,
    fabric: Arc<Fabric>,
    clock: Arc<Clock>,
    timestamping: bool,
    default_timeout: Duration,
    /// Mirrors `state.closed` for lock-free checks on hot paths.
    closed: Arc<AtomicBool>,
    state: RwLock<SessionState>,
    timer: DeadlineTimer,
    replier: Arc<Replier>,
    next_query_id: AtomicU64,
}

impl SessionInner {
    pub(crate) fn zid(&self) -> SessionId {
        self.zid
    }

    pub(crate) fn fabric(&self) -> &Arc<Fabric> {
        &self.fabric
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    /// Record a declaration. `install` runs under the session lock, so a
    /// concurrent `close` either sees the resource or rejects it.
    pub(crate) fn register<F: FnOnce()>(&self, id: u64, resource: Resource, install: F) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(Error::SessionClosed);
        }
        install();
        log::debug!("[Session] {} declared {} #{}", self.zid, resource.kind(), id);
        state.resources.insert(id, resource);
        Ok(())
    }

    pub(crate) fn undeclare_resource(&self, id: u64) -> Result<()> {
        let resource = self.state.write().resources.remove(&id);
        if let Some(resource) = resource {
            log::debug!("[Session] {} undeclared {} #{}", self.zid, resource.kind(), id);
            resource.teardown(&self.fabric, id);
        }
        Ok(())
    }

    pub(crate) fn publish(&self, key_expr: &KeyExpr, payload: ZBytes, publication: Publication) -> Result<()> {
        self.ensure_open()?;
        key_expr.check_usable(self.zid)?;

        let timestamp = publication
            .timestamp
            .or_else(|| self.timestamping.then(|| self.clock.now()));
        let sample = Sample::new(key_expr.clone(), payload)
            .with_kind(publication.kind)
            .with_encoding(publication.encoding)
            .with_timestamp(timestamp)
            .with_qos(publication.qos)
            .with_attachment(publication.attachment);

        let delivered = self
            .fabric
            .route_sample(&sample, self.zid, publication.destination);
        log::trace!(
            "[Session] {} {:?} '{}' delivered to {} subscriber(s)",
            self.zid,
            publication.kind,
            key_expr,
            delivered
        );
        Ok(())
    }

    /// Start a query: arm its deadline, then dispatch it to the selected
    /// queryables.
    pub(crate) fn query(
        &self,
        selector: Selector,
        callback: Callback<Reply>,
        request: QueryRequest,
    ) -> Result<()> {
        self.ensure_open()?;
        selector.key_expr().check_usable(self.zid)?;

        let (key_expr, parameters) = selector.into_parts();
        let selector = Selector::new(key_expr.undeclared(), parameters);
        let consolidation =
            Consolidation::resolve(request.consolidation, selector.has_time_range());
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let id = self.next_query_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(QueryState::new(
            id,
            consolidation,
            Instant::now() + timeout,
            callback,
        ));
        self.timer.schedule(Arc::clone(&state))?;

        let targets = self.fabric.route_query(
            selector.key_expr(),
            request.target,
            self.zid,
            request.destination,
        );
        log::debug!(
            "[Session] {} query #{} '{}' ({:?}, {:?}, {:?}) -> {} queryable(s)",
            self.zid,
            id,
            selector,
            request.target,
            consolidation,
            timeout,
            targets.len()
        );

        let mut dispatched = 0usize;
        for entry in targets {
            let Some(query) = Query::dispatch(
                selector.clone(),
                request.content.clone(),
                &state,
                Arc::clone(&entry.replier),
            ) else {
                break;
            };
            if entry.slot.deliver(query) {
                dispatched += 1;
            }
        }

        if dispatched == 0 {
            log::debug!(
                "[Session] query #{} reached no queryable, ends at its deadline",
                id
            );
        } else {
            state.replier_done();
        }
        Ok(())
    }

    pub(crate) fn next_query_id(&self) -> u64 {
        self.next_query_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn timer(&self) -> &DeadlineTimer {
        &self.timer
    }

    pub(crate) fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn close(&self) {
        let (resources, keyexprs) = {
            let mut state = self.state.write();
            if state.closed {
                return;
            }
            state.closed = true;
            self.closed.store(true, Ordering::Release);
            (
                std::mem::take(&mut state.resources),
                std::mem::take(&mut state.keyexprs),
            )
        };
        log::debug!(
            "[Session] {} closing ({} declaration(s), {} key expression(s))",
            self.zid,
            resources.len(),
            keyexprs.len()
        );

        let mut resources: Vec<(u64, Resource)> = resources.into_iter().collect();
        resources.sort_by_key(|(id, _)| *id);
        for (id, resource) in resources {
            resource.teardown(&self.fabric, id);
        }
        for declaration in keyexprs.values() {
            declaration.retire();
        }
        self.timer.shutdown(Termination::SessionClosed);
        self.fabric.leave(self.zid);
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.close();
    }
}

/// Back-reference from a declared object to its session.
///
/// Undeclares on drop; a session that is already gone has nothing left to
/// undeclare.
pub(crate) struct DeclarationHandle {
    id: u64,
    session: Weak<SessionInner>,
    undeclared: bool,
}

impl DeclarationHandle {
    pub(crate) fn new(id: u64, session: &Arc<SessionInner>) -> Self {
        Self {
            id,
            session: Arc::downgrade(session),
            undeclared: false,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// The owning session, if still open.
    pub(crate) fn session(&self) -> Result<Arc<SessionInner>> {
        if self.undeclared {
            return Err(Error::InvalidState(format!(
                "declaration #{} was undeclared",
                self.id
            )));
        }
        match self.session.upgrade() {
            Some(session) if !session.is_closed() => Ok(session),
            _ => Err(Error::SessionClosed),
        }
    }

    pub(crate) fn undeclare(&mut self) -> Result<()> {
        if self.undeclared {
            return Ok(());
        }
        self.undeclared = true;
        match self.session.upgrade() {
            Some(session) => session.undeclare_resource(self.id),
            None => Ok(()),
        }
    }
}

impl Drop for DeclarationHandle {
    fn drop(&mut self) {
        if let Err(e) = self.undeclare() {
            log::debug!("[Session] undeclare #{} on drop failed: {}", self.id, e);
        }
    }
}

/// Identity of a session and the peers it can reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    zid: SessionId,
    fabric: String,
    peers: Vec<SessionId>,
}

impl SessionInfo {
    pub fn zid(&self) -> SessionId {
        self.zid
    }

    /// Name of the fabric the session is attached to.
    pub fn fabric(&self) -> &str {
        &self.fabric
    }

    /// Other sessions on the same fabric, sorted.
    pub fn peers(&self) -> &[SessionId] {
        &self.peers
    }
}

/// An open session.
///
/// Cheap to clone; every clone refers to the same session. The session is
/// closed by [`Session::close`] or when the last clone is dropped.
///
/// # Example
///
/// ```
/// use keyroute::{Config, FifoChannel};
///
/// let session = keyroute::open(Config::default()).unwrap();
/// let subscriber = session.declare_subscriber("demo/**", FifoChannel::default()).unwrap();
/// session.put("demo/a/b", "hello").unwrap();
///
/// let sample = subscriber.try_recv().unwrap();
/// assert_eq!(sample.key_expr().as_str(), "demo/a/b");
/// session.close().unwrap();
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Open a session on the fabric named by `config`.
    pub fn open(config: Config) -> Result<Session> {
        let settings = config.settings()?;
        let zid = settings.id.unwrap_or_else(SessionId::generate);
        let fabric = fabric::fabric(&settings.fabric);
        if !fabric.join(zid) {
            return Err(Error::Config(format!(
                "session id {} is already in use on fabric '{}'",
                zid, settings.fabric
            )));
        }

        let closed = Arc::new(AtomicBool::new(false));
        let clock = Arc::new(Clock::new(zid));
        let replier = Arc::new(Replier {
            zid,
            closed: Arc::clone(&closed),
            clock: settings.timestamping.then(|| Arc::clone(&clock)),
        });
        let timer = DeadlineTimer::new(format!("keyroute-timer-{}", &zid.to_string()[..8]));

        log::debug!(
            "[Session] opened {} on fabric '{}' (timestamping={}, timeout={:?})",
            zid,
            settings.fabric,
            settings.timestamping,
            settings.queries_default_timeout
        );

        Ok(Session {
            inner: Arc::new(SessionInner {
                zid,
                config,
                fabric,
                clock,
                timestamping: settings.timestamping,
                default_timeout: settings.queries_default_timeout,
                closed,
                state: RwLock::new(SessionState {
                    closed: false,
                    next_expr_id: 1,
                    keyexprs: HashMap::new(),
                    resources: HashMap::new(),
                }),
                timer,
                replier,
                next_query_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn zid(&self) -> SessionId {
        self.inner.zid
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            zid: self.inner.zid,
            fabric: self.inner.fabric.name().to_string(),
            peers: self.inner.fabric.peers_of(self.inner.zid),
        }
    }

    /// Mint a timestamp from this session's clock.
    pub fn new_timestamp(&self) -> Timestamp {
        self.inner.clock.now()
    }

    /// Close the session. Idempotent.
    ///
    /// Every declaration is undeclared (subscriber sinks observe end of
    /// stream), declared key expressions become unusable, and pending
    /// queries end.
    pub fn close(&self) -> Result<()> {
        self.inner.close();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub(crate) fn inner(&self) -> &Arc<SessionInner> {
        &self.inner
    }

    // ------------------------------------------------------------------
    // Key expression declarations
    // ------------------------------------------------------------------

    /// Register `key_expr` with this session.
    ///
    /// The returned expression is bound to this session: using it with
    /// another session is a [`Error::DeclarationConflict`], and using it
    /// after [`Session::undeclare_keyexpr`] or close fails.
    pub fn declare_keyexpr<K>(&self, key_expr: K) -> Result<KeyExpr>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
    {
        let key_expr: KeyExpr = key_expr.try_into().map_err(Into::into)?;
        key_expr.check_usable(self.inner.zid)?;

        let mut state = self.inner.state.write();
        if state.closed {
            return Err(Error::SessionClosed);
        }
        let mut candidate = state.next_expr_id;
        let mut found = None;
        for _ in 0..u16::MAX {
            if !state.keyexprs.contains_key(&candidate) {
                found = Some(candidate);
                break;
            }
            candidate = candidate.checked_add(1).unwrap_or(1);
        }
        let expr_id = found.ok_or_else(|| {
            Error::InvalidState("every key expression id is in use".to_string())
        })?;
        state.next_expr_id = expr_id.checked_add(1).unwrap_or(1);

        let (declared, declaration) = key_expr.declared(self.inner.zid, expr_id);
        state.keyexprs.insert(expr_id, declaration);
        log::debug!(
            "[Session] {} declared key expression #{} '{}'",
            self.inner.zid,
            expr_id,
            declared
        );
        Ok(declared)
    }

    /// Undo [`Session::declare_keyexpr`].
    pub fn undeclare_keyexpr(&self, key_expr: KeyExpr) -> Result<()> {
        let declaration = key_expr.declaration().ok_or_else(|| {
            Error::DeclarationConflict(format!("'{}' is not a declared key expression", key_expr))
        })?;
        if declaration.session != self.inner.zid {
            return Err(Error::DeclarationConflict(format!(
                "'{}' is declared by session {}, not {}",
                key_expr, declaration.session, self.inner.zid
            )));
        }

        let mut state = self.inner.state.write();
        if state.closed {
            return Err(Error::SessionClosed);
        }
        match state.keyexprs.get(&declaration.expr_id) {
            Some(current) if Arc::ptr_eq(current, declaration) => {
                state.keyexprs.remove(&declaration.expr_id);
                declaration.retire();
                Ok(())
            }
            _ => Err(Error::DeclarationConflict(format!(
                "'{}' was already undeclared",
                key_expr
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Publication
    // ------------------------------------------------------------------

    pub fn put<K, P>(&self, key_expr: K, payload: P) -> Result<()>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
        P: Into<ZBytes>,
    {
        self.put_with(key_expr, payload, PutOptions::default())
    }

    pub fn put_with<K, P>(&self, key_expr: K, payload: P, options: PutOptions) -> Result<()>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
        P: Into<ZBytes>,
    {
        let key_expr = key_expr.try_into().map_err(Into::into)?;
        self.inner.publish(
            &key_expr,
            payload.into(),
            Publication {
                kind: SampleKind::Put,
                encoding: options.encoding,
                qos: options.qos,
                timestamp: options.timestamp,
                attachment: options.attachment,
                destination: options.allowed_destination,
            },
        )
    }

    pub fn delete<K>(&self, key_expr: K) -> Result<()>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
    {
        self.delete_with(key_expr, DeleteOptions::default())
    }

    pub fn delete_with<K>(&self, key_expr: K, options: DeleteOptions) -> Result<()>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
    {
        let key_expr = key_expr.try_into().map_err(Into::into)?;
        self.inner.publish(
            &key_expr,
            ZBytes::new(),
            Publication {
                kind: SampleKind::Delete,
                encoding: Encoding::default(),
                qos: options.qos,
                timestamp: options.timestamp,
                attachment: options.attachment,
                destination: options.allowed_destination,
            },
        )
    }

    pub fn declare_publisher<K>(&self, key_expr: K, options: PublisherOptions) -> Result<Publisher>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
    {
        let key_expr: KeyExpr = key_expr.try_into().map_err(Into::into)?;
        self.inner.ensure_open()?;
        key_expr.check_usable(self.inner.zid)?;

        let id = next_entry_id();
        self.inner.register(id, Resource::Publisher, || {})?;
        Ok(Publisher::new(
            key_expr,
            options,
            DeclarationHandle::new(id, &self.inner),
        ))
    }

    // ------------------------------------------------------------------
    // Subscription
    // ------------------------------------------------------------------

    pub fn declare_subscriber<K, H>(&self, key_expr: K, handler: H) -> Result<Subscriber<H::Handler>>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
        H: IntoHandler<Sample>,
    {
        self.declare_subscriber_with(key_expr, handler, SubscriberOptions::default())
    }

    pub fn declare_subscriber_with<K, H>(
        &self,
        key_expr: K,
        handler: H,
        options: SubscriberOptions,
    ) -> Result<Subscriber<H::Handler>>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
        H: IntoHandler<Sample>,
    {
        let key_expr: KeyExpr = key_expr.try_into().map_err(Into::into)?;
        self.inner.ensure_open()?;
        key_expr.check_usable(self.inner.zid)?;

        let (callback, handler) = handler.into_handler();
        let id = next_entry_id();
        let entry = Arc::new(SubscriberEntry {
            slot: DeliverySlot::new(id, callback),
            key_expr: key_expr.undeclared(),
            session: self.inner.zid,
            origin: options.allowed_origin,
        });
        let fabric = Arc::clone(&self.inner.fabric);
        let installed = Arc::clone(&entry);
        self.inner
            .register(id, Resource::Subscriber(entry), move || {
                fabric.add_subscriber(installed)
            })?;

        Ok(Subscriber::new(
            key_expr,
            handler,
            DeclarationHandle::new(id, &self.inner),
        ))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn declare_queryable<K, H>(&self, key_expr: K, handler: H) -> Result<Queryable<H::Handler>>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
        H: IntoHandler<Query>,
    {
        self.declare_queryable_with(key_expr, handler, QueryableOptions::default())
    }

    pub fn declare_queryable_with<K, H>(
        &self,
        key_expr: K,
        handler: H,
        options: QueryableOptions,
    ) -> Result<Queryable<H::Handler>>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
        H: IntoHandler<Query>,
    {
        let key_expr: KeyExpr = key_expr.try_into().map_err(Into::into)?;
        self.inner.ensure_open()?;
        key_expr.check_usable(self.inner.zid)?;

        let (callback, handler) = handler.into_handler();
        let id = next_entry_id();
        let entry = Arc::new(QueryableEntry {
            slot: DeliverySlot::new(id, callback),
            key_expr: key_expr.undeclared(),
            complete: options.complete,
            origin: options.allowed_origin,
            replier: Arc::clone(&self.inner.replier),
        });
        let fabric = Arc::clone(&self.inner.fabric);
        let installed = Arc::clone(&entry);
        self.inner
            .register(id, Resource::Queryable(entry), move || {
                fabric.add_queryable(installed)
            })?;

        Ok(Queryable::new(
            key_expr,
            options.complete,
            handler,
            DeclarationHandle::new(id, &self.inner),
        ))
    }

    pub fn declare_querier<K>(&self, key_expr: K, options: QuerierOptions) -> Result<Querier>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<Error>,
    {
        let key_expr: KeyExpr = key_expr.try_into().map_err(Into::into)?;
        self.inner.ensure_open()?;
        key_expr.check_usable(self.inner.zid)?;

        let id = next_entry_id();
        self.inner.register(id, Resource::Querier, || {})?;
        Ok(Querier::new(
            key_expr,
            options,
            DeclarationHandle::new(id, &self.inner),
        ))
    }

    /// Issue a query with default options.
    ///
    /// Replies flow into `handler`; its end of stream marks the end of the
    /// query (every replier done, or the timeout elapsed).
    pub fn get<S, H>(&self, selector: S, handler: H) -> Result<H::Handler>
    where
        S: TryInto<Selector>,
        S::Error: Into<Error>,
        H: IntoHandler<Reply>,
    {
        self.get_with(selector, handler, GetOptions::default())
    }

    pub fn get_with<S, H>(&self, selector: S, handler: H, options: GetOptions) -> Result<H::Handler>
    where
        S: TryInto<Selector>,
        S::Error: Into<Error>,
        H: IntoHandler<Reply>,
    {
        let selector: Selector = selector.try_into().map_err(Into::into)?;
        self.inner.ensure_open()?;
        selector.key_expr().check_usable(self.inner.zid)?;

        let (callback, handler) = handler.into_handler();
        self.inner.query(selector, callback, options.into())?;
        Ok(handler)
    }

    // ------------------------------------------------------------------
    // Liveliness
    // ------------------------------------------------------------------

    pub fn liveliness(&self) -> Liveliness<'_> {
        Liveliness::new(self)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("zid", &self.inner.zid)
            .field("fabric", &self.inner.fabric.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{CallbackDrop, FifoChannel};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn open_on(fabric: &str) -> Session {
        let mut config = Config::default();
        config
            .insert_json("fabric", &format!("\"{}\"", fabric))
            .unwrap();
        Session::open(config).unwrap()
    }

    fn unique_fabric(tag: &str) -> String {
        format!("session-test-{}-{}", tag, next_entry_id())
    }

    #[test]
    fn sessions_on_one_fabric_see_each_other() {
        let name = unique_fabric("info");
        let a = open_on(&name);
        let b = open_on(&name);
        assert_eq!(a.info().peers(), &[b.zid()]);
        assert_eq!(b.info().fabric(), name);

        b.close().unwrap();
        assert!(a.info().peers().is_empty());
    }

    #[test]
    fn duplicate_configured_id_is_rejected() {
        let name = unique_fabric("dup");
        let mut config = Config::default();
        config.insert_json("fabric", &format!("\"{}\"", name)).unwrap();
        config.insert_json("id", "\"a1b2\"").unwrap();

        let first = Session::open(config.clone()).unwrap();
        assert!(matches!(Session::open(config.clone()), Err(Error::Config(_))));
        first.close().unwrap();
        assert!(Session::open(config).is_ok());
    }

    #[test]
    fn keyexpr_declarations() {
        let name = unique_fabric("decl");
        let a = open_on(&name);
        let b = open_on(&name);

        let key = a.declare_keyexpr("demo/decl").unwrap();
        assert!(key.is_declared());
        assert_eq!(key, KeyExpr::try_from("demo/decl").unwrap());
        a.put(&key, "ok").unwrap();
        assert!(matches!(b.put(&key, "x"), Err(Error::DeclarationConflict(_))));
        assert!(matches!(
            b.undeclare_keyexpr(key.clone()),
            Err(Error::DeclarationConflict(_))
        ));

        a.undeclare_keyexpr(key.clone()).unwrap();
        assert!(matches!(
            a.undeclare_keyexpr(key.clone()),
            Err(Error::DeclarationConflict(_))
        ));
        assert!(a.put(&key, "gone").is_err());
        assert!(matches!(
            a.undeclare_keyexpr(KeyExpr::try_from("demo/decl").unwrap()),
            Err(Error::DeclarationConflict(_))
        ));
    }

    #[test]
    fn close_retires_declared_keyexprs() {
        let s = open_on(&unique_fabric("retire"));
        let key = s.declare_keyexpr("demo/k").unwrap();
        s.close().unwrap();
        assert!(matches!(key.check_usable(s.zid()), Err(Error::SessionClosed)));
        assert!(matches!(s.undeclare_keyexpr(key), Err(Error::SessionClosed)));
    }

    #[test]
    fn close_is_idempotent_and_rejects_operations() {
        let s = open_on(&unique_fabric("closed"));
        s.close().unwrap();
        s.close().unwrap();
        assert!(s.is_closed());

        assert!(matches!(s.put("a/b", "x"), Err(Error::SessionClosed)));
        assert!(matches!(s.delete("a/b"), Err(Error::SessionClosed)));
        assert!(matches!(
            s.get("a/b", |_: Reply| {}),
            Err(Error::SessionClosed)
        ));
        assert!(matches!(
            s.declare_subscriber("a/**", |_: Sample| {}),
            Err(Error::SessionClosed)
        ));
        assert!(matches!(
            s.declare_queryable("a/**", |_: Query| {}),
            Err(Error::SessionClosed)
        ));
        assert!(matches!(s.declare_keyexpr("a/b"), Err(Error::SessionClosed)));
    }

    #[test]
    fn close_ends_subscriber_streams() {
        let s = open_on(&unique_fabric("eos"));
        let sub = s
            .declare_subscriber("demo/**", FifoChannel::default())
            .unwrap();
        s.put("demo/x", "1").unwrap();
        s.close().unwrap();

        assert_eq!(sub.recv().unwrap().payload().try_to_string().unwrap(), "1");
        assert!(sub.recv().is_none());
    }

    #[test]
    fn dropping_last_clone_closes() {
        let name = unique_fabric("drop");
        let watcher = open_on(&name);
        let s = open_on(&name);
        let zid = s.zid();
        let copy = s.clone();
        drop(s);
        assert_eq!(watcher.info().peers(), &[zid]);
        drop(copy);
        assert!(watcher.info().peers().is_empty());
    }

    #[test]
    fn get_without_queryables_waits_for_deadline() {
        let s = open_on(&unique_fabric("deadline"));
        let ended = Arc::new(Mutex::new(None));
        let e = Arc::clone(&ended);
        let start = Instant::now();
        s.get_with(
            "nobody/home",
            CallbackDrop {
                callback: |_: Reply| {},
                drop: move || *e.lock() = Some(Instant::now()),
            },
            GetOptions::default().timeout(Duration::from_millis(50)),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while ended.lock().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let at = *ended.lock();
        let at = at.expect("query never ended");
        assert!(at.duration_since(start) >= Duration::from_millis(50));
    }

    #[test]
    fn close_ends_pending_queries() {
        let s = open_on(&unique_fabric("pending"));
        let ends = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&ends);
        s.get_with(
            "nobody/home",
            CallbackDrop {
                callback: |_: Reply| {},
                drop: move || {
                    e.fetch_add(1, Ordering::SeqCst);
                },
            },
            GetOptions::default().timeout(Duration::from_secs(60)),
        )
        .unwrap();
        assert_eq!(ends.load(Ordering::SeqCst), 0);
        s.close().unwrap();
        assert_eq!(ends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn completed_gets_release_their_deadlines() {
        let s = open_on(&unique_fabric("disarm"));
        let _q = s
            .declare_queryable("echo/k", |query: Query| {
                let _ = query.reply("echo/k", "v");
            })
            .unwrap();

        let ends = Arc::new(AtomicUsize::new(0));
        for _ in 0..1000 {
            let e = Arc::clone(&ends);
            s.get_with(
                "echo/k",
                CallbackDrop {
                    callback: |_: Reply| {},
                    drop: move || {
                        e.fetch_add(1, Ordering::SeqCst);
                    },
                },
                GetOptions::default().timeout(Duration::from_secs(3600)),
            )
            .unwrap();
        }
        assert_eq!(ends.load(Ordering::SeqCst), 1000);
        assert_eq!(s.inner().timer().pending(), 0);
    }

    #[test]
    fn timestamping_stamps_puts() {
        let mut config = Config::default();
        config
            .insert_json("fabric", &format!("\"{}\"", unique_fabric("ts")))
            .unwrap();
        config.insert_json("timestamping/enabled", "true").unwrap();
        let s = Session::open(config).unwrap();

        let sub = s.declare_subscriber("t/**", FifoChannel::default()).unwrap();
        s.put("t/a", "1").unwrap();
        s.put("t/a", "2").unwrap();
        let first = sub.try_recv().unwrap();
        let second = sub.try_recv().unwrap();
        assert_eq!(first.timestamp().unwrap().id(), s.zid());
        assert!(second.timestamp().unwrap() > first.timestamp().unwrap());
    }
}
