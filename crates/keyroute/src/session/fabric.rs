// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process routing fabric shared by sessions.
//!
//! # Architecture
//!
//! ```text
//! REGISTRY (static global)
//! +-- fabrics: Mutex<HashMap<String, Weak<Fabric>>>
//!
//! Fabric (one per name, per process)
//! +-- subscribers:           DashMap<EntryId, Arc<SubscriberEntry>>
//! +-- queryables:            DashMap<EntryId, Arc<QueryableEntry>>
//! +-- tokens:                DashMap<EntryId, TokenEntry>
//! +-- liveliness_subscribers DashMap<EntryId, Arc<SubscriberEntry>>
//! +-- sessions:              DashSet<SessionId>
//! +-- [strong refs held by Session]
//! ```
//!
//! Routing snapshots the matching entries out of the maps before invoking
//! any callback, so callbacks are free to declare and undeclare.
//!
//! # Detach contract
//!
//! Each entry wraps its callback in a [`DeliverySlot`]. Deliveries hold a
//! shared lock on the slot; `detach` takes the exclusive lock to drop the
//! callback, so once `detach` returns no delivery is running or will start.
//! Before waiting, `detach` fires the callback's interrupt hook so a delivery
//! blocked on a full queue returns instead of holding the shared lock.
//! Detaching from inside the slot's own callback is deferred to the end of
//! that delivery.

use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use super::options::Locality;
use crate::handlers::{Callback, Interrupt};
use crate::keyexpr::KeyExpr;
use crate::query::queryable::Replier;
use crate::query::{Query, QueryTarget};
use crate::sample::{Sample, SampleKind};
use crate::timestamp::SessionId;

/// Default fabric name.
pub const DEFAULT_FABRIC: &str = "default";

/// Process-wide entry id allocator (ids are also session resource ids).
static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_entry_id() -> u64 {
    NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed)
}

thread_local! {
    /// Slots currently delivering on this thread (innermost last).
    static DELIVERING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

struct DeliveringGuard {
    id: u64,
}

impl DeliveringGuard {
    fn enter(id: u64) -> Self {
        DELIVERING.with(|d| d.borrow_mut().push(id));
        Self { id }
    }
}

impl Drop for DeliveringGuard {
    fn drop(&mut self) {
        DELIVERING.with(|d| {
            let mut d = d.borrow_mut();
            if let Some(pos) = d.iter().rposition(|id| *id == self.id) {
                d.remove(pos);
            }
        });
    }
}

fn delivering_on_this_thread(id: u64) -> bool {
    DELIVERING.with(|d| d.borrow().contains(&id))
}

/// A detachable callback.
pub(crate) struct DeliverySlot<T> {
    id: u64,
    callback: RwLock<Option<Callback<T>>>,
    interrupt: Option<Interrupt>,
    closed: AtomicBool,
}

impl<T> DeliverySlot<T> {
    pub(crate) fn new(id: u64, callback: Callback<T>) -> Self {
        Self {
            id,
            interrupt: callback.interrupter(),
            callback: RwLock::new(Some(callback)),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Deliver `item`; returns `false` (dropping it) once detached.
    pub(crate) fn deliver(&self, item: T) -> bool {
        if self.is_closed() {
            return false;
        }
        let delivered = {
            let _guard = DeliveringGuard::enter(self.id);
            let callback = self.callback.read_recursive();
            match callback.as_ref() {
                Some(cb) if !self.is_closed() => {
                    cb.call(item);
                    true
                }
                _ => false,
            }
        };
        if self.is_closed() && !delivering_on_this_thread(self.id) {
            self.release();
        }
        delivered
    }

    /// Stop deliveries. Idempotent.
    pub(crate) fn detach(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(interrupt) = &self.interrupt {
            interrupt();
        }
        if !delivering_on_this_thread(self.id) {
            self.release();
        }
    }

    fn release(&self) {
        let callback = self.callback.write().take();
        // End of stream fires here, with no lock held.
        drop(callback);
    }
}

pub(crate) struct SubscriberEntry {
    pub(crate) slot: DeliverySlot<Sample>,
    pub(crate) key_expr: KeyExpr,
    pub(crate) session: SessionId,
    pub(crate) origin: Locality,
}

pub(crate) struct QueryableEntry {
    pub(crate) slot: DeliverySlot<Query>,
    pub(crate) key_expr: KeyExpr,
    pub(crate) complete: bool,
    pub(crate) origin: Locality,
    pub(crate) replier: Arc<Replier>,
}

#[derive(Debug, Clone)]
pub(crate) struct TokenEntry {
    pub(crate) key_expr: KeyExpr,
    pub(crate) session: SessionId,
}

/// Routing domain shared by every session opened with the same fabric name.
pub(crate) struct Fabric {
    name: String,
    subscribers: DashMap<u64, Arc<SubscriberEntry>>,
    queryables: DashMap<u64, Arc<QueryableEntry>>,
    tokens: DashMap<u64, TokenEntry>,
    liveliness_subscribers: DashMap<u64, Arc<SubscriberEntry>>,
    /// Serializes token changes against liveliness subscriber registration.
    liveliness_lock: Mutex<()>,
    sessions: DashSet<SessionId>,
}

impl Fabric {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: DashMap::new(),
            queryables: DashMap::new(),
            tokens: DashMap::new(),
            liveliness_subscribers: DashMap::new(),
            liveliness_lock: Mutex::new(()),
            sessions: DashSet::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub(crate) fn join(&self, zid: SessionId) -> bool {
        log::debug!("[Fabric] '{}' session {} joined", self.name, zid);
        self.sessions.insert(zid)
    }

    pub(crate) fn leave(&self, zid: SessionId) {
        log::debug!("[Fabric] '{}' session {} left", self.name, zid);
        self.sessions.remove(&zid);
    }

    /// Sessions on this fabric other than `zid`.
    pub(crate) fn peers_of(&self, zid: SessionId) -> Vec<SessionId> {
        let mut peers: Vec<SessionId> = self
            .sessions
            .iter()
            .map(|id| *id)
            .filter(|id| *id != zid)
            .collect();
        peers.sort();
        peers
    }

    // ------------------------------------------------------------------
    // Publish / subscribe
    // ------------------------------------------------------------------

    pub(crate) fn add_subscriber(&self, entry: Arc<SubscriberEntry>) {
        log::debug!(
            "[Fabric] '{}' subscriber #{} on '{}'",
            self.name,
            entry.slot.id(),
            entry.key_expr
        );
        self.subscribers.insert(entry.slot.id(), entry);
    }

    pub(crate) fn remove_subscriber(&self, id: u64) -> Option<Arc<SubscriberEntry>> {
        self.subscribers.remove(&id).map(|(_, entry)| entry)
    }

    /// Deliver `sample` to every matching subscriber. Returns the delivery count.
    pub(crate) fn route_sample(
        &self,
        sample: &Sample,
        publisher: SessionId,
        destination: Locality,
    ) -> usize {
        let mut targets: Vec<Arc<SubscriberEntry>> = self
            .subscribers
            .iter()
            .filter(|e| {
                destination.allows(publisher, e.session)
                    && e.origin.allows(e.session, publisher)
                    && e.key_expr.intersects(sample.key_expr())
            })
            .map(|e| Arc::clone(e.value()))
            .collect();
        targets.sort_by_key(|e| e.slot.id());

        log::trace!(
            "[Fabric] '{}' {:?} on '{}' -> {} subscriber(s)",
            self.name,
            sample.kind(),
            sample.key_expr(),
            targets.len()
        );

        targets
            .iter()
            .filter(|e| e.slot.deliver(sample.clone()))
            .count()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub(crate) fn add_queryable(&self, entry: Arc<QueryableEntry>) {
        log::debug!(
            "[Fabric] '{}' queryable #{} on '{}' (complete={})",
            self.name,
            entry.slot.id(),
            entry.key_expr,
            entry.complete
        );
        self.queryables.insert(entry.slot.id(), entry);
    }

    pub(crate) fn remove_queryable(&self, id: u64) -> Option<Arc<QueryableEntry>> {
        self.queryables.remove(&id).map(|(_, entry)| entry)
    }

    /// Select the queryables a query on `key` is dispatched to.
    pub(crate) fn route_query(
        &self,
        key: &KeyExpr,
        target: QueryTarget,
        issuer: SessionId,
        destination: Locality,
    ) -> Vec<Arc<QueryableEntry>> {
        let mut candidates: Vec<Arc<QueryableEntry>> = self
            .queryables
            .iter()
            .filter(|e| {
                !e.slot.is_closed()
                    && destination.allows(issuer, e.replier.zid)
                    && e.origin.allows(e.replier.zid, issuer)
                    && e.key_expr.intersects(key)
            })
            .map(|e| Arc::clone(e.value()))
            .collect();
        candidates.sort_by_key(|e| e.slot.id());

        let covers = |e: &Arc<QueryableEntry>| e.complete && e.key_expr.includes(key);
        let selected: Vec<Arc<QueryableEntry>> = match target {
            QueryTarget::All => candidates,
            QueryTarget::AllComplete => candidates.into_iter().filter(covers).collect(),
            QueryTarget::BestMatching => match candidates.iter().find(|e| covers(*e)) {
                Some(best) => vec![Arc::clone(best)],
                None => candidates,
            },
        };

        log::trace!(
            "[Fabric] '{}' query on '{}' ({:?}) -> {} queryable(s)",
            self.name,
            key,
            target,
            selected.len()
        );
        selected
    }

    // ------------------------------------------------------------------
    // Liveliness
    // ------------------------------------------------------------------

    /// Announce a token and notify interested liveliness subscribers.
    pub(crate) fn add_token(&self, id: u64, token: TokenEntry) {
        let targets = {
            let _serial = self.liveliness_lock.lock();
            let targets = self.liveliness_targets(&token.key_expr);
            self.tokens.insert(id, token.clone());
            targets
        };
        log::debug!(
            "[Fabric] '{}' token #{} '{}' alive",
            self.name,
            id,
            token.key_expr
        );
        let sample = Sample::new(token.key_expr, Vec::new());
        for entry in targets {
            entry.slot.deliver(sample.clone());
        }
    }

    /// Withdraw a token and notify interested liveliness subscribers.
    pub(crate) fn remove_token(&self, id: u64) {
        let removed = {
            let _serial = self.liveliness_lock.lock();
            self.tokens
                .remove(&id)
                .map(|(_, token)| (self.liveliness_targets(&token.key_expr), token))
        };
        if let Some((targets, token)) = removed {
            log::debug!(
                "[Fabric] '{}' token #{} '{}' dropped",
                self.name,
                id,
                token.key_expr
            );
            let sample = Sample::new(token.key_expr, Vec::new()).with_kind(SampleKind::Delete);
            for entry in targets {
                entry.slot.deliver(sample.clone());
            }
        }
    }

    fn liveliness_targets(&self, key: &KeyExpr) -> Vec<Arc<SubscriberEntry>> {
        let mut targets: Vec<Arc<SubscriberEntry>> = self
            .liveliness_subscribers
            .iter()
            .filter(|e| e.key_expr.intersects(key))
            .map(|e| Arc::clone(e.value()))
            .collect();
        targets.sort_by_key(|e| e.slot.id());
        targets
    }

    /// Register a liveliness subscriber; returns the alive tokens to replay
    /// when `history` is set.
    pub(crate) fn add_liveliness_subscriber(
        &self,
        entry: Arc<SubscriberEntry>,
        history: bool,
    ) -> Vec<TokenEntry> {
        let _serial = self.liveliness_lock.lock();
        let replay = if history {
            self.alive_tokens(&entry.key_expr)
        } else {
            Vec::new()
        };
        self.liveliness_subscribers.insert(entry.slot.id(), entry);
        replay
    }

    pub(crate) fn remove_liveliness_subscriber(&self, id: u64) -> Option<Arc<SubscriberEntry>> {
        self.liveliness_subscribers.remove(&id).map(|(_, e)| e)
    }

    /// Alive tokens intersecting `key`, in declaration order.
    pub(crate) fn alive_tokens(&self, key: &KeyExpr) -> Vec<TokenEntry> {
        let mut alive: Vec<(u64, TokenEntry)> = self
            .tokens
            .iter()
            .filter(|t| t.key_expr.intersects(key))
            .map(|t| (*t.key(), t.value().clone()))
            .collect();
        alive.sort_by_key(|(id, _)| *id);
        alive.into_iter().map(|(_, t)| t).collect()
    }
}

impl Drop for Fabric {
    fn drop(&mut self) {
        log::debug!("[Fabric] '{}' released", self.name);
    }
}

impl std::fmt::Debug for Fabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fabric")
            .field("name", &self.name)
            .field("sessions", &self.sessions.len())
            .field("subscribers", &self.subscribers.len())
            .field("queryables", &self.queryables.len())
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

static REGISTRY: OnceLock<Mutex<HashMap<String, Weak<Fabric>>>> = OnceLock::new();

/// Get the fabric named `name`, creating it if no session currently holds it.
pub(crate) fn fabric(name: &str) -> Arc<Fabric> {
    let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
    let mut fabrics = registry.lock();
    fabrics.retain(|_, weak| weak.strong_count() > 0);

    if let Some(existing) = fabrics.get(name).and_then(Weak::upgrade) {
        return existing;
    }
    log::debug!("[Fabric] creating '{}'", name);
    let created = Arc::new(Fabric::new(name));
    fabrics.insert(name.to_string(), Arc::downgrade(&created));
    created
}
