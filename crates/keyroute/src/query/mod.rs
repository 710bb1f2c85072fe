// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Query/reply correlation.
//!
//! # Architecture
//!
//! ```text
//! Session::get()
//!   +-- QueryState (one per outstanding query)
//!   |     +-- phase: Pending -> Collecting -> Terminal
//!   |     +-- consolidation buffers (per key expression)
//!   |     +-- Callback<Reply> (dropped at Terminal = end of stream)
//!   +-- DeadlineTimer (per session, min-heap of deadlines)
//!   +-- Query (one per dispatched queryable, clonable)
//!         +-- last clone dropped -> replier done
//! ```
//!
//! A query ends when every replier it was dispatched to has dropped its
//! [`Query`], or when its deadline expires, whichever comes first. The end of
//! stream is always the last thing the reply sink observes.

pub(crate) mod querier;
pub(crate) mod queryable;
pub(crate) mod state;
pub(crate) mod timer;

pub use querier::{Querier, QuerierGetOptions, QuerierOptions};
pub use queryable::{Query, Queryable, QueryableOptions};

use std::fmt;
use std::time::Duration;

use crate::sample::{Encoding, QoS, Sample, ZBytes};
use crate::timestamp::{SessionId, Timestamp};

/// Which queryables a query is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueryTarget {
    /// The first complete queryable covering the whole key expression, or
    /// every intersecting queryable when none is complete.
    #[default]
    BestMatching,
    /// Every intersecting queryable.
    All,
    /// Every complete queryable covering the whole key expression.
    AllComplete,
}

/// How replies for the same key expression are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConsolidationMode {
    /// `Latest`, or `None` for time-range selectors.
    #[default]
    Auto,
    /// Forward every reply as it arrives.
    None,
    /// Forward a reply only if it is newer than the last one forwarded for its key.
    Monotonic,
    /// Keep only the newest reply per key, forwarded when the query ends.
    Latest,
}

/// Error payload sent by a replier.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyError {
    payload: ZBytes,
    encoding: Encoding,
}

impl ReplyError {
    pub fn new(payload: impl Into<ZBytes>, encoding: Encoding) -> Self {
        Self {
            payload: payload.into(),
            encoding,
        }
    }

    pub fn payload(&self) -> &ZBytes {
        &self.payload
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }
}

impl fmt::Display for ReplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.payload.try_to_string() {
            Ok(text) => write!(f, "reply error ({}): {}", self.encoding, text),
            Err(_) => write!(
                f,
                "reply error ({}): {} bytes",
                self.encoding,
                self.payload.len()
            ),
        }
    }
}

/// One answer to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    replier_id: SessionId,
    result: Result<Sample, ReplyError>,
}

impl Reply {
    pub(crate) fn new(replier_id: SessionId, result: Result<Sample, ReplyError>) -> Self {
        Self { replier_id, result }
    }

    /// Session that produced this reply.
    pub fn replier_id(&self) -> SessionId {
        self.replier_id
    }

    pub fn result(&self) -> Result<&Sample, &ReplyError> {
        self.result.as_ref()
    }

    pub fn into_result(self) -> Result<Sample, ReplyError> {
        self.result
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Options for `Session::get_with`.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub target: QueryTarget,
    pub consolidation: ConsolidationMode,
    /// `None` uses the session's `queries_default_timeout`.
    pub timeout: Option<Duration>,
    pub payload: Option<ZBytes>,
    pub encoding: Option<Encoding>,
    pub attachment: Option<ZBytes>,
    pub qos: QoS,
}

impl GetOptions {
    pub fn target(mut self, target: QueryTarget) -> Self {
        self.target = target;
        self
    }

    pub fn consolidation(mut self, mode: ConsolidationMode) -> Self {
        self.consolidation = mode;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn payload(mut self, payload: impl Into<ZBytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn attachment(mut self, attachment: impl Into<ZBytes>) -> Self {
        self.attachment = Some(attachment.into());
        self
    }
}

/// Options for `Query::reply_with` and `Query::reply_del_with`.
#[derive(Debug, Clone, Default)]
pub struct ReplyOptions {
    pub encoding: Encoding,
    /// Explicit timestamp; otherwise the replier stamps it when timestamping is on.
    pub timestamp: Option<Timestamp>,
    pub attachment: Option<ZBytes>,
    pub qos: QoS,
}

impl ReplyOptions {
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn attachment(mut self, attachment: impl Into<ZBytes>) -> Self {
        self.attachment = Some(attachment.into());
        self
    }
}
