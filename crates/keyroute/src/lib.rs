// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # keyroute - key-expression routing and query/reply correlation
//!
//! Publish/subscribe and query/reply over hierarchical key expressions, with
//! sessions that meet on an in-process fabric.
//!
//! ## Quick Start
//!
//! ```rust
//! use keyroute::{Config, FifoChannel, Query, Result};
//!
//! fn main() -> Result<()> {
//!     let session = keyroute::open(Config::default())?;
//!
//!     let _queryable = session.declare_queryable("demo/q", |query: Query| {
//!         let _ = query.reply("demo/q", "pong");
//!     })?;
//!
//!     let replies = session.get("demo/q", FifoChannel::default())?;
//!     for reply in replies.iter() {
//!         let sample = reply.result().expect("error reply");
//!         assert_eq!(sample.payload().try_to_string()?, "pong");
//!     }
//!     session.close()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                            Session                                  |
//! |   put/delete | subscribers | queryables | get/querier | liveliness  |
//! +---------------------------------------------------------------------+
//! |                     Query/Reply Correlation                         |
//! |   QueryState (phases, consolidation) | DeadlineTimer | Query fan-in |
//! +---------------------------------------------------------------------+
//! |                        In-process Fabric                            |
//! |   declaration index (dashmap) | delivery slots | liveliness tokens  |
//! +---------------------------------------------------------------------+
//! |                        Key Expressions                              |
//! |   canonical form | intersects / includes | selectors & parameters   |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`KeyExpr`] | Validated canonical key expression with set comparisons |
//! | [`Selector`] | Key expression plus `k=v` parameters |
//! | [`Session`] | Entry point, factory for every declaration |
//! | [`Sample`] | Published value with encoding, timestamp and QoS |
//! | [`Reply`] | One answer to a query, success or [`ReplyError`] |
//! | [`FifoChannel`] | Bounded channel handler for samples, queries, replies |

pub mod config;
pub mod error;
pub mod handlers;
pub mod keyexpr;
pub mod query;
pub mod sample;
pub mod selector;
pub mod session;
pub mod timestamp;

pub use config::Config;
pub use error::{Error, Result};
pub use handlers::{Callback, CallbackDrop, FifoChannel, FifoReceiver, Handler, HandlerSink, IntoHandler};
pub use keyexpr::{KeyExpr, Relation};
pub use query::{
    ConsolidationMode, GetOptions, Querier, QuerierGetOptions, QuerierOptions, Query, QueryTarget,
    Queryable, QueryableOptions, Reply, ReplyError, ReplyOptions,
};
pub use sample::{
    z_deserialize, z_serialize, CongestionControl, Encoding, Priority, QoS, Sample, SampleKind,
    ZBytes, ZDeserializer, ZSerializer,
};
pub use selector::{Parameters, Selector};
pub use session::{
    DeleteOptions, Liveliness, LivelinessSubscriberOptions, LivelinessToken, Locality, Publisher,
    PublisherOptions, PublisherPutOptions, PutOptions, Session, SessionInfo, Subscriber,
    SubscriberOptions,
};
pub use timestamp::{SessionId, Timestamp};

/// Open a session. Shorthand for [`Session::open`].
pub fn open(config: Config) -> Result<Session> {
    Session::open(config)
}
