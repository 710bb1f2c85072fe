// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Queriers: a key expression with fixed query settings.

use std::fmt;
use std::time::Duration;

use super::queryable::QueryContent;
use super::{ConsolidationMode, QueryTarget, Reply};
use crate::error::Result;
use crate::handlers::IntoHandler;
use crate::keyexpr::KeyExpr;
use crate::sample::{Encoding, QoS, ZBytes};
use crate::selector::{Parameters, Selector};
use crate::session::options::Locality;
use crate::session::{DeclarationHandle, QueryRequest};

/// Options for `Session::declare_querier`.
#[derive(Debug, Clone, Default)]
pub struct QuerierOptions {
    pub target: QueryTarget,
    pub consolidation: ConsolidationMode,
    /// `None` uses the session's `queries_default_timeout`.
    pub timeout: Option<Duration>,
    pub qos: QoS,
    pub allowed_destination: Locality,
}

impl QuerierOptions {
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

    pub fn allowed_destination(mut self, locality: Locality) -> Self {
        self.allowed_destination = locality;
        self
    }
}

/// Per-call options for `Querier::get_with`.
#[derive(Debug, Clone, Default)]
pub struct QuerierGetOptions {
    pub parameters: Option<Parameters>,
    pub payload: Option<ZBytes>,
    pub encoding: Option<Encoding>,
    pub attachment: Option<ZBytes>,
}

impl QuerierGetOptions {
    pub fn parameters(mut self, parameters: impl Into<Parameters>) -> Self {
        self.parameters = Some(parameters.into());
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

/// A declared querier. Dropping it undeclares it.
pub struct Querier {
    key_expr: KeyExpr,
    options: QuerierOptions,
    handle: DeclarationHandle,
}

impl Querier {
    pub(crate) fn new(key_expr: KeyExpr, options: QuerierOptions, handle: DeclarationHandle) -> Self {
        Self {
            key_expr,
            options,
            handle,
        }
    }

    pub fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    pub fn options(&self) -> &QuerierOptions {
        &self.options
    }

    pub fn get<H: IntoHandler<Reply>>(&self, handler: H) -> Result<H::Handler> {
        self.get_with(handler, QuerierGetOptions::default())
    }

    pub fn get_with<H: IntoHandler<Reply>>(
        &self,
        handler: H,
        options: QuerierGetOptions,
    ) -> Result<H::Handler> {
        let session = self.handle.session()?;
        let selector = Selector::new(self.key_expr.clone(), options.parameters);
        let (callback, handler) = handler.into_handler();
        session.query(
            selector,
            callback,
            QueryRequest {
                target: self.options.target,
                consolidation: self.options.consolidation,
                timeout: self.options.timeout,
                content: QueryContent {
                    payload: options.payload,
                    encoding: options.encoding,
                    attachment: options.attachment,
                    qos: self.options.qos,
                },
                destination: self.options.allowed_destination,
            },
        )?;
        Ok(handler)
    }

    pub fn undeclare(mut self) -> Result<()> {
        self.handle.undeclare()
    }
}

impl fmt::Debug for Querier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Querier")
            .field("key_expr", &self.key_expr)
            .field("target", &self.options.target)
            .field("consolidation", &self.options.consolidation)
            .field("id", &self.handle.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::Error;
    use crate::handlers::FifoChannel;
    use crate::query::Query;
    use crate::session::fabric::next_entry_id;
    use crate::session::Session;

    fn session() -> Session {
        let mut config = Config::default();
        let name = format!("querier-test-{}", next_entry_id());
        config.insert_json("fabric", &format!("\"{}\"", name)).unwrap();
        Session::open(config).unwrap()
    }

    #[test]
    fn querier_sends_parameters_per_call() {
        let s = session();
        let _q = s
            .declare_queryable("calc/add", |query: Query| {
                let params = query.parameters().cloned().unwrap_or_default();
                let sum: i64 = ["a", "b"]
                    .iter()
                    .filter_map(|k| params.get(k))
                    .filter_map(|v| v.parse::<i64>().ok())
                    .sum();
                query.reply("calc/add", sum.to_string()).unwrap();
            })
            .unwrap();

        let querier = s
            .declare_querier(
                "calc/add",
                QuerierOptions::default().timeout(Duration::from_secs(1)),
            )
            .unwrap();
        let replies = querier
            .get_with(
                FifoChannel::default(),
                QuerierGetOptions::default().parameters("a=2;b=40"),
            )
            .unwrap();
        let reply = replies.recv().unwrap();
        assert_eq!(reply.result().unwrap().payload().try_to_string().unwrap(), "42");
        assert!(replies.recv().is_none());
    }

    #[test]
    fn querier_on_closed_session() {
        let s = session();
        let querier = s.declare_querier("x/y", QuerierOptions::default()).unwrap();
        s.close().unwrap();
        assert!(matches!(
            querier.get(|_: Reply| {}),
            Err(Error::SessionClosed)
        ));
    }
}
