// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Declared publishers and subscribers.

use std::fmt;
use std::ops::Deref;

use super::options::{Locality, PublisherOptions, PublisherPutOptions};
use super::{DeclarationHandle, Publication};
use crate::error::Result;
use crate::keyexpr::KeyExpr;
use crate::sample::{CongestionControl, Encoding, Priority, QoS, SampleKind, ZBytes};

/// A key expression with fixed publication settings.
///
/// Dropping it undeclares it.
pub struct Publisher {
    key_expr: KeyExpr,
    encoding: Encoding,
    qos: QoS,
    destination: Locality,
    handle: DeclarationHandle,
}

impl Publisher {
    pub(crate) fn new(key_expr: KeyExpr, options: PublisherOptions, handle: DeclarationHandle) -> Self {
        Self {
            key_expr,
            encoding: options.encoding,
            qos: options.qos,
            destination: options.allowed_destination,
            handle,
        }
    }

    pub fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn priority(&self) -> Priority {
        self.qos.priority
    }

    pub fn congestion_control(&self) -> CongestionControl {
        self.qos.congestion_control
    }

    pub fn put<P: Into<ZBytes>>(&self, payload: P) -> Result<()> {
        self.put_with(payload, PublisherPutOptions::default())
    }

    pub fn put_with<P: Into<ZBytes>>(&self, payload: P, options: PublisherPutOptions) -> Result<()> {
        let session = self.handle.session()?;
        session.publish(
            &self.key_expr,
            payload.into(),
            Publication {
                kind: SampleKind::Put,
                encoding: options.encoding.unwrap_or_else(|| self.encoding.clone()),
                qos: self.qos,
                timestamp: options.timestamp,
                attachment: options.attachment,
                destination: self.destination,
            },
        )
    }

    pub fn delete(&self) -> Result<()> {
        let session = self.handle.session()?;
        session.publish(
            &self.key_expr,
            ZBytes::new(),
            Publication {
                kind: SampleKind::Delete,
                encoding: Encoding::default(),
                qos: self.qos,
                timestamp: None,
                attachment: None,
                destination: self.destination,
            },
        )
    }

    pub fn undeclare(mut self) -> Result<()> {
        self.handle.undeclare()
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("key_expr", &self.key_expr)
            .field("encoding", &self.encoding)
            .field("qos", &self.qos)
            .field("id", &self.handle.id())
            .finish()
    }
}

/// A declared subscriber, holding whatever its handler handed back.
///
/// Dropping it undeclares it. Once [`Subscriber::undeclare`] returns the
/// callback is never invoked again and a channel handler reports end of
/// stream after its buffered samples.
pub struct Subscriber<H> {
    key_expr: KeyExpr,
    handler: H,
    handle: DeclarationHandle,
}

impl<H> Subscriber<H> {
    pub(crate) fn new(key_expr: KeyExpr, handler: H, handle: DeclarationHandle) -> Self {
        Self {
            key_expr,
            handler,
            handle,
        }
    }

    pub fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Detach synchronously. The handler is released first so a blocked
    /// channel delivery sees its consumer gone.
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

impl<H> Deref for Subscriber<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.handler
    }
}

impl<H> fmt::Debug for Subscriber<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("key_expr", &self.key_expr)
            .field("id", &self.handle.id())
            .finish()
    }
}
