// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-operation options for publications and subscriptions.

use crate::sample::{CongestionControl, Encoding, Priority, QoS, ZBytes};
use crate::timestamp::{SessionId, Timestamp};

/// Restricts which sessions an operation reaches, relative to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Locality {
    /// Every session on the fabric.
    #[default]
    Any,
    /// Only the calling session.
    SessionLocal,
    /// Every session except the calling one.
    Remote,
}

impl Locality {
    pub(crate) fn allows(self, local: SessionId, peer: SessionId) -> bool {
        match self {
            Locality::Any => true,
            Locality::SessionLocal => local == peer,
            Locality::Remote => local != peer,
        }
    }
}

/// Options for `Session::put_with`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub encoding: Encoding,
    pub qos: QoS,
    /// Explicit timestamp; otherwise stamped by the session when timestamping is on.
    pub timestamp: Option<Timestamp>,
    pub attachment: Option<ZBytes>,
    pub allowed_destination: Locality,
}

impl PutOptions {
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.qos.priority = priority;
        self
    }

    pub fn congestion_control(mut self, cc: CongestionControl) -> Self {
        self.qos.congestion_control = cc;
        self
    }

    pub fn express(mut self, express: bool) -> Self {
        self.qos.express = express;
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

    pub fn allowed_destination(mut self, locality: Locality) -> Self {
        self.allowed_destination = locality;
        self
    }
}

/// Options for `Session::delete_with`.
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub qos: QoS,
    pub timestamp: Option<Timestamp>,
    pub attachment: Option<ZBytes>,
    pub allowed_destination: Locality,
}

impl DeleteOptions {
    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn attachment(mut self, attachment: impl Into<ZBytes>) -> Self {
        self.attachment = Some(attachment.into());
        self
    }
}

/// Options for `Session::declare_publisher`.
#[derive(Debug, Clone, Default)]
pub struct PublisherOptions {
    pub encoding: Encoding,
    pub qos: QoS,
    pub allowed_destination: Locality,
}

/// Per-call options for `Publisher::put_with`.
#[derive(Debug, Clone, Default)]
pub struct PublisherPutOptions {
    /// Overrides the publisher's encoding for this sample.
    pub encoding: Option<Encoding>,
    pub timestamp: Option<Timestamp>,
    pub attachment: Option<ZBytes>,
}

/// Options for `Session::declare_subscriber_with`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriberOptions {
    pub allowed_origin: Locality,
}

/// Options for `Liveliness::declare_subscriber`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LivelinessSubscriberOptions {
    /// Replay tokens already alive when the subscriber is declared.
    pub history: bool,
}
