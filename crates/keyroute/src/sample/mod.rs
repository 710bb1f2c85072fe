// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Samples: one published value (or deletion) and its metadata.

mod bytes;
mod encoding;
mod qos;
mod serialization;

pub use bytes::ZBytes;
pub use encoding::Encoding;
pub use qos::{CongestionControl, Priority, QoS};
pub use serialization::{
    z_deserialize, z_serialize, SerError, SerResult, VarInt, ZDeserialize, ZDeserializer, ZSerialize,
    ZSerializer,
};

use crate::keyexpr::KeyExpr;
use crate::timestamp::Timestamp;

/// Whether a sample carries a value or announces its removal.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleKind {
    #[default]
    Put = 0,
    Delete = 1,
}

/// A value delivered to subscribers and carried in successful replies.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub(crate) key_expr: KeyExpr,
    pub(crate) payload: ZBytes,
    pub(crate) encoding: Encoding,
    pub(crate) kind: SampleKind,
    pub(crate) timestamp: Option<Timestamp>,
    pub(crate) qos: QoS,
    pub(crate) attachment: Option<ZBytes>,
}

impl Sample {
    /// Bare `Put` sample with default metadata.
    pub fn new(key_expr: KeyExpr, payload: impl Into<ZBytes>) -> Self {
        Self {
            key_expr: key_expr.undeclared(),
            payload: payload.into(),
            encoding: Encoding::default(),
            kind: SampleKind::Put,
            timestamp: None,
            qos: QoS::default(),
            attachment: None,
        }
    }

    pub fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    pub fn payload(&self) -> &ZBytes {
        &self.payload
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    pub fn kind(&self) -> SampleKind {
        self.kind
    }

    pub fn timestamp(&self) -> Option<&Timestamp> {
        self.timestamp.as_ref()
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

    pub fn express(&self) -> bool {
        self.qos.express
    }

    pub fn attachment(&self) -> Option<&ZBytes> {
        self.attachment.as_ref()
    }

    pub fn with_kind(mut self, kind: SampleKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Option<Timestamp>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_attachment(mut self, attachment: Option<ZBytes>) -> Self {
        self.attachment = attachment;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::SessionId;

    #[test]
    fn builder_sets_metadata() {
        let key = KeyExpr::try_from("demo/a").unwrap();
        let ts = Timestamp::new(42, SessionId::from_bytes([9; 16]));
        let sample = Sample::new(key.clone(), "v")
            .with_kind(SampleKind::Delete)
            .with_encoding(Encoding::TEXT_PLAIN)
            .with_timestamp(Some(ts))
            .with_attachment(Some(ZBytes::from("meta")));

        assert_eq!(sample.key_expr(), &key);
        assert_eq!(sample.kind(), SampleKind::Delete);
        assert_eq!(sample.encoding(), &Encoding::TEXT_PLAIN);
        assert_eq!(sample.timestamp(), Some(&ts));
        assert_eq!(sample.attachment().unwrap().try_to_string().unwrap(), "meta");
        assert_eq!(sample.priority(), Priority::Data);
    }
}
