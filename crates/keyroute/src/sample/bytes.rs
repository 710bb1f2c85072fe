// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared immutable payload buffer.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Immutable, cheaply clonable byte payload.
///
/// One publication is fanned out to every matching subscriber, so the buffer
/// is reference counted instead of copied per delivery.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct ZBytes(Arc<[u8]>);

impl ZBytes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Decode as UTF-8.
    pub fn try_to_string(&self) -> Result<String> {
        std::str::from_utf8(&self.0)
            .map(str::to_string)
            .map_err(|e| Error::InvalidState(format!("payload is not UTF-8: {}", e)))
    }
}

impl fmt::Debug for ZBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.len() <= 64 => write!(f, "ZBytes({:?})", s),
            _ => write!(f, "ZBytes({} bytes)", self.0.len()),
        }
    }
}

impl AsRef<[u8]> for ZBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for ZBytes {
    fn from(v: Vec<u8>) -> Self {
        Self(Arc::from(v))
    }
}

impl From<&[u8]> for ZBytes {
    fn from(v: &[u8]) -> Self {
        Self(Arc::from(v))
    }
}

impl<const N: usize> From<&[u8; N]> for ZBytes {
    fn from(v: &[u8; N]) -> Self {
        Self(Arc::from(&v[..]))
    }
}

impl From<String> for ZBytes {
    fn from(s: String) -> Self {
        Self::from(s.into_bytes())
    }
}

impl From<&str> for ZBytes {
    fn from(s: &str) -> Self {
        Self::from(s.as_bytes())
    }
}

impl From<&String> for ZBytes {
    fn from(s: &String) -> Self {
        Self::from(s.as_bytes())
    }
}
