// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session identities and hybrid timestamps.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// 16-byte identity of a session, printed as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SessionId([u8; 16]);

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    /// Create from raw bytes
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Generate a process-unique identity.
    ///
    /// Built from wall-clock nanoseconds, a process counter and a hash of the
    /// calling thread id.
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);

        let tid_hash = {
            use std::hash::{Hash, Hasher};
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            std::thread::current().id().hash(&mut hasher);
            std::process::id().hash(&mut hasher);
            hasher.finish() as u32
        };

        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&nanos.to_le_bytes());
        bytes[8..12].copy_from_slice(&(seq as u32).to_le_bytes());
        bytes[12..16].copy_from_slice(&tid_hash.to_le_bytes());
        Self(bytes)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId(")?;
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "...)")
    }
}

impl FromStr for SessionId {
    type Err = Error;

    /// Parse 1 to 32 hex digits; shorter ids are zero-padded on the right.
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || s.len() > 32 || s.len() % 2 != 0 {
            return Err(Error::Config(format!(
                "session id '{}' must be an even number (2..=32) of hex digits",
                s
            )));
        }
        let mut bytes = [0u8; 16];
        for (i, pair) in s.as_bytes().chunks(2).enumerate() {
            let text = std::str::from_utf8(pair)
                .map_err(|_| Error::Config(format!("session id '{}' is not hex", s)))?;
            bytes[i] = u8::from_str_radix(text, 16)
                .map_err(|_| Error::Config(format!("session id '{}' is not hex", s)))?;
        }
        if bytes == [0u8; 16] {
            return Err(Error::Config("session id must not be all zeros".to_string()));
        }
        Ok(Self(bytes))
    }
}

/// Hybrid timestamp: wall-clock time plus the identity that minted it.
///
/// Ordered by time first, then by id, so two distinct sessions never produce
/// equal timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    time: u64,
    id: SessionId,
}

impl Timestamp {
    pub fn new(time: u64, id: SessionId) -> Self {
        Self { time, id }
    }

    /// Nanoseconds since the UNIX epoch.
    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Wall-clock time as a `SystemTime`.
    pub fn to_system_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.time)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.time, self.id)
    }
}

/// Strictly increasing timestamp source for one session.
#[derive(Debug)]
pub(crate) struct Clock {
    id: SessionId,
    last: AtomicU64,
}

impl Clock {
    pub(crate) fn new(id: SessionId) -> Self {
        Self {
            id,
            last: AtomicU64::new(0),
        }
    }

    pub(crate) fn now(&self) -> Timestamp {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Timestamp::new(next, self.id),
                Err(actual) => prev = actual,
            }
        }
    }
}
