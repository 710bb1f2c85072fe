// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed payload serialization.
//!
//! A compact, self-delimiting binary layout for plain data:
//!
//! | Type | Layout |
//! |------|--------|
//! | `bool` | one byte, `0` or `1` |
//! | `u8`..`u64`, `i8`..`i64`, `f32`, `f64` | fixed width, little-endian |
//! | `String` / `str` | LEB128 byte length, UTF-8 bytes |
//! | `Vec<T>` / `[T]` | LEB128 element count, elements |
//! | `HashMap` / `BTreeMap` | LEB128 entry count, key then value per entry |
//! | tuples | fields in order, no header |
//!
//! `Vec<u8>` therefore encodes as a length-prefixed byte string. Lists and
//! maps nest freely.
//!
//! ```rust
//! use keyroute::sample::{z_deserialize, z_serialize};
//! use std::collections::HashMap;
//!
//! let input: HashMap<String, Vec<i32>> =
//!     HashMap::from([("numbers".to_string(), vec![1, 2, 3, 4, 5])]);
//! let payload = z_serialize(&input);
//! let output: HashMap<String, Vec<i32>> = z_deserialize(&payload).unwrap();
//! assert_eq!(input, output);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hash};

use super::ZBytes;
use crate::error::Error;

/// Failure while decoding a typed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerError {
    /// The payload ended before the value did.
    UnexpectedEnd { offset: usize, needed: usize },
    /// Bytes present but not a valid encoding of the requested type.
    InvalidData { offset: usize, reason: String },
    /// The value decoded but bytes were left over.
    TrailingBytes { offset: usize, remaining: usize },
}

impl fmt::Display for SerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerError::UnexpectedEnd { offset, needed } => {
                write!(f, "unexpected end of payload at offset {} ({} more byte(s) needed)", offset, needed)
            }
            SerError::InvalidData { offset, reason } => {
                write!(f, "invalid data at offset {}: {}", offset, reason)
            }
            SerError::TrailingBytes { offset, remaining } => {
                write!(f, "{} trailing byte(s) at offset {}", remaining, offset)
            }
        }
    }
}

impl std::error::Error for SerError {}

impl From<SerError> for Error {
    fn from(e: SerError) -> Self {
        Error::Serialization(e.to_string())
    }
}

pub type SerResult<T> = core::result::Result<T, SerError>;

/// A value that can be written into a [`ZSerializer`].
pub trait ZSerialize {
    fn serialize(&self, out: &mut ZSerializer);
}

/// A value that can be read back from a [`ZDeserializer`].
pub trait ZDeserialize: Sized {
    fn deserialize(input: &mut ZDeserializer<'_>) -> SerResult<Self>;
}

/// Length or count prefix, LEB128-encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarInt(pub usize);

// ============================================================================
// Writer
// ============================================================================

/// Accumulates serialized values into one payload.
#[derive(Debug, Default)]
pub struct ZSerializer {
    buffer: Vec<u8>,
}

impl ZSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value`. Several values may be written back to back.
    pub fn serialize<T: ZSerialize + ?Sized>(&mut self, value: &T) {
        value.serialize(self);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn write_varint(&mut self, value: usize) {
        let mut v = value as u64;
        while v >= 0x80 {
            self.buffer.push((v as u8) | 0x80);
            v >>= 7;
        }
        self.buffer.push(v as u8);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn finish(self) -> ZBytes {
        ZBytes::from(self.buffer)
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Bounds-checked reader over a payload.
#[derive(Debug)]
pub struct ZDeserializer<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> ZDeserializer<'a> {
    pub fn new(payload: &'a ZBytes) -> Self {
        Self::from_slice(payload.as_slice())
    }

    pub fn from_slice(buffer: &'a [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    /// Read the next value.
    pub fn deserialize<T: ZDeserialize>(&mut self) -> SerResult<T> {
        T::deserialize(self)
    }

    pub fn read_bytes(&mut self, len: usize) -> SerResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(SerError::UnexpectedEnd {
                offset: self.offset,
                needed: len - self.remaining(),
            });
        }
        let slice = &self.buffer[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    pub fn read_varint(&mut self) -> SerResult<usize> {
        let start = self.offset;
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_bytes(1)?[0];
            if shift == 63 && byte > 1 {
                return Err(SerError::InvalidData {
                    offset: start,
                    reason: "varint overflows 64 bits".into(),
                });
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift > 63 {
                return Err(SerError::InvalidData {
                    offset: start,
                    reason: "varint longer than 10 bytes".into(),
                });
            }
        }
        usize::try_from(value).map_err(|_| SerError::InvalidData {
            offset: start,
            reason: format!("length {} does not fit in usize", value),
        })
    }

    /// Read a count prefix, rejecting counts the payload cannot hold
    /// (every element takes at least one byte).
    fn read_count(&mut self) -> SerResult<usize> {
        let count = self.read_varint()?;
        if count > self.remaining() {
            return Err(SerError::UnexpectedEnd {
                offset: self.offset,
                needed: count - self.remaining(),
            });
        }
        Ok(count)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.offset)
    }

    /// Whether the whole payload was consumed.
    pub fn done(&self) -> bool {
        self.remaining() == 0
    }
}

/// Serialize one value into a fresh payload.
pub fn z_serialize<T: ZSerialize + ?Sized>(value: &T) -> ZBytes {
    let mut out = ZSerializer::new();
    out.serialize(value);
    out.finish()
}

/// Deserialize a payload holding exactly one `T`.
pub fn z_deserialize<T: ZDeserialize>(payload: &ZBytes) -> SerResult<T> {
    let mut input = ZDeserializer::new(payload);
    let value = input.deserialize()?;
    if !input.done() {
        return Err(SerError::TrailingBytes {
            offset: input.offset(),
            remaining: input.remaining(),
        });
    }
    Ok(value)
}

impl ZBytes {
    /// Shorthand for [`z_deserialize`].
    pub fn deserialize<T: ZDeserialize>(&self) -> SerResult<T> {
        z_deserialize(self)
    }
}

// ============================================================================
// Primitive impls
// ============================================================================

macro_rules! impl_le {
    ($($type:ty),*) => {$(
        impl ZSerialize for $type {
            fn serialize(&self, out: &mut ZSerializer) {
                out.write_bytes(&self.to_le_bytes());
            }
        }

        impl ZDeserialize for $type {
            fn deserialize(input: &mut ZDeserializer<'_>) -> SerResult<Self> {
                let mut bytes = [0u8; std::mem::size_of::<$type>()];
                let len = bytes.len();
                bytes.copy_from_slice(input.read_bytes(len)?);
                Ok(<$type>::from_le_bytes(bytes))
            }
        }
    )*};
}

impl_le!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl ZSerialize for bool {
    fn serialize(&self, out: &mut ZSerializer) {
        out.write_bytes(&[u8::from(*self)]);
    }
}

impl ZDeserialize for bool {
    fn deserialize(input: &mut ZDeserializer<'_>) -> SerResult<Self> {
        let offset = input.offset();
        match input.read_bytes(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(SerError::InvalidData {
                offset,
                reason: format!("{:#04x} is not a bool", other),
            }),
        }
    }
}

impl ZSerialize for VarInt {
    fn serialize(&self, out: &mut ZSerializer) {
        out.write_varint(self.0);
    }
}

impl ZDeserialize for VarInt {
    fn deserialize(input: &mut ZDeserializer<'_>) -> SerResult<Self> {
        input.read_varint().map(VarInt)
    }
}

impl ZSerialize for str {
    fn serialize(&self, out: &mut ZSerializer) {
        out.write_varint(self.len());
        out.write_bytes(self.as_bytes());
    }
}

impl ZSerialize for String {
    fn serialize(&self, out: &mut ZSerializer) {
        self.as_str().serialize(out);
    }
}

impl ZDeserialize for String {
    fn deserialize(input: &mut ZDeserializer<'_>) -> SerResult<Self> {
        let len = input.read_varint()?;
        let offset = input.offset();
        let bytes = input.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| SerError::InvalidData {
            offset,
            reason: e.to_string(),
        })
    }
}

impl<T: ZSerialize + ?Sized> ZSerialize for &T {
    fn serialize(&self, out: &mut ZSerializer) {
        (**self).serialize(out);
    }
}

// ============================================================================
// Collections
// ============================================================================

impl<T: ZSerialize> ZSerialize for [T] {
    fn serialize(&self, out: &mut ZSerializer) {
        out.write_varint(self.len());
        for item in self {
            item.serialize(out);
        }
    }
}

impl<T: ZSerialize> ZSerialize for Vec<T> {
    fn serialize(&self, out: &mut ZSerializer) {
        self.as_slice().serialize(out);
    }
}

impl<T: ZDeserialize> ZDeserialize for Vec<T> {
    fn deserialize(input: &mut ZDeserializer<'_>) -> SerResult<Self> {
        let count = input.read_count()?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(input.deserialize()?);
        }
        Ok(items)
    }
}

fn serialize_entries<'a, K, V, I>(len: usize, entries: I, out: &mut ZSerializer)
where
    K: ZSerialize + 'a,
    V: ZSerialize + 'a,
    I: Iterator<Item = (&'a K, &'a V)>,
{
    out.write_varint(len);
    for (key, value) in entries {
        key.serialize(out);
        value.serialize(out);
    }
}

impl<K: ZSerialize, V: ZSerialize, S> ZSerialize for HashMap<K, V, S> {
    fn serialize(&self, out: &mut ZSerializer) {
        serialize_entries(self.len(), self.iter(), out);
    }
}

impl<K, V, S> ZDeserialize for HashMap<K, V, S>
where
    K: ZDeserialize + Eq + Hash,
    V: ZDeserialize,
    S: BuildHasher + Default,
{
    fn deserialize(input: &mut ZDeserializer<'_>) -> SerResult<Self> {
        let count = input.read_count()?;
        let mut map = HashMap::with_capacity_and_hasher(count, S::default());
        for _ in 0..count {
            let key = input.deserialize()?;
            let value = input.deserialize()?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<K: ZSerialize, V: ZSerialize> ZSerialize for BTreeMap<K, V> {
    fn serialize(&self, out: &mut ZSerializer) {
        serialize_entries(self.len(), self.iter(), out);
    }
}

impl<K: ZDeserialize + Ord, V: ZDeserialize> ZDeserialize for BTreeMap<K, V> {
    fn deserialize(input: &mut ZDeserializer<'_>) -> SerResult<Self> {
        let count = input.read_count()?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = input.deserialize()?;
            let value = input.deserialize()?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

macro_rules! impl_tuple {
    ($($name:ident),+) => {
        impl<$($name: ZSerialize),+> ZSerialize for ($($name,)+) {
            #[allow(non_snake_case)]
            fn serialize(&self, out: &mut ZSerializer) {
                let ($($name,)+) = self;
                $($name.serialize(out);)+
            }
        }

        impl<$($name: ZDeserialize),+> ZDeserialize for ($($name,)+) {
            fn deserialize(input: &mut ZDeserializer<'_>) -> SerResult<Self> {
                Ok(($(input.deserialize::<$name>()?,)+))
            }
        }
    };
}

impl_tuple!(A, B);
impl_tuple!(A, B, C);
impl_tuple!(A, B, C, D);
