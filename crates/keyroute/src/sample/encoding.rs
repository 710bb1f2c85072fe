// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload encoding: a well-known numeric id plus an optional schema.
//!
//! The textual form is `mime` or `mime;schema`. A mime type outside the
//! well-known table is kept verbatim as the schema of [`Encoding::BYTES`].

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Well-known encodings, indexed by id.
const KNOWN: &[&str] = &[
    "keyroute/bytes",
    "keyroute/string",
    "keyroute/serialized",
    "application/octet-stream",
    "text/plain",
    "application/json",
    "text/json",
    "application/cdr",
    "application/cbor",
    "application/yaml",
    "text/yaml",
    "text/json5",
    "application/python-serialized-object",
    "application/protobuf",
    "application/java-serialized-object",
    "application/openmetrics-text",
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/bmp",
    "image/webp",
    "application/xml",
    "application/x-www-form-urlencoded",
    "text/html",
    "text/xml",
    "text/css",
    "text/javascript",
    "text/markdown",
    "text/csv",
    "application/sql",
    "application/coap-payload",
    "application/json-patch+json",
    "application/json-seq",
    "application/jsonpath",
    "application/jwt",
    "application/mp4",
    "application/soap+xml",
    "application/yang",
    "audio/aac",
    "audio/flac",
    "audio/mp4",
    "audio/ogg",
    "audio/vorbis",
    "video/h261",
    "video/h263",
    "video/h264",
    "video/h265",
    "video/h266",
    "video/mp4",
    "video/ogg",
    "video/raw",
    "video/vp8",
    "video/vp9",
];

const SCHEMA_SEP: char = ';';

/// Payload encoding.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Encoding {
    id: u16,
    schema: Option<Cow<'static, str>>,
}

macro_rules! well_known {
    ($($name:ident = $id:expr),* $(,)?) => {
        impl Encoding {
            $(
                #[doc = concat!("`", stringify!($id), "`: well-known encoding.")]
                pub const $name: Encoding = Encoding { id: $id, schema: None };
            )*
        }
    };
}

well_known! {
    BYTES = 0,
    STRING = 1,
    SERIALIZED = 2,
    APPLICATION_OCTET_STREAM = 3,
    TEXT_PLAIN = 4,
    APPLICATION_JSON = 5,
    TEXT_JSON = 6,
    APPLICATION_CDR = 7,
    APPLICATION_CBOR = 8,
    APPLICATION_YAML = 9,
    TEXT_YAML = 10,
    TEXT_JSON5 = 11,
    APPLICATION_PROTOBUF = 13,
    IMAGE_PNG = 16,
    IMAGE_JPEG = 17,
    APPLICATION_XML = 21,
    TEXT_HTML = 23,
    TEXT_XML = 24,
    TEXT_MARKDOWN = 27,
    TEXT_CSV = 28,
}

impl Encoding {
    /// Build from a raw id and optional schema.
    pub fn new(id: u16, schema: Option<String>) -> Self {
        Self {
            id,
            schema: schema.map(Cow::Owned),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Same encoding with `schema` attached (replacing any previous one).
    pub fn with_schema(&self, schema: impl Into<String>) -> Self {
        Self {
            id: self.id,
            schema: Some(Cow::Owned(schema.into())),
        }
    }

    /// Mime string of the id, if well-known.
    pub fn mime(&self) -> Option<&'static str> {
        KNOWN.get(self.id as usize).copied()
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.mime(), self.schema()) {
            (Some(mime), Some(schema)) => write!(f, "{}{}{}", mime, SCHEMA_SEP, schema),
            (Some(mime), None) => f.write_str(mime),
            (None, Some(schema)) => write!(f, "{}{}{}", self.id, SCHEMA_SEP, schema),
            (None, None) => write!(f, "{}", self.id),
        }
    }
}

impl fmt::Debug for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Encoding({})", self)
    }
}

impl From<&str> for Encoding {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            return Encoding::default();
        }
        let (mime, schema) = match s.split_once(SCHEMA_SEP) {
            Some((mime, schema)) => (mime, Some(schema)),
            None => (s, None),
        };
        match KNOWN.iter().position(|known| *known == mime) {
            Some(id) => Self::new(id as u16, schema.map(str::to_string)),
            // Unknown mime: keep the full text so Display gives it back.
            None => Self::new(0, Some(s.to_string())),
        }
    }
}

impl From<String> for Encoding {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Ok(Self::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_ids() {
        assert_eq!(Encoding::BYTES.id(), 0);
        assert_eq!(Encoding::TEXT_PLAIN.to_string(), "text/plain");
        assert_eq!(Encoding::TEXT_CSV.mime(), Some("text/csv"));
        assert_eq!(Encoding::default(), Encoding::BYTES);
    }

    #[test]
    fn schema_in_textual_form() {
        let e = Encoding::APPLICATION_JSON.with_schema("test_schema");
        assert_eq!(e.to_string(), "application/json;test_schema");
        assert_eq!(Encoding::from("application/json;test_schema"), e);
        assert_ne!(e, Encoding::APPLICATION_JSON);
    }

    #[test]
    fn unknown_mime_is_preserved() {
        let e = Encoding::from("custom/thing;v1");
        assert_eq!(e.id(), 0);
        assert_eq!(e.to_string(), "keyroute/bytes;custom/thing;v1");
        assert_eq!(e.schema(), Some("custom/thing;v1"));
    }
}
