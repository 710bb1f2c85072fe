// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by every keyroute operation.
//!
//! Construction and declaration failures are returned synchronously to the
//! caller. Delivery-time problems (a remote replier answering with an error,
//! a query running out of time) are never errors: they travel through the
//! reply channel as data or as end-of-stream.

use std::fmt;

/// Errors returned by keyroute operations.
///
/// # Example
///
/// ```rust
/// use keyroute::{Error, KeyExpr};
///
/// match KeyExpr::try_from("demo//bad") {
///     Err(Error::InvalidKeyExpr(msg)) => println!("rejected: {}", msg),
///     Err(e) => println!("other error: {}", e),
///     Ok(_) => unreachable!(),
/// }
/// ```
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Construction Errors
    // ========================================================================
    /// Malformed key expression (empty chunk, stray wildcard, forbidden char).
    InvalidKeyExpr(String),
    /// Malformed selector string.
    InvalidSelector(String),

    // ========================================================================
    // Session / Declaration Errors
    // ========================================================================
    /// The owning session, or the specific declaration, was already torn down.
    SessionClosed,
    /// Undeclaring something never declared, double undeclare, or using a
    /// declaration owned by another session.
    DeclarationConflict(String),
    /// Invalid state for the requested operation.
    InvalidState(String),

    // ========================================================================
    // Payload Errors
    // ========================================================================
    /// Typed payload could not be decoded.
    Serialization(String),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration document is malformed or holds an invalid value.
    Config(String),
    /// Configuration file not found at specified path.
    ConfigFileNotFound(String),
    /// I/O error with underlying cause.
    IoError(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidKeyExpr(msg) => write!(f, "Invalid key expression: {}", msg),
            Error::InvalidSelector(msg) => write!(f, "Invalid selector: {}", msg),
            Error::SessionClosed => write!(f, "Session or declaration is closed"),
            Error::DeclarationConflict(msg) => write!(f, "Declaration conflict: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::ConfigFileNotFound(path) => write!(f, "Config file not found: {}", path),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(e: std::convert::Infallible) -> Self {
        match e {}
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(feature = "config-loaders")]
impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Convenient alias for API results using the public `Error` type.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failure() {
        let err = Error::InvalidKeyExpr("'a//b': empty chunk".to_string());
        assert!(err.to_string().contains("empty chunk"));

        let err = Error::DeclarationConflict("never declared".to_string());
        assert!(err.to_string().contains("never declared"));

        assert!(Error::SessionClosed.to_string().contains("closed"));
    }

    #[test]
    fn io_error_is_exposed_as_source() {
        use std::error::Error as _;

        let err = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(err.source().is_some());
        assert!(Error::SessionClosed.source().is_none());
    }
}
