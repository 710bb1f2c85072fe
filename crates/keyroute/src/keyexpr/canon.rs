// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Key expression validation and canonicalization.
//!
//! # Grammar
//!
//! ```text
//! keyexpr := chunk ( '/' chunk )*
//! chunk   := '*' | '**' | ( byte | '$*' )+        (non-empty)
//! byte    := any UTF-8 byte except '/', '*', '$', '#', '?'
//! ```
//!
//! # Canonical form
//!
//! | Rewrite        | Example                    |
//! |----------------|----------------------------|
//! | `**/**` -> `**`  | `a/**/**/b` -> `a/**/b`    |
//! | `**/*` -> `*/**` | `a/**/*` -> `a/*/**`       |
//! | `$*$*` -> `$*`   | `a$*$*b` -> `a$*b`         |
//! | `$*` -> `*`      | `a/$*/b` -> `a/*/b`        |
//!
//! Every valid expression has exactly one canonical spelling, so canonical
//! strings can be compared byte-for-byte.

use crate::error::{Error, Result};

/// Chunk separator.
pub(crate) const DELIMITER: char = '/';
/// Single-chunk wildcard.
pub(crate) const SINGLE_WILD: &str = "*";
/// Multi-chunk wildcard.
pub(crate) const DOUBLE_WILD: &str = "**";
/// Sub-chunk wildcard.
pub(crate) const SUB_WILD: &str = "$*";

fn invalid(expr: &str, reason: &str) -> Error {
    Error::InvalidKeyExpr(format!("'{}': {}", expr, reason))
}

/// Check that `expr` is a valid (not necessarily canonical) key expression.
pub fn validate(expr: &str) -> Result<()> {
    if expr.is_empty() {
        return Err(invalid(expr, "key expression is empty"));
    }
    if expr.starts_with(DELIMITER) {
        return Err(invalid(expr, "leading '/' is not allowed"));
    }
    if expr.ends_with(DELIMITER) {
        return Err(invalid(expr, "trailing '/' is not allowed"));
    }
    for chunk in expr.split(DELIMITER) {
        validate_chunk(expr, chunk)?;
    }
    Ok(())
}

fn validate_chunk(expr: &str, chunk: &str) -> Result<()> {
    if chunk.is_empty() {
        return Err(invalid(expr, "empty chunk ('//') is not allowed"));
    }
    if chunk == SINGLE_WILD || chunk == DOUBLE_WILD {
        return Ok(());
    }

    let bytes = chunk.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'#' | b'?' => {
                return Err(invalid(
                    expr,
                    "'#' and '?' are reserved and cannot appear in a key expression",
                ))
            }
            b'$' => {
                if bytes.get(i + 1) != Some(&b'*') {
                    return Err(invalid(expr, "'$' is only allowed as part of '$*'"));
                }
                i += 2;
                continue;
            }
            b'*' => {
                return Err(invalid(
                    expr,
                    "'*' inside a chunk must be written '$*' ('**' must stand alone)",
                ))
            }
            _ => {}
        }
        i += 1;
    }
    Ok(())
}

/// Collapse `$*$*` runs and turn a chunk made only of `$*` into `*`.
fn canonize_chunk(chunk: &str) -> String {
    let mut out = chunk.to_string();
    while out.contains("$*$*") {
        out = out.replace("$*$*", SUB_WILD);
    }
    if out == SUB_WILD {
        out = SINGLE_WILD.to_string();
    }
    out
}

/// Validate `raw` and return its canonical form.
///
/// This is the lenient entry point: any valid spelling is accepted and
/// rewritten. Use [`is_canonical`] to check without rewriting.
pub fn canonize(raw: &str) -> Result<String> {
    validate(raw)?;

    let mut chunks: Vec<String> = Vec::new();
    for chunk in raw.split(DELIMITER) {
        let chunk = canonize_chunk(chunk);
        let last_is_double = chunks.last().map(|c| c == DOUBLE_WILD).unwrap_or(false);

        if chunk == DOUBLE_WILD && last_is_double {
            continue;
        }
        if chunk == SINGLE_WILD && last_is_double {
            // `**/*` -> `*/**`: the `*` moves in front of the trailing `**`.
            let pos = chunks.len() - 1;
            chunks.insert(pos, chunk);
            continue;
        }
        chunks.push(chunk);
    }

    Ok(chunks.join("/"))
}

/// True if `expr` is valid and already in canonical form.
pub fn is_canonical(expr: &str) -> bool {
    matches!(canonize(expr), Ok(canon) if canon == expr)
}
