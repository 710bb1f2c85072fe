// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Set operations on key expressions (intersection and inclusion).
//!
//! Both operations run a dynamic program over chunk suffixes so that `**`
//! backtracking never goes exponential:
//!
//! ```text
//! ok[i][j] = "chunks a[i..] and b[j..] satisfy the relation"
//! ok[n][m] = true
//! ```
//!
//! Inside a chunk, `$*` fragments are handled by the same technique at byte
//! granularity. Worst case is O(n*m) chunk comparisons, each O(p*q) bytes.
//!
//! Inputs are assumed valid (see [`super::canon::validate`]); these functions
//! are total and never fail.

use super::canon::{DELIMITER, DOUBLE_WILD, SINGLE_WILD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    /// `$*` (or a whole `*` chunk): any run of bytes.
    Wild,
    Byte(u8),
}

fn tokenize(chunk: &str) -> Vec<Token> {
    if chunk == SINGLE_WILD {
        return vec![Token::Wild];
    }
    let bytes = chunk.as_bytes();
    let mut tokens = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'*') {
            tokens.push(Token::Wild);
            i += 2;
        } else {
            tokens.push(Token::Byte(bytes[i]));
            i += 1;
        }
    }
    tokens
}

/// Flattened `(n+1) x (m+1)` boolean table.
struct Table {
    cols: usize,
    cells: Vec<bool>,
}

impl Table {
    fn new(rows: usize, cols: usize) -> Self {
        Self {
            cols: cols + 1,
            cells: vec![false; (rows + 1) * (cols + 1)],
        }
    }

    #[inline]
    fn get(&self, i: usize, j: usize) -> bool {
        self.cells[i * self.cols + j]
    }

    #[inline]
    fn set(&mut self, i: usize, j: usize, value: bool) {
        self.cells[i * self.cols + j] = value;
    }
}

/// Does some byte string match both glob chunks?
fn glob_intersects(a: &[Token], b: &[Token]) -> bool {
    let (n, m) = (a.len(), b.len());
    let mut t = Table::new(n, m);
    t.set(n, m, true);

    for i in (0..=n).rev() {
        for j in (0..=m).rev() {
            if i == n && j == m {
                continue;
            }
            let value = match (a.get(i), b.get(j)) {
                (Some(Token::Wild), _) => t.get(i + 1, j) || (j < m && t.get(i, j + 1)),
                (_, Some(Token::Wild)) => t.get(i, j + 1) || (i < n && t.get(i + 1, j)),
                (Some(Token::Byte(x)), Some(Token::Byte(y))) => x == y && t.get(i + 1, j + 1),
                _ => false,
            };
            t.set(i, j, value);
        }
    }
    t.get(0, 0)
}

/// Is every byte string matched by `b` also matched by `a`?
///
/// A wildcard in `a` may absorb any token of `b`, wildcards included; a
/// wildcard in `b` can only be absorbed by one in `a`. This never reports an
/// inclusion that does not hold.
fn glob_includes(a: &[Token], b: &[Token]) -> bool {
    let (n, m) = (a.len(), b.len());
    let mut t = Table::new(n, m);
    t.set(n, m, true);

    for i in (0..=n).rev() {
        for j in (0..=m).rev() {
            if i == n && j == m {
                continue;
            }
            let value = match (a.get(i), b.get(j)) {
                (Some(Token::Wild), _) => t.get(i + 1, j) || (j < m && t.get(i, j + 1)),
                (_, Some(Token::Wild)) => false,
                (Some(Token::Byte(x)), Some(Token::Byte(y))) => x == y && t.get(i + 1, j + 1),
                _ => false,
            };
            t.set(i, j, value);
        }
    }
    t.get(0, 0)
}

fn has_sub_wild(chunk: &str) -> bool {
    chunk.contains('$')
}

/// Single-chunk intersection (neither side is `**`).
pub(crate) fn chunk_intersects(a: &str, b: &str) -> bool {
    if a == b || a == SINGLE_WILD || b == SINGLE_WILD {
        return true;
    }
    if !has_sub_wild(a) && !has_sub_wild(b) {
        return false;
    }
    glob_intersects(&tokenize(a), &tokenize(b))
}

/// Single-chunk inclusion (neither side is `**`).
pub(crate) fn chunk_includes(a: &str, b: &str) -> bool {
    if a == b || a == SINGLE_WILD {
        return true;
    }
    if b == SINGLE_WILD || !has_sub_wild(a) {
        return false;
    }
    glob_includes(&tokenize(a), &tokenize(b))
}

/// True iff at least one concrete key is matched by both `a` and `b`.
pub(crate) fn intersects(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let ca: Vec<&str> = a.split(DELIMITER).collect();
    let cb: Vec<&str> = b.split(DELIMITER).collect();
    let (n, m) = (ca.len(), cb.len());
    let mut t = Table::new(n, m);
    t.set(n, m, true);

    for i in (0..=n).rev() {
        for j in (0..=m).rev() {
            if i == n && j == m {
                continue;
            }
            let value = match (ca.get(i).copied(), cb.get(j).copied()) {
                // `**` binds zero chunks, or swallows one more chunk of the other side.
                (Some(DOUBLE_WILD), _) => t.get(i + 1, j) || (j < m && t.get(i, j + 1)),
                (_, Some(DOUBLE_WILD)) => t.get(i, j + 1) || (i < n && t.get(i + 1, j)),
                (Some(x), Some(y)) => t.get(i + 1, j + 1) && chunk_intersects(x, y),
                _ => false,
            };
            t.set(i, j, value);
        }
    }
    t.get(0, 0)
}

/// True iff every concrete key matched by `b` is matched by `a`.
pub(crate) fn includes(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let ca: Vec<&str> = a.split(DELIMITER).collect();
    let cb: Vec<&str> = b.split(DELIMITER).collect();
    let (n, m) = (ca.len(), cb.len());
    let mut t = Table::new(n, m);
    t.set(n, m, true);

    for i in (0..=n).rev() {
        for j in (0..=m).rev() {
            if i == n && j == m {
                continue;
            }
            let value = match (ca.get(i).copied(), cb.get(j).copied()) {
                (Some(DOUBLE_WILD), _) => t.get(i + 1, j) || (j < m && t.get(i, j + 1)),
                (_, Some(DOUBLE_WILD)) => false,
                (Some(x), Some(y)) => t.get(i + 1, j + 1) && chunk_includes(x, y),
                _ => false,
            };
            t.set(i, j, value);
        }
    }
    t.get(0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_wildcard_spans_exactly_one_chunk() {
        assert!(intersects("a/*/c", "a/b/c"));
        assert!(!intersects("a/*/c", "a/x/y/c"));
        assert!(!intersects("a/*", "a"));
    }

    #[test]
    fn double_wildcard_spans_zero_or_more_chunks() {
        assert!(intersects("a/**", "a"));
        assert!(intersects("a/**", "a/b/c/d"));
        assert!(intersects("**", "x/y"));
        assert!(intersects("a/**/d", "a/d"));
        assert!(intersects("a/**/d", "a/b/c/d"));
        assert!(!intersects("a/**/d", "a/b/c/e"));
    }

    #[test]
    fn double_wildcards_on_both_sides() {
        assert!(intersects("a/**/c", "**/b/**"));
        assert!(intersects("**/x", "x/**"));
        assert!(!intersects("a/**", "b/**"));
    }

    #[test]
    fn sub_wildcards_match_within_a_chunk() {
        assert!(chunk_intersects("ab$*", "$*cd"));
        assert!(chunk_intersects("a$*", "a"));
        assert!(!chunk_intersects("a$*x", "b$*"));
        assert!(!chunk_intersects("$*x", "$*y"));
        assert!(intersects("demo/sensor$*", "demo/sensor42"));
        assert!(!intersects("demo/sensor$*", "demo/actuator1"));
    }

    #[test]
    fn inclusion_is_asymmetric() {
        assert!(includes("a/**", "a/b/c"));
        assert!(!includes("a/b/c", "a/**"));
        assert!(includes("a/**", "a"));
        assert!(includes("a/*/c", "a/b/c"));
        assert!(!includes("a/*/c", "a/**/c"));
        assert!(includes("**", "a/**/b"));
        assert!(includes("a/**/c", "a/*/**/c"));
    }

    #[test]
    fn chunk_inclusion_with_sub_wildcards() {
        assert!(chunk_includes("*", "a$*"));
        assert!(chunk_includes("a$*", "ab$*"));
        assert!(!chunk_includes("ab$*", "a$*"));
        assert!(!chunk_includes("a$*", "*"));
        assert!(chunk_includes("$*x$*", "ax$*"));
    }

    #[test]
    fn pathological_inputs_stay_polynomial() {
        let a = vec!["**"; 40].join("/a/");
        let b = vec!["a"; 200].join("/") + "/z";
        // Completes quickly thanks to the table; exponential backtracking would not.
        assert!(!intersects(&a, &b));
        assert!(intersects(&a, &vec!["a"; 200].join("/")));
    }
}
