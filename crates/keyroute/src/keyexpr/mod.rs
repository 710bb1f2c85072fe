// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Key expressions: hierarchical resource names with wildcards.
//!
//! A key expression is a `/`-separated list of chunks. `*` matches exactly
//! one chunk, `**` matches zero or more chunks, and `$*` matches any run of
//! bytes inside a chunk.
//!
//! # Example
//!
//! ```rust
//! use keyroute::{KeyExpr, Relation};
//!
//! let all = KeyExpr::try_from("demo/**").unwrap();
//! let one = KeyExpr::try_from("demo/a/b").unwrap();
//! assert!(all.intersects(&one));
//! assert!(all.includes(&one));
//! assert_eq!(one.relation_to(&all), Relation::IsIncluded);
//!
//! // Lenient parsing rewrites to canonical form.
//! let k = KeyExpr::autocanonize("demo/**/**/x").unwrap();
//! assert_eq!(k.as_str(), "demo/**/x");
//! ```

pub mod canon;
mod matching;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::timestamp::SessionId;

/// Relation between two key expressions, as seen from the left operand.
///
/// Discriminants of the first four variants follow the set intersection
/// levels used on the wire by other bindings.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// No key matches both.
    Disjoint = 0,
    /// Some keys match both, neither includes the other.
    Intersects = 1,
    /// Every key matched by the right side is matched by the left.
    Includes = 2,
    /// Both sides match exactly the same keys.
    Equals = 3,
    /// Every key matched by the left side is matched by the right.
    IsIncluded = 4,
}

/// Registration of a key expression with a session.
#[derive(Debug)]
pub(crate) struct Declaration {
    pub(crate) session: SessionId,
    pub(crate) expr_id: u16,
    live: AtomicBool,
}

impl Declaration {
    pub(crate) fn new(session: SessionId, expr_id: u16) -> Self {
        Self {
            session,
            expr_id,
            live: AtomicBool::new(true),
        }
    }

    /// Mark as undeclared. Returns `false` if it already was.
    pub(crate) fn retire(&self) -> bool {
        self.live.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

/// A validated, canonical key expression.
///
/// Cloning is cheap (the string is shared). Equality and hashing only look
/// at the expression text, never at its declaration state.
#[derive(Clone)]
pub struct KeyExpr {
    inner: Arc<str>,
    declaration: Option<Arc<Declaration>>,
}

impl KeyExpr {
    fn from_canonical(canon: String) -> Self {
        Self {
            inner: Arc::from(canon),
            declaration: None,
        }
    }

    /// Build from any valid spelling, rewriting it to canonical form.
    pub fn autocanonize<S: AsRef<str>>(raw: S) -> Result<Self> {
        canon::canonize(raw.as_ref()).map(Self::from_canonical)
    }

    /// The canonical expression text.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// True if some concrete key is matched by both expressions.
    pub fn intersects(&self, other: &KeyExpr) -> bool {
        matching::intersects(&self.inner, &other.inner)
    }

    /// True if every key matched by `other` is also matched by `self`.
    pub fn includes(&self, other: &KeyExpr) -> bool {
        matching::includes(&self.inner, &other.inner)
    }

    /// Classify how `self` relates to `other`.
    pub fn relation_to(&self, other: &KeyExpr) -> Relation {
        if self.inner == other.inner {
            return Relation::Equals;
        }
        let fwd = self.includes(other);
        let back = other.includes(self);
        match (fwd, back) {
            (true, true) => Relation::Equals,
            (true, false) => Relation::Includes,
            (false, true) => Relation::IsIncluded,
            (false, false) if self.intersects(other) => Relation::Intersects,
            (false, false) => Relation::Disjoint,
        }
    }

    /// Append `suffix` as new chunks and canonicalize the result.
    ///
    /// ```rust
    /// # use keyroute::KeyExpr;
    /// let k = KeyExpr::try_from("a/**").unwrap();
    /// assert_eq!(k.join("*").unwrap().as_str(), "a/*/**");
    /// ```
    pub fn join(&self, suffix: &str) -> Result<KeyExpr> {
        Self::autocanonize(format!("{}/{}", self.inner, suffix))
    }

    /// Append `suffix` verbatim (no separator, no canonicalization).
    ///
    /// Fails when the junction would fuse two wildcards or the result is not
    /// a valid canonical expression.
    pub fn concat(&self, suffix: &str) -> Result<KeyExpr> {
        if self.inner.ends_with('*') && suffix.starts_with('*') {
            return Err(Error::InvalidKeyExpr(format!(
                "'{}' + '{}': concatenation would fuse wildcards",
                self.inner, suffix
            )));
        }
        Self::try_from(format!("{}{}", self.inner, suffix))
    }

    /// Whether this expression was returned by `Session::declare_keyexpr`.
    pub fn is_declared(&self) -> bool {
        self.declaration.is_some()
    }

    pub(crate) fn declared(&self, session: SessionId, expr_id: u16) -> (KeyExpr, Arc<Declaration>) {
        let decl = Arc::new(Declaration::new(session, expr_id));
        let key = KeyExpr {
            inner: Arc::clone(&self.inner),
            declaration: Some(Arc::clone(&decl)),
        };
        (key, decl)
    }

    pub(crate) fn declaration(&self) -> Option<&Arc<Declaration>> {
        self.declaration.as_ref()
    }

    /// Copy without the declaration handle (used when storing keys in samples).
    pub(crate) fn undeclared(&self) -> KeyExpr {
        KeyExpr {
            inner: Arc::clone(&self.inner),
            declaration: None,
        }
    }

    /// Check a declared expression may be used through `session`.
    pub(crate) fn check_usable(&self, session: SessionId) -> Result<()> {
        match &self.declaration {
            None => Ok(()),
            Some(decl) if decl.session != session => Err(Error::DeclarationConflict(format!(
                "'{}' is declared by session {}, not {}",
                self.inner, decl.session, session
            ))),
            Some(decl) if !decl.is_live() => Err(Error::SessionClosed),
            Some(_) => Ok(()),
        }
    }
}

impl TryFrom<&str> for KeyExpr {
    type Error = Error;

    /// Strict constructor: `raw` must already be canonical.
    fn try_from(raw: &str) -> Result<Self> {
        let canon = canon::canonize(raw)?;
        if canon != raw {
            return Err(Error::InvalidKeyExpr(format!(
                "'{}' is not canonical (canonical form: '{}')",
                raw, canon
            )));
        }
        Ok(Self::from_canonical(canon))
    }
}

impl TryFrom<String> for KeyExpr {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        Self::try_from(raw.as_str())
    }
}

impl TryFrom<&String> for KeyExpr {
    type Error = Error;

    fn try_from(raw: &String) -> Result<Self> {
        Self::try_from(raw.as_str())
    }
}

impl From<&KeyExpr> for KeyExpr {
    fn from(k: &KeyExpr) -> Self {
        k.clone()
    }
}

impl FromStr for KeyExpr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::try_from(s)
    }
}

impl AsRef<str> for KeyExpr {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

impl PartialEq for KeyExpr {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl Eq for KeyExpr {}

impl Hash for KeyExpr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl PartialEq<str> for KeyExpr {
    fn eq(&self, other: &str) -> bool {
        &*self.inner == other
    }
}

impl PartialEq<&str> for KeyExpr {
    fn eq(&self, other: &&str) -> bool {
        &*self.inner == *other
    }
}

impl fmt::Display for KeyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

impl fmt::Debug for KeyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.declaration {
            Some(decl) => write!(f, "KeyExpr({:?}, expr_id={})", self.inner, decl.expr_id),
            None => write!(f, "KeyExpr({:?})", self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ke(s: &str) -> KeyExpr {
        KeyExpr::try_from(s).expect("valid key expression")
    }

    #[test]
    fn strict_constructor_rejects_non_canonical() {
        let err = KeyExpr::try_from("a/**/**/b").unwrap_err();
        match err {
            Error::InvalidKeyExpr(msg) => assert!(msg.contains("a/**/b"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(KeyExpr::autocanonize("a/**/**/b").is_ok());
    }

    #[test]
    fn both_constructors_reject_invalid() {
        for bad in ["", "a//b", "/a", "a/", "a/b#", "a/?"] {
            assert!(KeyExpr::try_from(bad).is_err(), "{}", bad);
            assert!(KeyExpr::autocanonize(bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn relation_covers_all_cases() {
        assert_eq!(ke("a/b").relation_to(&ke("a/b")), Relation::Equals);
        assert_eq!(ke("a/**").relation_to(&ke("a/b")), Relation::Includes);
        assert_eq!(ke("a/b").relation_to(&ke("a/**")), Relation::IsIncluded);
        assert_eq!(ke("a/*/c").relation_to(&ke("a/b/*")), Relation::Intersects);
        assert_eq!(ke("a/b").relation_to(&ke("a/c")), Relation::Disjoint);
    }

    #[test]
    fn relation_discriminants_are_stable() {
        assert_eq!(Relation::Disjoint as u8, 0);
        assert_eq!(Relation::Intersects as u8, 1);
        assert_eq!(Relation::Includes as u8, 2);
        assert_eq!(Relation::Equals as u8, 3);
    }

    #[test]
    fn join_canonicalizes() {
        assert_eq!(ke("a/**").join("**/b").unwrap().as_str(), "a/**/b");
        assert_eq!(ke("A/B").join("C/D").unwrap().as_str(), "A/B/C/D");
        assert!(ke("a").join("").is_err());
        assert!(ke("a").join("b//c").is_err());
    }

    #[test]
    fn concat_is_textual() {
        assert_eq!(ke("A/B").concat("/C/D").unwrap().as_str(), "A/B/C/D");
        assert_eq!(ke("a/b").concat("cd").unwrap().as_str(), "a/bcd");
        assert!(ke("a/*").concat("*").is_err());
        assert!(ke("a/b").concat("/").is_err());
    }

    #[test]
    fn equality_ignores_declaration() {
        let plain = ke("demo/x");
        let (declared, _decl) = plain.declared(SessionId::from_bytes([1; 16]), 1);
        assert_eq!(plain, declared);
        assert!(declared.is_declared());
        assert!(!plain.is_declared());
    }

    #[test]
    fn declared_keys_are_bound_to_their_session() {
        let owner = SessionId::from_bytes([1; 16]);
        let other = SessionId::from_bytes([2; 16]);
        let (declared, decl) = ke("demo/x").declared(owner, 7);

        assert!(declared.check_usable(owner).is_ok());
        assert!(matches!(
            declared.check_usable(other),
            Err(Error::DeclarationConflict(_))
        ));

        assert!(decl.retire());
        assert!(!decl.retire());
        assert!(matches!(declared.check_usable(owner), Err(Error::SessionClosed)));
    }

    #[test]
    fn parses_through_from_str() {
        let k: KeyExpr = "x/y/z".parse().unwrap();
        assert_eq!(k, "x/y/z");
        assert_eq!(k.to_string(), "x/y/z");
    }
}
