// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Selectors: a key expression plus optional query parameters.
//!
//! # Grammar
//!
//! ```text
//! selector   := keyexpr [ '?' parameters ]
//! parameters := [ entry ( ('&' | ';') entry )* ]
//! entry      := key [ '=' value ]          (value may contain '|' lists)
//! ```
//!
//! Parameters keep insertion order and duplicate keys. `"a/b?"` carries an
//! empty parameter list, which is distinct from `"a/b"` (no parameters).

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::keyexpr::KeyExpr;

const PARAM_SEPS: [char; 2] = ['&', ';'];
const FIELD_SEP: char = '=';
const VALUE_SEP: char = '|';

/// Reserved parameter: selects a time range, disables reply consolidation.
pub const TIME_RANGE_KEY: &str = "_time";
/// Reserved parameter: repliers may answer on keys outside the query's key expression.
pub const ANYKE_KEY: &str = "_anyke";

/// Ordered `key=value` list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Parameters(Vec<(String, String)>);

impl Parameters {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a parameter string. Never fails: empty entries are skipped and
    /// a key without `=` gets an empty value.
    pub fn parse(raw: &str) -> Self {
        let entries = raw
            .split(PARAM_SEPS)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once(FIELD_SEP) {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (entry.to_string(), String::new()),
            })
            .collect();
        Self(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `key`, each entry split on `|`, in order.
    pub fn values(&self, key: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(k, _)| k == key)
            .flat_map(|(_, v)| v.split(VALUE_SEP))
            .collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    /// Set `key` to `value`, replacing every previous entry for it.
    ///
    /// Returns the first replaced value. The new entry takes the position of
    /// the first old one, or goes last if the key was absent.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.0.iter().position(|(k, _)| *k == key) {
            Some(pos) => {
                let old = std::mem::replace(&mut self.0[pos].1, value);
                let mut idx = 0;
                self.0.retain(|(k, _)| {
                    let keep = idx <= pos || *k != key;
                    idx += 1;
                    keep
                });
                Some(old)
            }
            None => {
                self.0.push((key, value));
                None
            }
        }
    }

    /// Remove every entry for `key`, returning the first removed value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let first = self.get(key).map(str::to_string);
        self.0.retain(|(k, _)| k != key);
        first
    }

    /// Insert every entry of `other`, overwriting conflicting keys.
    pub fn extend<I, K, V>(&mut self, other: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in other {
            self.insert(k, v);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl IntoIterator for Parameters {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("&")?;
            }
            if v.is_empty() {
                f.write_str(k)?;
            } else {
                write!(f, "{}{}{}", k, FIELD_SEP, v)?;
            }
        }
        Ok(())
    }
}

impl From<&str> for Parameters {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl FromStr for Parameters {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self::parse(s))
    }
}

/// A key expression with optional parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector {
    key_expr: KeyExpr,
    parameters: Option<Parameters>,
}

impl Selector {
    pub fn new(key_expr: KeyExpr, parameters: Option<Parameters>) -> Self {
        Self {
            key_expr,
            parameters,
        }
    }

    pub fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    /// `None` when the selector had no `?` at all.
    pub fn parameters(&self) -> Option<&Parameters> {
        self.parameters.as_ref()
    }

    /// New selector with `parameters` replacing the current ones.
    pub fn with_parameters(&self, parameters: Parameters) -> Self {
        Self {
            key_expr: self.key_expr.clone(),
            parameters: Some(parameters),
        }
    }

    /// Whether the `_time` range parameter is present.
    pub fn has_time_range(&self) -> bool {
        self.parameters
            .as_ref()
            .map(|p| p.contains_key(TIME_RANGE_KEY))
            .unwrap_or(false)
    }

    /// Whether replies on keys outside the query key expression are accepted.
    pub fn accepts_any_key(&self) -> bool {
        self.parameters
            .as_ref()
            .map(|p| p.contains_key(ANYKE_KEY))
            .unwrap_or(false)
    }

    pub(crate) fn into_parts(self) -> (KeyExpr, Option<Parameters>) {
        (self.key_expr, self.parameters)
    }
}

impl TryFrom<&str> for Selector {
    type Error = Error;

    fn try_from(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::InvalidSelector("selector is empty".to_string()));
        }
        let (key, params) = match raw.split_once('?') {
            Some((key, params)) => (key, Some(Parameters::parse(params))),
            None => (raw, None),
        };
        let key_expr = KeyExpr::try_from(key)
            .map_err(|e| Error::InvalidSelector(format!("'{}': {}", raw, e)))?;
        Ok(Self::new(key_expr, params))
    }
}

impl TryFrom<String> for Selector {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        Self::try_from(raw.as_str())
    }
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::try_from(s)
    }
}

impl From<KeyExpr> for Selector {
    fn from(key_expr: KeyExpr) -> Self {
        Self::new(key_expr, None)
    }
}

impl From<&KeyExpr> for Selector {
    fn from(key_expr: &KeyExpr) -> Self {
        Self::new(key_expr.clone(), None)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parameters {
            Some(p) => write!(f, "{}?{}", self.key_expr, p),
            None => write!(f, "{}", self.key_expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_key_and_parameters() {
        let s = Selector::try_from("a/b/c?arg1=val1").unwrap();
        assert_eq!(s.key_expr().as_str(), "a/b/c");
        assert_eq!(s.parameters().unwrap().to_string(), "arg1=val1");

        let s = Selector::try_from("a/b/c").unwrap();
        assert!(s.parameters().is_none());
    }

    #[test]
    fn empty_parameters_differ_from_absent() {
        let with = Selector::try_from("a/b?").unwrap();
        let without = Selector::try_from("a/b").unwrap();
        assert!(with.parameters().unwrap().is_empty());
        assert_ne!(with, without);
    }

    #[test]
    fn rejects_empty_and_bad_keys() {
        assert!(matches!(Selector::try_from(""), Err(Error::InvalidSelector(_))));
        assert!(matches!(Selector::try_from("a//b?x=1"), Err(Error::InvalidSelector(_))));
    }

    #[test]
    fn duplicate_keys_are_retained_in_order() {
        let s = Selector::try_from("a/b/c?x=1&x=2").unwrap();
        let p = s.parameters().unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p.get("x"), Some("1"));
        assert_eq!(p.values("x"), vec!["1", "2"]);
    }

    #[test]
    fn values_split_on_pipe() {
        let p = Parameters::parse("a=1;b=2;c=3|4|5;d=6");
        assert_eq!(p.get("c"), Some("3|4|5"));
        assert_eq!(p.values("c"), vec!["3", "4", "5"]);
        assert!(p.contains_key("a"));
        assert!(!p.contains_key("e"));
    }

    #[test]
    fn key_without_value() {
        let p = Parameters::parse("flag&k=v");
        assert_eq!(p.get("flag"), Some(""));
        assert_eq!(p.to_string(), "flag&k=v");
    }

    #[test]
    fn insert_and_remove_return_previous() {
        let mut p = Parameters::parse("a=1");
        assert_eq!(p.insert("a", "3"), Some("1".to_string()));
        assert_eq!(p.get("a"), Some("3"));
        assert_eq!(p.insert("b", "1"), None);
        assert_eq!(p.remove("a"), Some("3".to_string()));
        assert_eq!(p.remove("a"), None);
    }

    #[test]
    fn insert_collapses_duplicates() {
        let mut p = Parameters::parse("x=1&y=0&x=2");
        p.insert("x", "9");
        assert_eq!(p.to_string(), "x=9&y=0");
    }

    #[test]
    fn extend_overwrites_conflicts() {
        let mut p = Parameters::parse("a=1;b=2");
        p.extend(Parameters::parse("b=3;d=4"));
        assert_eq!(p, Parameters::parse("a=1&b=3&d=4"));
        p.extend([("e", "5")]);
        assert_eq!(p.get("e"), Some("5"));
    }

    #[test]
    fn reserved_parameters() {
        let s = Selector::try_from("a/b?_time=[now(-1h)..]").unwrap();
        assert!(s.has_time_range());
        assert!(!s.accepts_any_key());
        let s = Selector::try_from("a/b?_anyke").unwrap();
        assert!(s.accepts_any_key());
    }
}
