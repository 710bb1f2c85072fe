// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session configuration.
//!
//! A [`Config`] is a JSON value tree seeded with defaults. User documents
//! (JSON or YAML) are merged over the defaults, so a document only needs the
//! keys it changes. Every mutation is validated against the recognised keys:
//!
//! | Key | Type | Default |
//! |-----|------|---------|
//! | `id` | hex string, 1-16 bytes | random |
//! | `fabric` | string | `"default"` |
//! | `timestamping/enabled` | bool | `false` |
//! | `queries_default_timeout` | milliseconds | `10000` |
//!
//! # Example
//!
//! ```
//! use keyroute::Config;
//!
//! let mut config = Config::default();
//! config.insert_json("timestamping/enabled", "true").unwrap();
//! assert_eq!(config.get_json("timestamping/enabled").unwrap(), "true");
//! ```

use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::session::DEFAULT_FABRIC;
use crate::timestamp::SessionId;

/// Environment variable naming a configuration file for [`Config::from_env`].
pub const CONFIG_ENV: &str = "KEYROUTE_CONFIG";

/// Default query timeout, in milliseconds.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 10_000;

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    /// Detect format from file extension.
    pub fn from_extension(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Some(ConfigFormat::Json),
            Some("yaml") | Some("yml") => Some(ConfigFormat::Yaml),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTimestamping {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSettings {
    #[serde(default)]
    id: Option<String>,
    fabric: String,
    timestamping: RawTimestamping,
    queries_default_timeout: u64,
}

/// Validated view of a [`Config`], read by `Session::open`.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) id: Option<SessionId>,
    pub(crate) fabric: String,
    pub(crate) timestamping: bool,
    pub(crate) queries_default_timeout: Duration,
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    root: Value,
}

impl Config {
    /// The default configuration.
    pub fn load_default() -> Self {
        let mut timestamping = Map::new();
        timestamping.insert("enabled".into(), Value::Bool(false));

        let mut root = Map::new();
        root.insert("fabric".into(), Value::String(DEFAULT_FABRIC.into()));
        root.insert("timestamping".into(), Value::Object(timestamping));
        root.insert(
            "queries_default_timeout".into(),
            Value::from(DEFAULT_QUERY_TIMEOUT_MS),
        );
        Self {
            root: Value::Object(root),
        }
    }

    /// Parse a JSON document and merge it over the defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Parse a YAML document and merge it over the defaults.
    #[cfg(feature = "config-loaders")]
    pub fn from_yaml(text: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(text)?;
        Self::from_value(value)
    }

    /// Load a configuration file, choosing the parser from its extension
    /// (`.json`, `.yaml`, `.yml`).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::ConfigFileNotFound(path.display().to_string()));
        }
        let format = ConfigFormat::from_extension(path).ok_or_else(|| {
            Error::Config(format!(
                "unable to detect config format for '{}', use .json, .yaml or .yml",
                path.display()
            ))
        })?;
        let text = std::fs::read_to_string(path)?;
        log::debug!("[Config] loading {:?} from {}", format, path.display());

        match format {
            ConfigFormat::Json => Self::from_json(&text),
            #[cfg(feature = "config-loaders")]
            ConfigFormat::Yaml => Self::from_yaml(&text),
            #[cfg(not(feature = "config-loaders"))]
            ConfigFormat::Yaml => Err(Error::Config(
                "YAML configuration requires the 'config-loaders' feature".into(),
            )),
        }
    }

    /// Load the file named by the `KEYROUTE_CONFIG` environment variable.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(path),
            _ => Err(Error::Config(format!("{} is not set", CONFIG_ENV))),
        }
    }

    fn from_value(value: Value) -> Result<Self> {
        let Value::Object(user) = value else {
            return Err(Error::Config(
                "configuration document must be a map".into(),
            ));
        };
        let mut config = Self::load_default();
        if let Value::Object(root) = &mut config.root {
            merge(root, user);
        }
        config.settings()?;
        Ok(config)
    }

    /// JSON text of the value at `path` (keys separated by `/`).
    pub fn get_json(&self, path: &str) -> Result<String> {
        let mut node = &self.root;
        for key in split_path(path)? {
            node = node
                .get(key)
                .ok_or_else(|| Error::Config(format!("no such key: '{}'", path)))?;
        }
        Ok(serde_json::to_string(node)?)
    }

    /// Set the value at `path` from its JSON text.
    ///
    /// The whole configuration is revalidated; on failure it is left
    /// unchanged.
    pub fn insert_json(&mut self, path: &str, value: &str) -> Result<()> {
        let keys = split_path(path)?;
        let value: Value = serde_json::from_str(value)?;
        let previous = self.root.clone();

        let (last, parents) = keys
            .split_last()
            .ok_or_else(|| Error::Config("empty configuration path".into()))?;
        let mut node = &mut self.root;
        for key in parents {
            let Value::Object(map) = node else {
                self.root = previous;
                return Err(Error::Config(format!("'{}' is not a map", key)));
            };
            node = map
                .entry((*key).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        match node {
            Value::Object(map) => {
                map.insert((*last).to_string(), value);
            }
            _ => {
                self.root = previous;
                return Err(Error::Config(format!("parent of '{}' is not a map", path)));
            }
        }

        if let Err(e) = self.settings() {
            self.root = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Session id set by the configuration, if any.
    pub fn id(&self) -> Option<SessionId> {
        self.settings().ok().and_then(|s| s.id)
    }

    pub(crate) fn settings(&self) -> Result<Settings> {
        let raw = RawSettings::deserialize(&self.root)
            .map_err(|e| Error::Config(e.to_string()))?;
        let id = match raw.id {
            Some(hex) => Some(SessionId::from_str(&hex)?),
            None => None,
        };
        Ok(Settings {
            id,
            fabric: raw.fabric,
            timestamping: raw.timestamping.enabled,
            queries_default_timeout: Duration::from_millis(raw.queries_default_timeout),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::load_default()
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_json(s)
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string_pretty(&self.root).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let keys: Vec<&str> = path.split('/').filter(|k| !k.is_empty()).collect();
    if keys.is_empty() {
        return Err(Error::Config("empty configuration path".into()));
    }
    Ok(keys)
}

/// Recursive merge: maps merge key by key, anything else replaces.
fn merge(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(dst)), Value::Object(src)) => merge(dst, src),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
