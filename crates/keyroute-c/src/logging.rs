// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `env_logger` setup for C hosts.
//!
//! The level given to `kr_logging_init` applies to the `keyroute` crates
//! only; everything else stays at `warn` so a host linking other Rust code
//! is not flooded. Only one logger can be installed per process: a second
//! init returns `KR_OPERATION_FAILED` and leaves the first in place.

use std::os::raw::c_char;

use env_logger::{Builder, Env};
use log::LevelFilter;

use super::{cstr, KrError};

/// Verbosity of keyroute log output.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KrLogLevel {
    KrLogOff = 0,
    KrLogError = 1,
    KrLogWarn = 2,
    KrLogInfo = 3,
    KrLogDebug = 4,
    KrLogTrace = 5,
}

impl From<KrLogLevel> for LevelFilter {
    fn from(level: KrLogLevel) -> Self {
        match level {
            KrLogLevel::KrLogOff => LevelFilter::Off,
            KrLogLevel::KrLogError => LevelFilter::Error,
            KrLogLevel::KrLogWarn => LevelFilter::Warn,
            KrLogLevel::KrLogInfo => LevelFilter::Info,
            KrLogLevel::KrLogDebug => LevelFilter::Debug,
            KrLogLevel::KrLogTrace => LevelFilter::Trace,
        }
    }
}

/// Filter directives scoping `level` to the keyroute crates.
fn scoped_filter(level: LevelFilter) -> String {
    let level = level.as_str().to_ascii_lowercase();
    format!("warn,keyroute={level},keyroute_c={level}")
}

fn install(mut builder: Builder) -> KrError {
    match builder.format_timestamp_millis().format_target(true).try_init() {
        Ok(()) => KrError::KrOk,
        Err(e) => {
            log::debug!("[Logging] logger already installed: {}", e);
            KrError::KrOperationFailed
        }
    }
}

/// Log keyroute messages at `level` and above to stderr.
///
/// # Safety
/// Call once, before other threads start logging.
///
/// # Example (C)
/// ```c
/// kr_logging_init(KR_LOG_DEBUG);
/// ```
#[no_mangle]
pub unsafe extern "C" fn kr_logging_init(level: KrLogLevel) -> KrError {
    let mut builder = Builder::new();
    builder.parse_filters(&scoped_filter(level.into()));
    install(builder)
}

/// Like `kr_logging_init`, but `RUST_LOG` wins when it is set.
///
/// # Safety
/// Call once, before other threads start logging.
#[no_mangle]
pub unsafe extern "C" fn kr_logging_init_env(default_level: KrLogLevel) -> KrError {
    let fallback = scoped_filter(default_level.into());
    install(Builder::from_env(Env::default().default_filter_or(fallback)))
}

/// Install a logger from `RUST_LOG`-style directives, e.g.
/// `"keyroute::query=trace,warn"`.
///
/// # Safety
/// `filter` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn kr_logging_init_with_filter(filter: *const c_char) -> KrError {
    let Some(directives) = cstr(filter) else {
        return KrError::KrInvalidArgument;
    };
    let mut builder = Builder::new();
    builder.parse_filters(directives);
    install(builder)
}

/// Whether messages at `level` can currently be emitted at all.
#[no_mangle]
pub extern "C" fn kr_logging_enabled(level: KrLogLevel) -> bool {
    let wanted = LevelFilter::from(level);
    wanted != LevelFilter::Off && wanted <= log::max_level()
}
