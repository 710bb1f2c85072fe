// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test readability over pedantic

//! Configuration files and environment loading, applied to real sessions.

use keyroute::config::CONFIG_ENV;
use keyroute::{Config, Error, FifoChannel, GetOptions};
use std::io::Write;
use std::time::{Duration, Instant};

#[test]
fn config_file_drives_the_session() {
    let mut file = tempfile::Builder::new()
        .suffix(".json")
        .tempfile()
        .expect("tempfile");
    write!(
        file,
        r#"{{
            "fabric": "config-file-fabric",
            "id": "c0ffee",
            "timestamping": {{ "enabled": true }},
            "queries_default_timeout": 80
        }}"#
    )
    .expect("write config");

    let config = Config::from_file(file.path()).expect("load");
    let session = keyroute::open(config).expect("open");
    assert_eq!(session.zid().to_string(), "c0ffee00000000000000000000000000");
    assert_eq!(session.info().fabric(), "config-file-fabric");

    let sub = session
        .declare_subscriber("cfg/*", FifoChannel::default())
        .expect("subscriber");
    session.put("cfg/k", "stamped").expect("put");
    let sample = sub.try_recv().expect("sample");
    assert_eq!(sample.timestamp().expect("timestamp").id(), session.zid());

    // No queryable: the configured default timeout bounds the query.
    let start = Instant::now();
    let replies = session
        .get_with("cfg/none", FifoChannel::default(), GetOptions::default())
        .expect("get");
    assert_eq!(replies.iter().count(), 0);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(80));
    assert!(elapsed < Duration::from_secs(5));
}

#[cfg(feature = "config-loaders")]
#[test]
fn yaml_and_environment() {
    let mut file = tempfile::Builder::new()
        .suffix(".yml")
        .tempfile()
        .expect("tempfile");
    writeln!(file, "fabric: env-fabric\ntimestamping:\n  enabled: true").expect("write");

    std::env::set_var(CONFIG_ENV, file.path());
    let config = Config::from_env().expect("load from env");
    std::env::remove_var(CONFIG_ENV);
    assert_eq!(config.get_json("fabric").expect("fabric"), "\"env-fabric\"");
    assert_eq!(config.get_json("timestamping/enabled").expect("flag"), "true");

    assert!(matches!(Config::from_env(), Err(Error::Config(_))));
}

#[test]
fn invalid_documents_never_open() {
    assert!(matches!(
        Config::from_json(r#"{"queries_default_timeout": "soon"}"#),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        Config::from_json(r#"{"id": "00"}"#),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        Config::from_file("/no/such/keyroute.yaml"),
        Err(Error::ConfigFileNotFound(_))
    ));
}
