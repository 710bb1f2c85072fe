// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writes `keyroute.h` next to the manifest.

use std::env;
use std::path::PathBuf;

const SOURCES: &[&str] = &[
    "src/lib.rs",
    "src/keyexpr_ffi.rs",
    "src/logging.rs",
    "src/pubsub.rs",
    "src/query_ffi.rs",
];

fn header_config() -> cbindgen::Config {
    let mut config = cbindgen::Config {
        language: cbindgen::Language::C,
        header: Some("/* SPDX-License-Identifier: Apache-2.0 OR MIT */".to_string()),
        include_guard: Some("KEYROUTE_H".to_string()),
        autogen_warning: Some(
            "/* Generated by cbindgen from keyroute-c. Do not edit. */".to_string(),
        ),
        usize_is_size_t: true,
        cpp_compat: true,
        ..Default::default()
    };
    // KrError::KrOk -> KR_OK
    config.enumeration.rename_variants = cbindgen::RenameRule::ScreamingSnakeCase;
    config.enumeration.prefix_with_name = false;
    config
}

fn main() {
    if let Err(e) = generate() {
        eprintln!("keyroute-c: header generation failed: {e}");
        std::process::exit(1);
    }
}

fn generate() -> Result<(), Box<dyn std::error::Error>> {
    let crate_dir = env::var("CARGO_MANIFEST_DIR")?;
    let header = PathBuf::from(&crate_dir).join("keyroute.h");

    cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(header_config())
        .generate()?
        .write_to_file(&header);

    for source in SOURCES {
        println!("cargo:rerun-if-changed={source}");
    }
    Ok(())
}
