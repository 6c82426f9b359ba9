//! Test utilities for extension loading tests
//!
//! Builds the C fixture extension once per test binary with the system C
//! compiler. Tests that need it skip when no compiler is available.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::{Mutex, OnceLock};

use memload::config::{BackingConfig, SealPolicy};
use memload::extension::{new_extension_with_backing, Extension};

const FIXTURE_SOURCE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/echo_extension.c");

fn compile_fixture(tag: Option<&str>) -> Option<Vec<u8>> {
    let dir = tempfile::tempdir().ok()?;
    let output = dir.path().join("libecho_extension.so");
    let compiler = std::env::var("CC").unwrap_or_else(|_| "cc".to_string());

    let mut command = Command::new(&compiler);
    command.args(["-shared", "-fPIC", "-O1"]);
    if let Some(tag) = tag {
        command.arg(format!("-DFIXTURE_TAG=\"{}\"", tag));
    }
    let status = command
        .arg("-o")
        .arg(&output)
        .arg(Path::new(FIXTURE_SOURCE))
        .status();

    match status {
        Ok(status) if status.success() => std::fs::read(&output).ok(),
        Ok(status) => {
            eprintln!("fixture compilation with {} failed: {}", compiler, status);
            None
        }
        Err(e) => {
            eprintln!("no C compiler ({}): {}", compiler, e);
            None
        }
    }
}

/// Bytes of the compiled fixture extension, if a compiler is present
pub fn fixture_image() -> Option<&'static [u8]> {
    static IMAGE: OnceLock<Option<Vec<u8>>> = OnceLock::new();
    IMAGE.get_or_init(|| compile_fixture(None)).as_deref()
}

/// Fixture compiled so that its `who` export answers `tag`
pub fn tagged_fixture_image(tag: &str) -> Option<Vec<u8>> {
    static IMAGES: OnceLock<Mutex<HashMap<String, Option<Vec<u8>>>>> = OnceLock::new();
    let mut images = IMAGES.get_or_init(Default::default).lock().ok()?;
    images
        .entry(tag.to_string())
        .or_insert_with(|| compile_fixture(Some(tag)))
        .clone()
}

/// Fixture image or an early return from the calling test
macro_rules! fixture_or_skip {
    () => {
        match common::fixture_image() {
            Some(image) => image.to_vec(),
            None => {
                eprintln!("skipping: fixture extension unavailable");
                return;
            }
        }
    };
}

/// Tagged fixture image or an early return from the calling test
macro_rules! tagged_fixture_or_skip {
    ($tag:expr) => {
        match common::tagged_fixture_image($tag) {
            Some(image) => image,
            None => {
                eprintln!("skipping: fixture extension unavailable");
                return;
            }
        }
    };
}

pub fn test_backing() -> BackingConfig {
    BackingConfig {
        name: "memload-test".to_string(),
        sealing: SealPolicy::BestEffort,
    }
}

/// Unloaded extension for `image`
pub fn extension(id: &str, image: Vec<u8>, init: &str) -> Box<dyn Extension> {
    new_extension_with_backing(id, image, std::env::consts::ARCH, init, test_backing())
}

/// Loaded extension for `image`
pub fn loaded_extension(id: &str, image: Vec<u8>) -> Box<dyn Extension> {
    let mut ext = extension(id, image, "");
    ext.load().expect("fixture extension should load");
    ext
}

/// Invoke `export` and collect every payload
pub fn collect(ext: &dyn Extension, export: &str, args: &[u8]) -> (u32, Vec<Vec<u8>>) {
    let mut payloads = Vec::new();
    let status = ext
        .invoke(export, args, &mut |bytes| payloads.push(bytes))
        .expect("invoke should succeed");
    assert_eq!(status.deliveries, payloads.len());
    (status.code, payloads)
}
