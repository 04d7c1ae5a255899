//! Builds `sandbox-supervisor` and embeds the resulting ELF as a byte blob.
//!
//! Cargo does not build a sibling binary crate's artifact for a library's
//! `build.rs` on its own, so we shell out to a nested `cargo build` the way
//! self-embedding single-binary tools commonly do, then copy the produced
//! executable into `OUT_DIR` for `include_bytes!`.

use std::env;
use std::path::PathBuf;
use std::process::Command;

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let workspace_root = manifest_dir
        .parent()
        .expect("sandbox-client has a workspace root");
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    let profile = env::var("PROFILE").unwrap_or_else(|_| "debug".to_string());
    let cargo = env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());

    let mut cmd = Command::new(&cargo);
    cmd.current_dir(workspace_root)
        .args(["build", "--package", "sandbox-supervisor"]);
    if profile == "release" {
        cmd.arg("--release");
    }
    // Avoid re-entrant build-script recursion: build the supervisor with a
    // separate target directory keyed by this crate's OUT_DIR.
    let nested_target_dir = out_dir.join("supervisor-target");
    cmd.env("CARGO_TARGET_DIR", &nested_target_dir);

    let status = cmd.status().expect("failed to spawn nested cargo build");
    assert!(status.success(), "building sandbox-supervisor failed");

    let built_bin = nested_target_dir.join(&profile).join("sandbox-supervisor");
    let embedded_path = out_dir.join("sandbox-supervisor.bin");
    std::fs::copy(&built_bin, &embedded_path)
        .unwrap_or_else(|e| panic!("copying {built_bin:?} to {embedded_path:?}: {e}"));

    println!("cargo:rustc-env=SANDBOX_SUPERVISOR_BIN={}", embedded_path.display());
    println!("cargo:rerun-if-changed=../sandbox-supervisor/src");
    println!("cargo:rerun-if-changed=../sandbox-proto/src");
}
