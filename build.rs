use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    // Copy memory.x into OUT_DIR so the linker can find it
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    fs::copy("memory.x", out_dir.join("memory.x")).unwrap();
    println!("cargo:rustc-link-search={}", out_dir.display());

    // Only firmware builds link against the cortex-m-rt script
    let target = env::var("TARGET").unwrap_or_default();
    if target.starts_with("thumbv") {
        println!("cargo:rustc-link-arg-bins=-Tlink.x");
    }

    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=build.rs");
}
