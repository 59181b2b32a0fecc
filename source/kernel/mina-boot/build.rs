use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=MINA_LINKER_SCRIPT");
    // Host builds produce a stub binary; only the bare-metal image needs the script.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("none") {
        return;
    }
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("cargo sets CARGO_MANIFEST_DIR"));
    let linker_script = match env::var_os("MINA_LINKER_SCRIPT") {
        Some(path) => PathBuf::from(path),
        None => manifest_dir.join("kernel.ld"),
    };
    println!("cargo:rerun-if-changed={}", linker_script.display());
    // Use canonicalize to ensure only a single absolute path reaches the linker
    let abs_script = linker_script.canonicalize().expect("linker script must exist");
    println!("cargo:rustc-link-arg=-T{}", abs_script.display());
}
