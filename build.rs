use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=.git/HEAD");

    let hash = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let dirty = Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .map(|o| !o.stdout.is_empty())
        .unwrap_or(false);

    let build_version = if dirty { format!("{hash}-dirty") } else { hash };

    println!("cargo:rustc-env=BUILD_VERSION={build_version}");

    if env::var("CARGO_CFG_WINDOWS").is_ok() {
        println!("cargo:rustc-cfg=php_world_windows");
    }
}
