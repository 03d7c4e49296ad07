use std::process::Command;

// APP_VERSION = crate version, plus the short commit when one is known
fn main() {
    let base = env!("CARGO_PKG_VERSION");

    let commit = std::env::var("GIT_SHA")
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| {
            let output = Command::new("git")
                .args(["rev-parse", "--short", "HEAD"])
                .output()
                .ok()?;
            output.status.success().then(|| {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            })
        })
        .filter(|s| !s.is_empty());

    match commit {
        Some(sha) => println!("cargo:rustc-env=APP_VERSION={base}+{sha}"),
        None => println!("cargo:rustc-env=APP_VERSION={base}"),
    }

    println!("cargo:rerun-if-env-changed=GIT_SHA");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
