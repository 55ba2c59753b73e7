//! Stamps the git revision and build time into the binary for `/version`.

use std::process::Command;

fn short_revision() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .filter(|rev| !rev.is_empty())
}

fn main() {
    let revision = short_revision().unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=GIT_COMMIT_SHORT={}", revision);
    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
    );
    println!("cargo:rerun-if-changed=.git/HEAD");
}
