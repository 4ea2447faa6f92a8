use std::{env, process::Command};

/// Stamps `TV_REMOTE_BUILD_ID` (`<version>+<yyyymmddHHMM>.<sha>[-dirty]`) and
/// `TV_REMOTE_BUILD_PROFILE` into the crate environment.
fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=TV_REMOTE_BUILD_ID");

    let build_id = env::var("TV_REMOTE_BUILD_ID").unwrap_or_else(|_| {
        let version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".into());
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M");
        let revision = match git(&["rev-parse", "--short=10", "HEAD"]) {
            Some(sha) if git(&["status", "--porcelain"]).is_some() => format!("{sha}-dirty"),
            Some(sha) => sha,
            None => "unversioned".into(),
        };
        format!("{version}+{stamp}.{revision}")
    });
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".into());

    println!("cargo:rustc-env=TV_REMOTE_BUILD_ID={build_id}");
    println!("cargo:rustc-env=TV_REMOTE_BUILD_PROFILE={profile}");
}

/// Trimmed stdout of a successful, non-empty git invocation.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
