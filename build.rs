fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

fn main() {
    // CI and image builds pass the build metadata in; local builds compute it
    let timestamp = std::env::var("BUILD_TIMESTAMP")
        .ok()
        .and_then(|ts| ts.parse::<u64>().ok())
        .unwrap_or_else(unix_now);

    let datetime = std::env::var("BUILD_DATETIME").unwrap_or_else(|_| {
        chrono::Utc::now()
            .format("%Y-%m-%d %H:%M:%S UTC")
            .to_string()
    });

    let git_hash = std::env::var("BUILD_GIT_HASH")
        .unwrap_or_else(|_| git_hash().unwrap_or_else(|| "unknown".to_string()));

    println!("cargo:rustc-env=BUILD_TIMESTAMP={timestamp}");
    println!("cargo:rustc-env=BUILD_DATETIME={datetime}");
    println!("cargo:rustc-env=BUILD_GIT_HASH={git_hash}");

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=BUILD_TIMESTAMP");
    println!("cargo:rerun-if-env-changed=BUILD_GIT_HASH");
}

/// Short commit hash via command-line git, suffixed `-dirty` for local changes
fn git_hash() -> Option<String> {
    use std::process::Command;

    let hash_output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !hash_output.status.success() {
        return None;
    }
    let hash = String::from_utf8(hash_output.stdout).ok()?;

    let is_dirty = Command::new("git")
        .args(["diff", "--quiet"])
        .output()
        .is_ok_and(|output| !output.status.success());

    let suffix = if is_dirty { "-dirty" } else { "" };
    Some(format!("{}{suffix}", hash.trim()))
}
