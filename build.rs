use std::env;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn first_line_of(program: &str, args: &[&str]) -> Option<String> {
    let out = Command::new(program).args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .next()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    // SOURCE_DATE_EPOCH keeps release builds reproducible.
    let stamp = match env::var("SOURCE_DATE_EPOCH") {
        Ok(sde) if !sde.trim().is_empty() => format!("epoch:{}", sde.trim()),
        _ => {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            format!("epoch:{secs}")
        }
    };

    let host = env::var("HOSTNAME")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .or_else(|| first_line_of("hostname", &[]))
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=FLEETMASTER_BUILD_TIME={stamp}");
    println!("cargo:rustc-env=FLEETMASTER_BUILD_HOST={host}");
}
