use chrono::{DateTime, Utc};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn build_host() -> &'static str {
    option_env!("FLEETMASTER_BUILD_HOST").unwrap_or("unknown")
}

pub fn build_time_raw() -> &'static str {
    option_env!("FLEETMASTER_BUILD_TIME").unwrap_or("unknown")
}

/// `epoch:<secs>` or RFC 3339 rendered as `YYYY-MM-DD HH:MM:SS` UTC.
/// Anything else is returned trimmed.
pub fn format_build_time(raw: &str) -> String {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("epoch:") {
        Some(secs) => secs
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0)),
        None => DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
    };
    match parsed {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => raw.to_string(),
    }
}

/// Splash line printed before commands that touch processes.
pub fn banner() -> String {
    format!(
        "fleetmaster v{} (built on {} at {})",
        version(),
        build_host(),
        format_build_time(build_time_raw())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_time_formats() {
        assert_eq!(format_build_time("epoch:0"), "1970-01-01 00:00:00");
        assert_eq!(format_build_time("2024-03-01T10:20:30Z"), "2024-03-01 10:20:30");
        assert_eq!(format_build_time(" unknown "), "unknown");
        assert_eq!(format_build_time("epoch:x"), "epoch:x");
    }

    #[test]
    fn banner_names_the_tool() {
        assert!(banner().starts_with(&format!("fleetmaster v{}", version())));
    }
}
