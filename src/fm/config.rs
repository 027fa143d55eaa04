use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Flags stripped from the command line before dispatch. Built once per
/// invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolFlags {
    pub nosplash: bool,
    pub quiet: bool,
    pub verbose: bool,
    pub no_color: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetConfig {
    /// Command path handed to every subcommand (argv[0] of each node).
    #[serde(default = "default_command")]
    pub command: String,

    /// Optional launcher put in front of every node command line, e.g. a
    /// Python interpreter. Empty: the node command is the program.
    #[serde(default)]
    pub executable: String,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Extra environment for spawned nodes, layered over the inherited one.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShutdownConfig {
    /// Liveness poll rounds used by `stop_verify` and `restart`.
    #[serde(default = "default_verify_retries")]
    pub verify_retries: u32,
    /// Pause between poll rounds, in ms ("2s", "500ms" also accepted).
    #[serde(
        default = "default_poll_interval_ms",
        deserialize_with = "deserialize_duration_ms"
    )]
    pub poll_interval_ms: u64,
}

fn default_command() -> String {
    "celeryd".to_string()
}
fn default_verify_retries() -> u32 {
    30
}
fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            verify_retries: default_verify_retries(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            executable: String::new(),
            shutdown: ShutdownConfig::default(),
            environment: BTreeMap::new(),
        }
    }
}

impl FleetConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.shutdown.poll_interval_ms)
    }
}

fn deserialize_duration_ms<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error as _;
    let v = serde_yaml::Value::deserialize(deserializer)?;
    match v {
        serde_yaml::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom("poll_interval_ms must be a non-negative integer")),
        serde_yaml::Value::String(s) => parse_duration_ms(&s).map_err(D::Error::custom),
        _ => Err(D::Error::custom(
            "poll_interval_ms must be integer milliseconds or a string like \"2s\"",
        )),
    }
}

fn parse_duration_ms(s: &str) -> Result<u64, String> {
    let t = s.trim();
    let split = t
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map(|(i, _)| i)
        .unwrap_or(t.len());
    if split == 0 {
        return Err(format!("invalid duration: {s:?}"));
    }
    let (num, unit) = t.split_at(split);
    let num: f64 = num
        .parse()
        .map_err(|e| format!("invalid duration number in {s:?}: {e}"))?;
    let mult = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "ms" => 1.0,
        "s" => 1000.0,
        "m" => 60_000.0,
        other => return Err(format!("unknown duration unit {other:?} (use ms/s/m)")),
    };
    Ok((num * mult).round() as u64)
}

pub fn load_fleet_config(config_path: &Path) -> anyhow::Result<FleetConfig> {
    let raw = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", config_path.display()))?;
    let cfg: FleetConfig = serde_yaml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e}", config_path.display()))?;

    anyhow::ensure!(!cfg.command.trim().is_empty(), "command must not be empty");
    anyhow::ensure!(
        cfg.shutdown.verify_retries > 0,
        "shutdown.verify_retries must be at least 1"
    );
    for name in cfg.environment.keys() {
        anyhow::ensure!(
            !name.is_empty() && !name.contains('=') && !name.contains('\0'),
            "environment: invalid variable name {name:?}"
        );
    }
    Ok(cfg)
}

/// No path: built-in defaults.
pub fn load_optional(config_path: Option<&Path>) -> anyhow::Result<FleetConfig> {
    match config_path {
        Some(p) => load_fleet_config(p),
        None => Ok(FleetConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_without_file() {
        let cfg = load_optional(None).unwrap();
        assert_eq!(cfg.command, "celeryd");
        assert!(cfg.executable.is_empty());
        assert_eq!(cfg.shutdown.verify_retries, 30);
        assert_eq!(cfg.poll_interval(), Duration::from_millis(1000));
    }

    #[test]
    fn parses_yaml_with_duration_string() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.yaml");
        fs::write(
            &path,
            "command: worker\nexecutable: /usr/bin/python3\nshutdown:\n  verify_retries: 5\n  poll_interval_ms: 2s\nenvironment:\n  QUEUE: fast\n",
        )
        .unwrap();
        let cfg = load_fleet_config(&path).unwrap();
        assert_eq!(cfg.command, "worker");
        assert_eq!(cfg.executable, "/usr/bin/python3");
        assert_eq!(cfg.shutdown.verify_retries, 5);
        assert_eq!(cfg.shutdown.poll_interval_ms, 2000);
        assert_eq!(cfg.environment.get("QUEUE").map(String::as_str), Some("fast"));
    }

    #[test]
    fn rejects_unknown_keys_and_zero_retries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.yaml");
        fs::write(&path, "comand: typo\n").unwrap();
        assert!(load_fleet_config(&path).is_err());

        fs::write(&path, "shutdown:\n  verify_retries: 0\n").unwrap();
        let err = load_fleet_config(&path).unwrap_err().to_string();
        assert!(err.contains("verify_retries"), "{err}");
    }

    #[test]
    fn duration_units() {
        assert_eq!(parse_duration_ms("250"), Ok(250));
        assert_eq!(parse_duration_ms("250ms"), Ok(250));
        assert_eq!(parse_duration_ms("1.5s"), Ok(1500));
        assert_eq!(parse_duration_ms("1m"), Ok(60_000));
        assert!(parse_duration_ms("fast").is_err());
        assert!(parse_duration_ms("3h").is_err());
    }
}
