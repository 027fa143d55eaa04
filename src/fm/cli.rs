use crate::fm::config;
use crate::fm::dispatch::MultiTool;
use crate::fm::terminal::Terminal;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "fleetmaster",
    version,
    about = "Start, stop and restart fleets of named workers",
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct Args {
    /// Path to fleet config YAML (optional; built-in defaults otherwise)
    #[arg(long = "config", env = "FLEETMASTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand, node names and worker options, passed through untouched
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, num_args = 0..)]
    pub argv: Vec<String>,
}

/// Parse the process arguments, load the config and dispatch. Returns the
/// exit code.
pub fn run() -> anyhow::Result<i32> {
    let args = Args::parse();
    run_with(args)
}

pub fn run_with(args: Args) -> anyhow::Result<i32> {
    let cfg = config::load_optional(args.config.as_deref())?;
    let mut tool = MultiTool::new(Terminal::stdout(), &cfg);

    let mut argv = Vec::with_capacity(args.argv.len() + 1);
    argv.push("fleetmaster".to_string());
    argv.extend(args.argv);
    Ok(tool.execute_from_commandline(&argv))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn worker_options_pass_through_clap() {
        let args = Args::try_parse_from([
            "fleetmaster",
            "--config",
            "fleet.yaml",
            "start",
            "3",
            "-c",
            "5",
            "--loglevel=INFO",
            "--",
            "-x",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("fleet.yaml")));
        assert_eq!(
            args.argv,
            vec!["start", "3", "-c", "5", "--loglevel=INFO", "--", "-x"]
        );
    }

    #[test]
    fn config_is_optional() {
        let args = Args::try_parse_from(["fleetmaster", "names", "foo"]).unwrap();
        assert_eq!(args.argv, vec!["names", "foo"]);
    }
}
