//! Subcommand table and the top-level `execute_from_commandline` entry.

use crate::fm::config::{FleetConfig, ToolFlags};
use crate::fm::supervisor::{FleetSupervisor, ShutdownReport};
use crate::fm::terminal::Terminal;

pub const HELP: &str = "\
Examples
========

# Single worker with explicit name and events enabled.
$ fleetmaster start Leslie -E

# Pidfiles and logfiles are stored in the current directory
# by default. Use --pidfile and --logfile argument to change
# this. The abbreviation %n will be expanded to the current
# node name.
$ fleetmaster start Leslie -E --pidfile=/var/run/celery/%n.pid
                              --logfile=/var/log/celery/%n.log

# You need to add the same arguments when you restart,
# as these are not persisted anywhere.
$ fleetmaster restart Leslie -E --pidfile=/var/run/celery/%n.pid
                                --logfile=/var/run/celery/%n.log

# To stop the node, you need to specify the same pidfile.
$ fleetmaster stop Leslie --pidfile=/var/run/celery/%n.pid

# 3 workers, with 3 processes each
$ fleetmaster start 3 -c 3
celeryd -n celery1.myhost -c 3
celeryd -n celery2.myhost -c 3
celeryd -n celery3.myhost -c 3

# start 3 named workers
$ fleetmaster start image video data -c 3
celeryd -n image.myhost -c 3
celeryd -n video.myhost -c 3
celeryd -n data.myhost -c 3

# specify custom hostname
$ fleetmaster start 2 -n worker.example.com -c 3
celeryd -n celery1.worker.example.com -c 3
celeryd -n celery2.worker.example.com -c 3

# Advanced example starting 10 workers in the background:
#   * Three of the workers processes the images and video queue
#   * Two of the workers processes the data queue with loglevel DEBUG
#   * the rest processes the default queue.
$ fleetmaster start 10 -l INFO -Q:1-3 images,video -Q:4,5 data
    -Q default -L:4,5 DEBUG

# You can show the commands necessary to start the workers with
# the 'show' command:
$ fleetmaster show 10 -l INFO -Q:1-3 images,video -Q:4,5 data
    -Q default -L:4,5 DEBUG

# Additional options are added to each celeryd,
# but you can also modify the options for ranges of, or specific workers

# 3 workers: Two with 3 processes, and one with 10 processes.
$ fleetmaster start 3 -c 3 -c:1 10
celeryd -n celery1.myhost -c 10
celeryd -n celery2.myhost -c 3
celeryd -n celery3.myhost -c 3

# can also specify options for named workers
$ fleetmaster start image video data -c 3 -c:image 10
celeryd -n image.myhost -c 10
celeryd -n video.myhost -c 3
celeryd -n data.myhost -c 3

# ranges and lists of workers in options is also allowed:
# (-c:1-3 can also be written as -c:1,2,3)
$ fleetmaster start 5 -c 3  -c:1-3 10
celeryd -n celery1.myhost -c 10
celeryd -n celery2.myhost -c 10
celeryd -n celery3.myhost -c 10
celeryd -n celery4.myhost -c 3
celeryd -n celery5.myhost -c 3

# lists also works with named workers
$ fleetmaster start foo bar baz xuzzy -c 3 -c:foo,bar,baz 10
celeryd -n foo.myhost -c 10
celeryd -n bar.myhost -c 10
celeryd -n baz.myhost -c 10
celeryd -n xuzzy.myhost -c 3
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    StopVerify,
    Restart,
    Kill,
    Show,
    Get,
    Names,
    Expand,
    Help,
}

type Handler = fn(&mut MultiTool, &[String], &str) -> anyhow::Result<i32>;

impl Command {
    pub const ALL: [Command; 10] = [
        Command::Start,
        Command::Stop,
        Command::StopVerify,
        Command::Restart,
        Command::Kill,
        Command::Show,
        Command::Get,
        Command::Names,
        Command::Expand,
        Command::Help,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::StopVerify => "stop_verify",
            Command::Restart => "restart",
            Command::Kill => "kill",
            Command::Show => "show",
            Command::Get => "get",
            Command::Names => "names",
            Command::Expand => "expand",
            Command::Help => "help",
        }
    }

    pub fn from_name(name: &str) -> Option<Command> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    fn handler(self) -> Handler {
        match self {
            Command::Start => run_start,
            Command::Stop => run_stop,
            Command::StopVerify => run_stop_verify,
            Command::Restart => run_restart,
            Command::Kill => run_kill,
            Command::Show => run_show,
            Command::Get => run_get,
            Command::Names => run_names,
            Command::Expand => run_expand,
            Command::Help => run_help,
        }
    }
}

fn run_start(t: &mut MultiTool, args: &[String], cmd: &str) -> anyhow::Result<i32> {
    t.sup.start(args, cmd)
}

fn run_stop(t: &mut MultiTool, args: &[String], cmd: &str) -> anyhow::Result<i32> {
    let report = t.sup.stop(args, cmd, None, None)?;
    log_report(t, "stop", &report);
    Ok(0)
}

fn run_stop_verify(t: &mut MultiTool, args: &[String], cmd: &str) -> anyhow::Result<i32> {
    let report = t.sup.stop_verify(args, cmd, None)?;
    log_report(t, "stop_verify", &report);
    Ok(i32::from(!report.unconfirmed.is_empty()))
}

fn log_report(t: &MultiTool, command: &str, report: &ShutdownReport) {
    t.sup.term.event(
        command,
        None,
        format!(
            "stopped={} signalled={} unconfirmed={}",
            report.stopped.len(),
            report.signalled.len(),
            report.unconfirmed.len()
        ),
    );
}

fn run_restart(t: &mut MultiTool, args: &[String], cmd: &str) -> anyhow::Result<i32> {
    t.sup.restart(args, cmd)
}

fn run_kill(t: &mut MultiTool, args: &[String], cmd: &str) -> anyhow::Result<i32> {
    t.sup.kill(args, cmd)?;
    Ok(0)
}

fn run_show(t: &mut MultiTool, args: &[String], cmd: &str) -> anyhow::Result<i32> {
    t.sup.show(args, cmd)?;
    Ok(0)
}

fn run_get(t: &mut MultiTool, args: &[String], cmd: &str) -> anyhow::Result<i32> {
    t.sup.get(args, cmd)?;
    Ok(0)
}

fn run_names(t: &mut MultiTool, args: &[String], cmd: &str) -> anyhow::Result<i32> {
    t.sup.names(args, cmd)?;
    Ok(0)
}

fn run_expand(t: &mut MultiTool, args: &[String], _cmd: &str) -> anyhow::Result<i32> {
    t.sup.expand(args)?;
    Ok(0)
}

fn run_help(t: &mut MultiTool, _args: &[String], _cmd: &str) -> anyhow::Result<i32> {
    t.help();
    Ok(0)
}

/// Pull the tool's own flags out of `args`. Tokens after a literal `--`
/// belong to the workers and are left alone.
pub fn extract_flags(args: &[String]) -> (ToolFlags, Vec<String>) {
    let mut flags = ToolFlags::default();
    let mut rest = Vec::with_capacity(args.len());
    let mut tail = false;
    for arg in args {
        if !tail {
            match arg.as_str() {
                "--nosplash" => {
                    flags.nosplash = true;
                    continue;
                }
                "--quiet" | "-q" => {
                    flags.quiet = true;
                    continue;
                }
                "--verbose" => {
                    flags.verbose = true;
                    continue;
                }
                "--no-color" => {
                    flags.no_color = true;
                    continue;
                }
                "--" => tail = true,
                _ => {}
            }
        }
        rest.push(arg.clone());
    }
    (flags, rest)
}

pub struct MultiTool {
    sup: FleetSupervisor,
    command: String,
    prog_name: String,
    retcode: i32,
}

impl MultiTool {
    pub fn new(term: Terminal, cfg: &FleetConfig) -> Self {
        Self::with_supervisor(FleetSupervisor::new(term, cfg), &cfg.command)
    }

    pub fn with_supervisor(sup: FleetSupervisor, command: &str) -> Self {
        Self {
            sup,
            command: command.to_string(),
            prog_name: "fleetmaster".to_string(),
            retcode: 0,
        }
    }

    pub fn flags(&self) -> ToolFlags {
        self.sup.term.flags()
    }

    /// `argv[0]` is the program name. Returns the process exit code.
    pub fn execute_from_commandline(&mut self, argv: &[String]) -> i32 {
        if let Some(prog) = argv.first() {
            self.prog_name = std::path::Path::new(prog)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| prog.clone());
        }
        let (flags, rest) = extract_flags(argv.get(1..).unwrap_or_default());
        self.sup.term.set_flags(flags);

        let Some((name, args)) = rest.split_first() else {
            return self.error(None);
        };
        if name.starts_with('-') {
            return self.error(None);
        }
        let Some(command) = Command::from_name(name) else {
            return self.error(Some(&format!("Invalid command: {name}")));
        };

        self.sup.term.event("dispatch", None, format!("command={}", command.name()));
        let cmd = self.command.clone();
        match (command.handler())(self, args, &cmd) {
            Ok(code) => {
                self.retcode = self.retcode.max(code);
                self.retcode
            }
            Err(e) => {
                self.sup.term.say(&format!("Error: {e:#}"));
                self.retcode = 1;
                1
            }
        }
    }

    /// Print `msg` (if any) and the usage text; marks the run as failed.
    pub fn error(&mut self, msg: Option<&str>) -> i32 {
        if let Some(msg) = msg {
            self.sup.term.say(msg);
        }
        self.usage();
        self.retcode = 1;
        1
    }

    pub fn usage(&mut self) {
        let prog = self.prog_name.clone();
        self.sup.term.say(&format!(
            "usage: {prog} start <node1 node2 nodeN|range> [worker options]\n       {prog} stop <n1 n2 nN|range> [-SIG (default: -TERM)]\n       {prog} restart <n1 n2 nN|range> [-SIG] [worker options]\n       {prog} kill <n1 n2 nN|range>\n\n       {prog} show <n1 n2 nN|range> [worker options]\n       {prog} get hostname <n1 n2 nN|range> [-qv] [worker options]\n       {prog} names <n1 n2 nN|range>\n       {prog} expand template <n1 n2 nN|range>\n       {prog} help\n\nadditional options (must appear after command name):\n\n    * --nosplash:   Don't display program info.\n    * --quiet:      Don't show as much output.\n    * --verbose:    Show more output.\n    * --no-color:   Don't display colors."
        ));
    }

    pub fn help(&mut self) {
        self.sup.term.say(HELP);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fm::terminal::OutputBuffer;
    use pretty_assertions::assert_eq;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn tool() -> (MultiTool, OutputBuffer) {
        let (term, out) = Terminal::buffered();
        let sup = FleetSupervisor::new(term, &FleetConfig::default()).with_hostname("e.com");
        (MultiTool::with_supervisor(sup, "celeryd"), out)
    }

    #[test]
    fn command_table_round_trips_names() {
        for c in Command::ALL {
            assert_eq!(Command::from_name(c.name()), Some(c));
        }
        assert_eq!(Command::from_name("frob"), None);
        assert_eq!(Command::from_name("stop_verify"), Some(Command::StopVerify));
    }

    #[test]
    fn flags_are_stripped_anywhere_before_passthrough() {
        let (flags, rest) = extract_flags(&strings(&[
            "start", "foo", "--nosplash", "--quiet", "-q", "--verbose", "--no-color", "--", "-q",
        ]));
        assert_eq!(
            flags,
            ToolFlags {
                nosplash: true,
                quiet: true,
                verbose: true,
                no_color: true,
            }
        );
        assert_eq!(rest, strings(&["start", "foo", "--", "-q"]));
    }

    #[test]
    fn error_prints_message_and_usage() {
        let (mut t, out) = tool();
        assert_eq!(t.error(Some("foo")), 1);
        let text = out.contents();
        assert!(text.starts_with("foo\nusage: fleetmaster start"), "{text}");
        assert_eq!(t.retcode, 1);

        out.clear();
        assert_eq!(t.error(None), 1);
        assert!(out.contents().starts_with("usage:"));
    }

    #[test]
    fn missing_or_unknown_subcommand_is_a_usage_error() {
        let (mut t, out) = tool();
        assert_eq!(t.execute_from_commandline(&strings(&["multi", "frob", "foo"])), 1);
        assert!(out.contents().starts_with("Invalid command: frob\nusage: multi"));

        out.clear();
        assert_eq!(t.execute_from_commandline(&strings(&["multi"])), 1);
        assert!(out.contents().starts_with("usage:"));

        out.clear();
        assert_eq!(t.execute_from_commandline(&strings(&["multi", "-foo"])), 1);
        assert!(out.contents().starts_with("usage:"));
    }

    #[test]
    fn dispatches_with_fixed_command_path() {
        let (mut t, out) = tool();
        let code = t.execute_from_commandline(&strings(&["multi", "names", "foo", "bar", "--quiet"]));
        assert_eq!(code, 0);
        assert_eq!(out.contents(), "foo.e.com\nbar.e.com\n");
        assert!(t.flags().quiet);

        out.clear();
        t.execute_from_commandline(&strings(&["multi", "show", "foo"]));
        assert_eq!(out.contents(), "celeryd -n foo.e.com \n");
    }

    #[test]
    fn handler_error_becomes_exit_code() {
        let (mut t, out) = tool();
        assert_eq!(t.execute_from_commandline(&strings(&["multi", "get"])), 1);
        assert!(out.contents().starts_with("Error: get: missing node name"));
    }

    #[test]
    fn help_prints_examples() {
        let (mut t, out) = tool();
        assert_eq!(t.execute_from_commandline(&strings(&["multi", "help"])), 0);
        assert!(out.contents().contains(HELP));
    }
}
