use crate::fm::terminal::Terminal;
use std::collections::BTreeMap;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus};
use std::time::Instant;

/// Exit code reported when a node's command line cannot even be launched.
pub const SPAWN_FAILED: i32 = 127;

/// How a child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Success,
    ExitCode(i32),
    KilledBySignal(i32),
}

impl ExitKind {
    pub fn from_status(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(0), _) => ExitKind::Success,
            (Some(code), _) => ExitKind::ExitCode(code),
            (None, Some(sig)) => ExitKind::KilledBySignal(sig),
            (None, None) => ExitKind::ExitCode(1),
        }
    }

    /// 0, the exit code, or the signal number.
    pub fn code(self) -> i32 {
        match self {
            ExitKind::Success => 0,
            ExitKind::ExitCode(n) | ExitKind::KilledBySignal(n) => n,
        }
    }

    pub fn is_success(self) -> bool {
        self == ExitKind::Success
    }
}

/// Runs one node command line at a time and waits for it.
#[derive(Debug, Clone, Default)]
pub struct ProcessController {
    environment: BTreeMap<String, String>,
}

impl ProcessController {
    pub fn new(environment: BTreeMap<String, String>) -> Self {
        Self { environment }
    }

    /// `path` and `argv` joined into one line, then split with shell word
    /// rules so `"-n node1"` becomes two arguments.
    pub fn command_line(argv: &[String], path: &str) -> Result<Vec<String>, shell_words::ParseError> {
        let mut parts: Vec<&str> = Vec::with_capacity(argv.len() + 1);
        if !path.is_empty() {
            parts.push(path);
        }
        parts.extend(argv.iter().map(String::as_str));
        shell_words::split(&parts.join(" "))
    }

    /// Launch `path argv...` with the inherited environment and block until it
    /// exits. Failures are reported on `term`, never returned as errors.
    pub fn spawn_and_wait(&self, term: &mut Terminal, argv: &[String], path: &str) -> ExitKind {
        let words = match Self::command_line(argv, path) {
            Ok(w) if !w.is_empty() => w,
            Ok(_) => {
                term.note("* Empty command line, nothing to run");
                return ExitKind::ExitCode(SPAWN_FAILED);
            }
            Err(e) => {
                term.note(&format!("* Could not parse command line: {e}"));
                return ExitKind::ExitCode(SPAWN_FAILED);
            }
        };
        term.info(&format!("  {}", words.join(" ")));

        let mut cmd = Command::new(&words[0]);
        cmd.args(&words[1..]);
        for (k, v) in &self.environment {
            cmd.env(k, v);
        }

        let t0 = Instant::now();
        let status = match cmd.spawn().and_then(|mut child| {
            term.event("spawn", None, format!("program={} pid={}", words[0], child.id()));
            child.wait()
        }) {
            Ok(st) => st,
            Err(e) => {
                term.note(&format!("* Could not run {}: {e}", words[0]));
                return ExitKind::ExitCode(SPAWN_FAILED);
            }
        };

        let kind = ExitKind::from_status(status);
        term.event(
            "spawn",
            None,
            format!(
                "program={} outcome={:?} elapsed_ms={}",
                words[0],
                kind,
                t0.elapsed().as_millis()
            ),
        );
        match kind {
            ExitKind::KilledBySignal(sig) => {
                term.note(&format!("* Child was terminated by signal {sig}"));
            }
            ExitKind::ExitCode(code) => {
                term.note(&format!("* Child terminated with failure code {code}"));
            }
            ExitKind::Success => {}
        }
        kind
    }
}
