use crate::fm::build_info;
use crate::fm::config::FleetConfig;
use crate::fm::names::{findsig, signal_name};
use crate::fm::nodes::{local_hostname, multi_args, with_detacher_defaults, with_pidfile_default, Naming, NodeSpecs};
use crate::fm::options::NamespacedOptions;
use crate::fm::pidfile::PidFile;
use crate::fm::process::{ExitKind, ProcessController};
use crate::fm::terminal::Terminal;
use anyhow::Context as _;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::time::Duration;

/// Signal delivery. `None` only checks whether the pid exists.
pub trait Signaller {
    fn send(&self, pid: i32, sig: Option<Signal>) -> nix::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UnixSignaller;

impl Signaller for UnixSignaller {
    fn send(&self, pid: i32, sig: Option<Signal>) -> nix::Result<()> {
        kill(Pid::from_raw(pid), sig)
    }
}

/// Pause between liveness poll rounds.
pub trait Sleeper {
    fn sleep(&self, d: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, d: Duration) {
        std::thread::sleep(d);
    }
}

/// A node as found through its pidfile. `pid: None` means the node is down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidRecord {
    pub name: String,
    pub argv: Vec<String>,
    pub pid: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownPolicy {
    pub signal: i32,
    /// Liveness poll rounds after signalling; `None` is fire-and-forget.
    pub retry: Option<u32>,
}

impl ShutdownPolicy {
    pub fn new(signal: i32, retry: Option<u32>) -> Self {
        Self { signal, retry }
    }
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self::new(Signal::SIGTERM as i32, None)
    }
}

/// Per-node hook run once a node is known to be down.
pub type NodeCallback<'a> = &'a mut dyn FnMut(&mut FleetSupervisor, &PidRecord);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Confirmed down (already gone, or stopped within the retry budget).
    pub stopped: Vec<String>,
    /// Signalled without waiting.
    pub signalled: Vec<String>,
    /// Still alive after every poll round.
    pub unconfirmed: Vec<String>,
}

pub struct FleetSupervisor {
    pub term: Terminal,
    process: ProcessController,
    executable: String,
    verify_retries: u32,
    poll_interval: Duration,
    hostname: Option<String>,
    signaller: Box<dyn Signaller>,
    sleeper: Box<dyn Sleeper>,
}

impl FleetSupervisor {
    pub fn new(term: Terminal, cfg: &FleetConfig) -> Self {
        Self {
            term,
            process: ProcessController::new(cfg.environment.clone()),
            executable: cfg.executable.clone(),
            verify_retries: cfg.shutdown.verify_retries,
            poll_interval: cfg.poll_interval(),
            hostname: None,
            signaller: Box::new(UnixSignaller),
            sleeper: Box::new(ThreadSleeper),
        }
    }

    pub fn with_signaller(mut self, signaller: Box<dyn Signaller>) -> Self {
        self.signaller = signaller;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Use a fixed hostname instead of asking the OS.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn verify_retries(&self) -> u32 {
        self.verify_retries
    }

    fn hostname(&self) -> anyhow::Result<String> {
        match &self.hostname {
            Some(h) => Ok(h.clone()),
            None => local_hostname(),
        }
    }

    /// Fresh node iterator for this invocation.
    pub fn nodes(&self, p: &NamespacedOptions, cmd: &str) -> anyhow::Result<NodeSpecs> {
        Ok(multi_args(p, cmd, &Naming::default(), &self.hostname()?))
    }

    pub fn splash(&mut self) {
        if !self.term.flags().nosplash {
            let line = self.term.paint().magenta(&build_info::banner());
            self.term.note(&line);
        }
    }

    fn outcome(&self, ok: bool) -> String {
        let paint = self.term.paint();
        if ok {
            paint.ok("OK")
        } else {
            paint.failed("FAILED")
        }
    }

    fn launch(&mut self, argv: &[String]) -> ExitKind {
        self.process.spawn_and_wait(&mut self.term, argv, &self.executable)
    }

    // ---------------- discovery and signalling ----------------

    /// Resolve nodes to pids through their pidfiles. Nodes without a readable
    /// pidfile are reported DOWN and handed to `callback` with no pid.
    pub fn getpids(
        &mut self,
        p: &NamespacedOptions,
        cmd: &str,
        mut callback: Option<NodeCallback<'_>>,
    ) -> anyhow::Result<Vec<PidRecord>> {
        self.resolve_pids(p, cmd, &mut callback)
    }

    fn resolve_pids(
        &mut self,
        p: &NamespacedOptions,
        cmd: &str,
        callback: &mut Option<NodeCallback<'_>>,
    ) -> anyhow::Result<Vec<PidRecord>> {
        let mut p = p.clone();
        with_pidfile_default(&mut p, cmd);

        let mut found = Vec::new();
        for node in self.nodes(&p, cmd)? {
            let pidfile = PidFile::new(
                node.pidfile()
                    .unwrap_or_else(|| node.expand(&format!("{cmd}@%n.pid"))),
            );
            match pidfile.read_pid() {
                Ok(pid) => {
                    self.term.event(
                        "getpids",
                        Some(&node.name),
                        format!("pid={pid} path={}", pidfile.path().display()),
                    );
                    found.push(PidRecord {
                        name: node.name,
                        argv: node.argv,
                        pid: Some(pid),
                    });
                }
                Err(e) => {
                    self.term.event("getpids", Some(&node.name), format!("outcome=down reason={e}"));
                    self.term.note(&format!("> {}: DOWN", node.name));
                    if let Some(cb) = callback.as_mut() {
                        let rec = PidRecord {
                            name: node.name,
                            argv: node.argv,
                            pid: None,
                        };
                        cb(self, &rec);
                    }
                }
            }
        }
        Ok(found)
    }

    /// `true` if `pid` exists. Only ESRCH means "gone"; any other failure is
    /// returned as an error.
    pub fn node_alive(&self, pid: i32) -> anyhow::Result<bool> {
        match self.signaller.send(pid, None) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(e).with_context(|| format!("check pid {pid}")),
        }
    }

    /// Deliver `sig`. `false` (with a warning) when the process is already
    /// gone; other failures are returned as errors.
    pub fn signal_node(&mut self, name: &str, pid: i32, sig: i32) -> anyhow::Result<bool> {
        let signal = Signal::try_from(sig).with_context(|| format!("invalid signal number {sig}"))?;
        match self.signaller.send(pid, Some(signal)) {
            Ok(()) => {
                self.term.event("signal", Some(name), format!("sig={} pid={pid} outcome=sent", signal.as_str()));
                Ok(true)
            }
            Err(Errno::ESRCH) => {
                self.term.event("signal", Some(name), format!("sig={} pid={pid} outcome=esrch", signal.as_str()));
                self.term.note(&format!("Could not signal {name} ({pid}): No such process"));
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| format!("signal {} to {name} (pid {pid})", signal.as_str())),
        }
    }

    /// Signal every node, then (with `retry`) poll until each is confirmed
    /// down or the rounds run out. `callback` fires once per confirmed node.
    pub fn shutdown_nodes(
        &mut self,
        nodes: Vec<PidRecord>,
        policy: &ShutdownPolicy,
        mut callback: Option<NodeCallback<'_>>,
    ) -> anyhow::Result<ShutdownReport> {
        let mut report = ShutdownReport::default();
        if nodes.is_empty() {
            return Ok(report);
        }

        let header = self.term.paint().blue("> Stopping nodes...");
        self.term.note(&header);

        let mut pending: Vec<(PidRecord, i32)> = Vec::new();
        for rec in nodes {
            let delivered = match rec.pid {
                Some(pid) => {
                    self.term.note(&format!("\t> {}: {} -> {pid}", rec.name, signal_name(policy.signal)));
                    self.signal_node(&rec.name, pid, policy.signal)?
                }
                None => false,
            };
            match (delivered, rec.pid) {
                (true, Some(pid)) => pending.push((rec, pid)),
                _ => {
                    report.stopped.push(rec.name.clone());
                    if let Some(cb) = callback.as_mut() {
                        cb(self, &rec);
                    }
                }
            }
        }

        let Some(rounds) = policy.retry.filter(|r| *r > 0) else {
            report.signalled = pending.into_iter().map(|(rec, _)| rec.name).collect();
            return Ok(report);
        };

        self.note_waiting(&pending);
        for round in 0..rounds {
            if pending.is_empty() {
                break;
            }
            let mut still_alive = Vec::with_capacity(pending.len());
            let mut confirmed = false;
            for (rec, pid) in std::mem::take(&mut pending) {
                self.term.note_inline(".");
                if self.node_alive(pid)? {
                    still_alive.push((rec, pid));
                    continue;
                }
                let ok = self.outcome(true);
                self.term.note(&format!("\n\t> {}: {ok}", rec.name));
                self.term.event("shutdown", Some(&rec.name), format!("pid={pid} outcome=stopped round={}", round + 1));
                report.stopped.push(rec.name.clone());
                confirmed = true;
                if let Some(cb) = callback.as_mut() {
                    cb(self, &rec);
                }
            }
            pending = still_alive;
            if confirmed {
                self.note_waiting(&pending);
            }
            if !pending.is_empty() && round + 1 < rounds {
                self.sleeper.sleep(self.poll_interval);
            }
        }
        self.term.note("");

        for (rec, pid) in pending {
            let failed = self.outcome(false);
            self.term.note(&format!("\t> {}: {failed} (pid {pid} still running after {rounds} checks)", rec.name));
            self.term.event("shutdown", Some(&rec.name), format!("pid={pid} outcome=unconfirmed rounds={rounds}"));
            report.unconfirmed.push(rec.name);
        }
        Ok(report)
    }

    fn note_waiting(&mut self, pending: &[(PidRecord, i32)]) {
        if pending.is_empty() {
            return;
        }
        let n = pending.len();
        let pids: Vec<String> = pending.iter().map(|(_, pid)| pid.to_string()).collect();
        let line = format!(
            "> Waiting for {n} {} -> {}...",
            if n == 1 { "node" } else { "nodes" },
            pids.join(", ")
        );
        let line = self.term.paint().blue(&line);
        self.term.note_inline(&line);
    }

    fn stop_nodes(
        &mut self,
        p: &NamespacedOptions,
        cmd: &str,
        policy: &ShutdownPolicy,
        mut callback: Option<NodeCallback<'_>>,
    ) -> anyhow::Result<ShutdownReport> {
        let records = self.resolve_pids(p, cmd, &mut callback)?;
        self.shutdown_nodes(records, policy, callback)
    }

    // ---------------- subcommands ----------------

    /// Signal the nodes (`-9`/`-INT` style argument picks the signal).
    pub fn stop(
        &mut self,
        argv: &[String],
        cmd: &str,
        retry: Option<u32>,
        callback: Option<NodeCallback<'_>>,
    ) -> anyhow::Result<ShutdownReport> {
        self.splash();
        let p = NamespacedOptions::parse(argv.iter().cloned());
        let policy = ShutdownPolicy::new(findsig(argv), retry);
        self.stop_nodes(&p, cmd, &policy, callback)
    }

    /// `stop`, but wait for every node to actually go away.
    pub fn stop_verify(
        &mut self,
        argv: &[String],
        cmd: &str,
        callback: Option<NodeCallback<'_>>,
    ) -> anyhow::Result<ShutdownReport> {
        self.splash();
        let mut p = NamespacedOptions::parse(argv.iter().cloned());
        with_detacher_defaults(&mut p, cmd);
        let policy = ShutdownPolicy::new(findsig(argv), Some(self.verify_retries));
        self.stop_nodes(&p, cmd, &policy, callback)
    }

    pub fn kill(&mut self, argv: &[String], cmd: &str) -> anyhow::Result<()> {
        self.splash();
        let p = NamespacedOptions::parse(argv.iter().cloned());
        for rec in self.getpids(&p, cmd, None)? {
            let Some(pid) = rec.pid else { continue };
            self.term.note(&format!("Killing node {} ({pid})", rec.name));
            self.signal_node(&rec.name, pid, Signal::SIGKILL as i32)?;
        }
        Ok(())
    }

    /// Stop each node and start it again as soon as it is confirmed down.
    /// Returns 1 if any node failed to come back.
    pub fn restart(&mut self, argv: &[String], cmd: &str) -> anyhow::Result<i32> {
        self.splash();
        let mut p = NamespacedOptions::parse(argv.iter().cloned());
        with_detacher_defaults(&mut p, cmd);

        let mut results: Vec<ExitKind> = Vec::new();
        let mut on_node_shutdown = |sup: &mut FleetSupervisor, rec: &PidRecord| {
            let line = sup.term.paint().blue(&format!("> Restarting node {}: ", rec.name));
            sup.term.note_inline(&line);
            let kind = sup.launch(&rec.argv);
            sup.term.event("restart", Some(&rec.name), format!("exit_code={}", kind.code()));
            let outcome = sup.outcome(kind.is_success());
            sup.term.note(&outcome);
            results.push(kind);
        };
        let policy = ShutdownPolicy::new(findsig(argv), Some(self.verify_retries));
        let report = self.stop_nodes(&p, cmd, &policy, Some(&mut on_node_shutdown))?;

        let failed = results.iter().any(|k| !k.is_success()) || !report.unconfirmed.is_empty();
        Ok(i32::from(failed))
    }

    /// Launch every node in order. Returns 1 if any child failed.
    pub fn start(&mut self, argv: &[String], cmd: &str) -> anyhow::Result<i32> {
        self.splash();
        let mut p = NamespacedOptions::parse(argv.iter().cloned());
        with_detacher_defaults(&mut p, cmd);

        self.term.note("> Starting nodes...");
        let mut failed = false;
        for node in self.nodes(&p, cmd)? {
            self.term.note_inline(&format!("\t> {}: ", node.name));
            let kind = self.launch(&node.argv);
            self.term.event("start", Some(&node.name), format!("exit_code={}", kind.code()));
            let outcome = self.outcome(kind.is_success());
            self.term.note(&outcome);
            failed |= !kind.is_success();
        }
        Ok(i32::from(failed))
    }

    pub fn show(&mut self, argv: &[String], cmd: &str) -> anyhow::Result<()> {
        let p = NamespacedOptions::parse(argv.iter().cloned());
        for node in self.nodes(&p, cmd)? {
            self.term.say(&node.argv.join(" "));
        }
        Ok(())
    }

    /// Print the command line of the node named `argv[0]`, if any.
    pub fn get(&mut self, argv: &[String], cmd: &str) -> anyhow::Result<()> {
        let (wanted, rest) = argv
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("get: missing node name"))?;
        let p = NamespacedOptions::parse(rest.iter().cloned());
        if let Some(node) = self.nodes(&p, cmd)?.find(|n| n.name == *wanted) {
            self.term.say(&node.argv.join(" "));
        }
        Ok(())
    }

    pub fn names(&mut self, argv: &[String], cmd: &str) -> anyhow::Result<()> {
        let p = NamespacedOptions::parse(argv.iter().cloned());
        for node in self.nodes(&p, cmd)? {
            self.term.say(&node.name);
        }
        Ok(())
    }

    /// `expand <template> <name>...`: one line per name with `%n` filled in.
    pub fn expand(&mut self, argv: &[String]) -> anyhow::Result<()> {
        let (template, names) = argv
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("expand: missing template"))?;
        for name in names {
            self.term.say(&template.replace("%n", name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fm::config::ToolFlags;
    use crate::fm::terminal::OutputBuffer;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::fs;
    use std::path::Path;
    use std::rc::Rc;

    /// Every call is recorded. A polled pid stays alive for its first
    /// `alive_polls` polls, then reports ESRCH.
    #[derive(Default)]
    struct Script {
        calls: Vec<(i32, Option<Signal>)>,
        alive_polls: Vec<(i32, usize)>,
        signal_error: Option<Errno>,
        poll_error: Option<Errno>,
    }

    #[derive(Clone, Default)]
    struct FakeSignaller(Rc<RefCell<Script>>);

    impl Signaller for FakeSignaller {
        fn send(&self, pid: i32, sig: Option<Signal>) -> nix::Result<()> {
            let mut s = self.0.borrow_mut();
            s.calls.push((pid, sig));
            if sig.is_some() {
                return s.signal_error.map_or(Ok(()), Err);
            }
            if let Some(e) = s.poll_error {
                return Err(e);
            }
            let polls = s.calls.iter().filter(|(p, g)| *p == pid && g.is_none()).count();
            let alive_for = s
                .alive_polls
                .iter()
                .find(|(p, _)| *p == pid)
                .map(|(_, n)| *n)
                .unwrap_or(0);
            if polls <= alive_for {
                Ok(())
            } else {
                Err(Errno::ESRCH)
            }
        }
    }

    #[derive(Clone, Default)]
    struct CountingSleeper(Rc<RefCell<Vec<Duration>>>);

    impl Sleeper for CountingSleeper {
        fn sleep(&self, d: Duration) {
            self.0.borrow_mut().push(d);
        }
    }

    struct Harness {
        sup: FleetSupervisor,
        out: OutputBuffer,
        script: Rc<RefCell<Script>>,
        sleeps: Rc<RefCell<Vec<Duration>>>,
        dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let (term, out) = Terminal::buffered();
        let signaller = FakeSignaller::default();
        let sleeper = CountingSleeper::default();
        let script = Rc::clone(&signaller.0);
        let sleeps = Rc::clone(&sleeper.0);
        let mut cfg = FleetConfig::default();
        cfg.shutdown.verify_retries = 5;
        let mut sup = FleetSupervisor::new(term, &cfg)
            .with_signaller(Box::new(signaller))
            .with_sleeper(Box::new(sleeper))
            .with_hostname("e.com");
        sup.term.set_flags(ToolFlags {
            nosplash: true,
            ..Default::default()
        });
        Harness {
            sup,
            out,
            script,
            sleeps,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn write_pid(dir: &Path, name: &str, pid: i32) {
        fs::write(dir.join(format!("celeryd@{name}.pid")), format!("{pid}\n")).unwrap();
    }

    /// `foo` -> 10, `bar` -> 11, `baz` has no pidfile.
    fn fleet_args(dir: &Path, extra: &[&str]) -> Vec<String> {
        write_pid(dir, "foo", 10);
        write_pid(dir, "bar", 11);
        let mut args = vec![
            "foo".to_string(),
            "bar".to_string(),
            "baz".to_string(),
            format!("--pidfile={}/celeryd@%n.pid", dir.display()),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));
        args
    }

    fn record(rec: &PidRecord) -> (String, Option<i32>) {
        (rec.name.clone(), rec.pid)
    }

    #[test]
    fn node_alive_distinguishes_esrch() {
        let h = harness();
        assert!(h.sup.node_alive(13).unwrap());
        assert_eq!(h.script.borrow().calls, vec![(13, None)]);

        h.script.borrow_mut().poll_error = Some(Errno::ESRCH);
        assert!(!h.sup.node_alive(13).unwrap());

        h.script.borrow_mut().poll_error = Some(Errno::EPERM);
        let err = h.sup.node_alive(13).unwrap_err();
        assert_eq!(err.downcast_ref::<Errno>(), Some(&Errno::EPERM));
    }

    #[test]
    fn signal_node_distinguishes_esrch() {
        let mut h = harness();
        assert!(h.sup.signal_node("foo", 13, 9).unwrap());
        assert_eq!(h.script.borrow().calls, vec![(13, Some(Signal::SIGKILL))]);

        h.script.borrow_mut().signal_error = Some(Errno::ESRCH);
        assert!(!h.sup.signal_node("foo", 13, 9).unwrap());
        assert!(h.out.contents().contains("Could not signal foo"));

        h.script.borrow_mut().signal_error = Some(Errno::ENOENT);
        let err = h.sup.signal_node("foo", 13, 9).unwrap_err();
        assert_eq!(err.downcast_ref::<Errno>(), Some(&Errno::ENOENT));
    }

    #[test]
    fn getpids_reports_down_nodes_through_callback() {
        let mut h = harness();
        let args = fleet_args(h.dir.path(), &[]);
        let p = NamespacedOptions::parse(args);

        let mut down: Vec<PidRecord> = Vec::new();
        let mut cb = |_: &mut FleetSupervisor, rec: &PidRecord| down.push(rec.clone());
        let nodes = h.sup.getpids(&p, "celeryd", Some(&mut cb)).unwrap();

        assert_eq!(
            nodes.iter().map(record).collect::<Vec<_>>(),
            vec![("foo.e.com".to_string(), Some(10)), ("bar.e.com".to_string(), Some(11))]
        );
        assert_eq!(nodes[0].argv[0], "celeryd");
        assert_eq!(nodes[0].argv[1], "-n foo.e.com");
        assert_eq!(down.len(), 1);
        assert_eq!(down[0].name, "baz.e.com");
        assert_eq!(down[0].pid, None);
        assert!(h.out.contents().contains("> baz.e.com: DOWN"));

        let again = h.sup.getpids(&p, "celeryd", None).unwrap();
        assert_eq!(again.len(), 2);
    }

    #[test]
    fn shutdown_of_nothing_is_a_no_op() {
        let mut h = harness();
        let report = h.sup.shutdown_nodes(Vec::new(), &ShutdownPolicy::default(), None).unwrap();
        assert_eq!(report, ShutdownReport::default());
        assert_eq!(h.out.contents(), "");
        assert!(h.script.borrow().calls.is_empty());
    }

    #[test]
    fn stop_signals_live_nodes_and_reports_down_ones() {
        let mut h = harness();
        let args = fleet_args(h.dir.path(), &[]);
        let mut seen = Vec::new();
        let mut cb = |_: &mut FleetSupervisor, rec: &PidRecord| seen.push(record(rec));
        let report = h.sup.stop(&args, "celeryd", None, Some(&mut cb)).unwrap();

        assert_eq!(
            h.script.borrow().calls,
            vec![(10, Some(Signal::SIGTERM)), (11, Some(Signal::SIGTERM))]
        );
        assert_eq!(seen, vec![("baz.e.com".to_string(), None)]);
        assert_eq!(report.signalled, vec!["foo.e.com", "bar.e.com"]);
        assert!(report.unconfirmed.is_empty());
        assert!(h.out.contents().contains("\t> foo.e.com: TERM -> 10"));
    }

    #[test]
    fn stop_picks_signal_from_arguments() {
        let mut h = harness();
        let args = fleet_args(h.dir.path(), &["-INT"]);
        h.sup.stop(&args, "celeryd", None, None).unwrap();
        assert_eq!(
            h.script.borrow().calls,
            vec![(10, Some(Signal::SIGINT)), (11, Some(Signal::SIGINT))]
        );
    }

    #[test]
    fn already_gone_node_counts_as_stopped() {
        let mut h = harness();
        h.script.borrow_mut().signal_error = Some(Errno::ESRCH);
        let args = fleet_args(h.dir.path(), &[]);
        let mut seen = Vec::new();
        let mut cb = |_: &mut FleetSupervisor, rec: &PidRecord| seen.push(rec.name.clone());
        let report = h.sup.stop(&args, "celeryd", Some(3), Some(&mut cb)).unwrap();

        assert_eq!(seen, vec!["baz.e.com", "foo.e.com", "bar.e.com"]);
        assert_eq!(report.stopped, vec!["foo.e.com", "bar.e.com"]);
        let polls = h.script.borrow().calls.iter().filter(|(_, s)| s.is_none()).count();
        assert_eq!(polls, 0);
    }

    #[test]
    fn retry_polls_until_confirmed_then_calls_back_once() {
        let mut h = harness();
        h.script.borrow_mut().alive_polls = vec![(10, 3), (11, 1)];
        let args = fleet_args(h.dir.path(), &[]);

        let script = Rc::clone(&h.script);
        let mut confirmations: Vec<(String, usize)> = Vec::new();
        let mut cb = |_: &mut FleetSupervisor, rec: &PidRecord| {
            let Some(pid) = rec.pid else { return };
            let polls = script
                .borrow()
                .calls
                .iter()
                .filter(|(p, s)| *p == pid && s.is_none())
                .count();
            confirmations.push((rec.name.clone(), polls));
        };
        let report = h.sup.stop(&args, "celeryd", Some(10), Some(&mut cb)).unwrap();

        // bar dies on its 2nd poll, foo on its 4th; neither is reported earlier.
        assert_eq!(
            confirmations,
            vec![("bar.e.com".to_string(), 2), ("foo.e.com".to_string(), 4)]
        );
        assert_eq!(report.stopped, vec!["bar.e.com", "foo.e.com"]);
        assert!(report.unconfirmed.is_empty());
        assert_eq!(h.sleeps.borrow().len(), 3);
        assert!(h.out.contents().contains("> Waiting for 2 nodes -> 10, 11..."));
    }

    #[test]
    fn exhausted_retries_leave_node_unconfirmed() {
        let mut h = harness();
        h.script.borrow_mut().alive_polls = vec![(10, 100), (11, 0)];
        let args = fleet_args(h.dir.path(), &[]);
        let mut called = Vec::new();
        let mut cb = |_: &mut FleetSupervisor, rec: &PidRecord| called.push(rec.name.clone());
        let report = h.sup.stop(&args, "celeryd", Some(3), Some(&mut cb)).unwrap();

        assert_eq!(report.unconfirmed, vec!["foo.e.com"]);
        assert_eq!(called, vec!["baz.e.com", "bar.e.com"]);
        let polls_of_foo = h
            .script
            .borrow()
            .calls
            .iter()
            .filter(|(p, s)| *p == 10 && s.is_none())
            .count();
        assert_eq!(polls_of_foo, 3);
        assert_eq!(h.sleeps.borrow().len(), 2);
        assert!(h.out.contents().contains("FAILED"));
    }

    #[test]
    fn unexpected_poll_error_aborts_shutdown() {
        let mut h = harness();
        h.script.borrow_mut().poll_error = Some(Errno::EPERM);
        let args = fleet_args(h.dir.path(), &[]);
        let err = h.sup.stop(&args, "celeryd", Some(3), None).unwrap_err();
        assert_eq!(err.downcast_ref::<Errno>(), Some(&Errno::EPERM));
    }

    #[test]
    fn stop_verify_uses_configured_retries() {
        let mut h = harness();
        h.script.borrow_mut().alive_polls = vec![(10, 100), (11, 100)];
        let args = fleet_args(h.dir.path(), &[]);
        let report = h.sup.stop_verify(&args, "celeryd", None).unwrap();
        assert_eq!(report.unconfirmed, vec!["foo.e.com", "bar.e.com"]);
        let polls = h.script.borrow().calls.iter().filter(|(_, s)| s.is_none()).count();
        assert_eq!(polls, 2 * 5);
    }

    #[test]
    fn kill_sends_sigkill_to_every_live_node() {
        let mut h = harness();
        write_pid(h.dir.path(), "baz", 12);
        let args = fleet_args(h.dir.path(), &[]);
        h.sup.kill(&args, "celeryd").unwrap();
        assert_eq!(
            h.script.borrow().calls,
            vec![
                (10, Some(Signal::SIGKILL)),
                (11, Some(Signal::SIGKILL)),
                (12, Some(Signal::SIGKILL)),
            ]
        );
        assert!(h.out.contents().contains("Killing node foo.e.com (10)"));
    }

    #[test]
    fn restart_relaunches_stopped_and_down_nodes() {
        let mut h = harness();
        let dir = h.dir.path().to_path_buf();
        write_pid(&dir, "foo", 10);
        let args = vec!["foo".to_string(), "baz".to_string(), format!("--pidfile={}/celeryd@%n.pid", dir.display())];

        assert_eq!(h.sup.restart(&args, "true").unwrap(), 0);
        let out = h.out.contents();
        assert!(out.contains("> Restarting node baz.e.com: OK"), "{out}");
        assert!(out.contains("> Restarting node foo.e.com: OK"), "{out}");

        h.out.clear();
        assert_eq!(h.sup.restart(&args, "false").unwrap(), 1);
        assert!(h.out.contents().contains("FAILED"));
    }

    #[test]
    fn restart_honours_signal_argument() {
        let mut h = harness();
        let dir = h.dir.path().to_path_buf();
        write_pid(&dir, "foo", 10);
        let args = vec![
            "foo".to_string(),
            format!("--pidfile={}/celeryd@%n.pid", dir.display()),
            "-INT".to_string(),
        ];
        assert_eq!(h.sup.restart(&args, "true").unwrap(), 0);
        assert_eq!(h.script.borrow().calls, vec![(10, Some(Signal::SIGINT)), (10, None)]);
        assert!(h.out.contents().contains("\t> foo.e.com: INT -> 10"));
    }

    #[test]
    fn start_keeps_quoted_values_intact() {
        let mut h = harness();
        let dir = h.dir.path().to_path_buf();
        let marker = dir.join("o'brien log");
        let script = r#"for a; do case "$a" in --marker=*) touch "${a#--marker=}";; esac; done"#;
        let args = vec![
            "a".to_string(),
            format!("--cmd=/bin/sh -c '{script}' sh"),
            format!("--marker={}", marker.display()),
        ];
        assert_eq!(h.sup.start(&args, "ignored").unwrap(), 0, "{}", h.out.contents());
        assert!(marker.exists());
    }

    #[test]
    fn start_aggregates_child_results() {
        let mut h = harness();
        let args: Vec<String> = ["foo", "bar", "baz"].iter().map(|s| s.to_string()).collect();
        assert_eq!(h.sup.start(&args, "true").unwrap(), 0);
        let out = h.out.contents();
        assert!(out.contains("> Starting nodes..."));
        assert!(out.contains("\t> baz.e.com: OK"));

        h.out.clear();
        assert_eq!(h.sup.start(&args, "false").unwrap(), 1);
        assert!(h.out.contents().contains("\t> foo.e.com: * Child terminated with failure code 1"));
    }

    #[test]
    fn read_only_views() {
        let mut h = harness();
        let args: Vec<String> = ["foo", "bar", "baz"].iter().map(|s| s.to_string()).collect();

        h.sup.names(&args, "celeryd").unwrap();
        assert_eq!(h.out.contents(), "foo.e.com\nbar.e.com\nbaz.e.com\n");

        h.out.clear();
        h.sup.show(&args, "celeryd").unwrap();
        assert_eq!(h.out.contents().lines().next(), Some("celeryd -n foo.e.com "));

        h.out.clear();
        let mut wanted = vec!["xuzzy.e.com".to_string()];
        wanted.extend(args.iter().cloned());
        h.sup.get(&wanted, "celeryd").unwrap();
        assert_eq!(h.out.contents(), "");

        wanted[0] = "foo.e.com".to_string();
        h.sup.get(&wanted, "celeryd").unwrap();
        assert_eq!(h.out.contents(), "celeryd -n foo.e.com \n");

        h.out.clear();
        let tpl: Vec<String> = ["foo%n", "ask", "klask", "dask"].iter().map(|s| s.to_string()).collect();
        h.sup.expand(&tpl).unwrap();
        assert_eq!(h.out.contents(), "fooask\nfooklask\nfoodask\n");
    }

    #[test]
    fn splash_respects_nosplash() {
        let mut h = harness();
        h.sup.splash();
        assert_eq!(h.out.contents(), "");
        h.sup.term.set_flags(ToolFlags::default());
        h.sup.splash();
        assert!(h.out.contents().contains("fleetmaster"));
    }
}
